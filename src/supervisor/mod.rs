//! Supervisor: picks the next specialist (or FINISH) from the shared history
//!
//! Two deciders share one trait: [`RuleSupervisor`] (deterministic intent
//! table) and [`GeminiSupervisor`] (language-model routing with strict output
//! parsing). Whatever they propose passes through [`guard::enforce`] before
//! the dispatch graph acts on it.

use crate::classifier::{Intent, IntentClassifier};
use crate::models::{current_turn, Message, Role, RoutingDirective, Specialist};
use crate::Result;
use async_trait::async_trait;
use tracing::debug;

pub mod gemini;
pub mod guard;

pub use gemini::{parse_directive, GeminiSupervisor};
pub use guard::{enforce, GuardVerdict};

#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Read the history, emit exactly one directive.
    async fn decide(&self, history: &[Message]) -> Result<RoutingDirective>;
}

/// Messages appended after the user's latest instruction.
pub fn turn_replies(history: &[Message]) -> &[Message] {
    let turn = current_turn(history);
    match turn.first() {
        Some(first) if first.role == Role::User => &turn[1..],
        _ => turn,
    }
}

/// Specialists that replied this turn, in order, read from identity tags.
pub fn turn_speakers(history: &[Message]) -> Vec<Specialist> {
    turn_replies(history)
        .iter()
        .filter_map(Message::author)
        .collect()
}

/// Author of the newest specialist reply of this turn.
pub fn last_speaker(history: &[Message]) -> Option<Specialist> {
    turn_replies(history).iter().rev().find_map(Message::author)
}

/// Text of the user's latest instruction.
pub fn latest_instruction(history: &[Message]) -> Option<&str> {
    history
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
}

/// Keyword-table supervisor (no model calls)
///
/// | state                              | directive                       |
/// |------------------------------------|---------------------------------|
/// | last message carries a transaction | FINISH                          |
/// | nobody replied yet                 | by intent of the user message   |
/// | analyst replied, lookup-then-act   | EXECUTOR                        |
/// | anything else                      | FINISH                          |
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleSupervisor;

impl RuleSupervisor {
    pub fn new() -> Self {
        Self
    }

    fn route(history: &[Message]) -> RoutingDirective {
        if history.last().map(Message::has_transaction_intent).unwrap_or(false) {
            return RoutingDirective::Finish;
        }

        let intent = latest_instruction(history)
            .map(IntentClassifier::classify)
            .unwrap_or(Intent::Greeting);
        let speakers = turn_speakers(history);

        match (speakers.last(), intent) {
            (None, Intent::Greeting) => RoutingDirective::Finish,
            (None, Intent::Lookup) | (None, Intent::LookupThenAct) => RoutingDirective::Analyst,
            (None, Intent::Action) => RoutingDirective::Executor,
            (Some(Specialist::Analyst), Intent::LookupThenAct)
                if !speakers.contains(&Specialist::Executor) =>
            {
                RoutingDirective::Executor
            }
            _ => RoutingDirective::Finish,
        }
    }
}

#[async_trait]
impl Supervisor for RuleSupervisor {
    async fn decide(&self, history: &[Message]) -> Result<RoutingDirective> {
        let directive = Self::route(history);
        debug!(directive = %directive, "Rule supervisor decision");
        Ok(directive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(specialist: Specialist, body: &str) -> Message {
        Message::from_specialist(specialist, body)
    }

    async fn decide(history: &[Message]) -> RoutingDirective {
        RuleSupervisor::new().decide(history).await.unwrap()
    }

    #[tokio::test]
    async fn test_price_question_goes_to_analyst_then_finishes() {
        let mut history = vec![Message::user("What is the ETH price?")];
        assert_eq!(decide(&history).await, RoutingDirective::Analyst);

        history.push(reply(Specialist::Analyst, "📈 ethereum 当前价格: $3000"));
        assert_eq!(decide(&history).await, RoutingDirective::Finish);
    }

    #[tokio::test]
    async fn test_deposit_goes_to_executor_then_finishes_on_payload() {
        let mut history = vec![Message::user("Deposit 0.001 WETH into Aave")];
        assert_eq!(decide(&history).await, RoutingDirective::Executor);

        history.push(reply(
            Specialist::Executor,
            r#"{"type": "transaction", "message": "approve", "tx_data": {"to": "0x1", "data": "0x", "value": "0"}}"#,
        ));
        assert_eq!(decide(&history).await, RoutingDirective::Finish);
    }

    #[tokio::test]
    async fn test_lookup_then_act_hands_off_once() {
        let mut history = vec![Message::user(
            "check the eth price, then deposit 0.001 WETH into Aave",
        )];
        assert_eq!(decide(&history).await, RoutingDirective::Analyst);

        history.push(reply(Specialist::Analyst, "ETH is $3000"));
        assert_eq!(decide(&history).await, RoutingDirective::Executor);

        history.push(reply(Specialist::Executor, "余额不足"));
        assert_eq!(decide(&history).await, RoutingDirective::Finish);
    }

    #[tokio::test]
    async fn test_greeting_finishes_immediately() {
        assert_eq!(decide(&[Message::user("你好")]).await, RoutingDirective::Finish);
        assert_eq!(decide(&[]).await, RoutingDirective::Finish);
    }

    #[tokio::test]
    async fn test_routing_reads_only_current_turn() {
        // Previous turn ended with an executor payload; the new turn starts fresh
        let history = vec![
            Message::user("deposit 0.001 weth"),
            reply(Specialist::Executor, r#"{"type":"transaction","message":"x","tx_data":{"to":"0x1","data":"0x","value":"0"}}"#),
            Message::user("what is the eth price"),
        ];
        assert_eq!(decide(&history).await, RoutingDirective::Analyst);
    }

    #[test]
    fn test_speakers_ignore_user_tag() {
        let history = vec![
            Message::user("[Analyst] hi"),
            reply(Specialist::Executor, "done"),
        ];
        assert_eq!(turn_speakers(&history), vec![Specialist::Executor]);
        assert_eq!(last_speaker(&[Message::user("[Analyst] hi")]), None);
    }
}
