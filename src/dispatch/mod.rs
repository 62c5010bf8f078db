//! Dispatch graph - one user turn
//!
//! SUPERVISOR → {ANALYST | EXECUTOR} → SUPERVISOR → ... → DONE
//!
//! Every specialist reply is appended to the shared history before control
//! returns to the supervisor. The hop ceiling bounds the turn no matter what
//! the supervisor decides.

use crate::agent::Agent;
use crate::models::{Message, RoutingDirective, Specialist};
use crate::supervisor::{enforce, Supervisor};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod aggregator;

pub use aggregator::{aggregate, FALLBACK_ANSWER};

pub const DEFAULT_MAX_HOPS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Supervisor,
    Analyst,
    Executor,
    Done,
}

impl From<RoutingDirective> for DispatchState {
    fn from(directive: RoutingDirective) -> Self {
        match directive {
            RoutingDirective::Analyst => DispatchState::Analyst,
            RoutingDirective::Executor => DispatchState::Executor,
            RoutingDirective::Finish => DispatchState::Done,
        }
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DispatchState::Supervisor => "SUPERVISOR",
            DispatchState::Analyst => "ANALYST",
            DispatchState::Executor => "EXECUTOR",
            DispatchState::Done => "DONE",
        };
        write!(f, "{}", s)
    }
}

/// Result of one turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub answer: String,
    /// Messages appended during the turn, user message first
    pub new_messages: Vec<Message>,
    /// Visited states, ending with DONE
    pub trace: Vec<DispatchState>,
    pub hops: usize,
    pub truncated: bool,
}

pub struct DispatchGraph {
    supervisor: Arc<dyn Supervisor>,
    analyst: Arc<dyn Agent>,
    executor: Arc<dyn Agent>,
    max_hops: usize,
}

impl DispatchGraph {
    pub fn new(
        supervisor: Arc<dyn Supervisor>,
        analyst: Arc<dyn Agent>,
        executor: Arc<dyn Agent>,
        max_hops: usize,
    ) -> Self {
        Self {
            supervisor,
            analyst,
            executor,
            max_hops: max_hops.max(1),
        }
    }

    fn agent(&self, specialist: Specialist) -> &Arc<dyn Agent> {
        match specialist {
            Specialist::Analyst => &self.analyst,
            Specialist::Executor => &self.executor,
        }
    }

    /// Append `user_text` to `history` and run until DONE.
    pub async fn run_turn(&self, history: &mut Vec<Message>, user_text: &str) -> TurnOutcome {
        let base = history.len();
        history.push(Message::user(user_text));

        let mut replies: Vec<Message> = Vec::new();
        let mut trace = Vec::new();
        let mut hops = 0usize;
        let mut truncated = false;
        let mut state = DispatchState::Supervisor;

        loop {
            trace.push(state);
            state = match state {
                DispatchState::Supervisor => {
                    self.route(history, hops, &mut truncated).await
                }
                DispatchState::Analyst | DispatchState::Executor => {
                    let specialist = if state == DispatchState::Analyst {
                        Specialist::Analyst
                    } else {
                        Specialist::Executor
                    };
                    let reply = self.hop(specialist, history, hops + 1).await;
                    history.push(reply.clone());
                    replies.push(reply);
                    hops += 1;
                    DispatchState::Supervisor
                }
                DispatchState::Done => break,
            };
        }

        let answer = aggregate(&replies, history);
        info!(hops, truncated, trace = ?trace, "Turn complete");

        TurnOutcome {
            answer,
            new_messages: history[base..].to_vec(),
            trace,
            hops,
            truncated,
        }
    }

    async fn route(
        &self,
        history: &mut Vec<Message>,
        hops: usize,
        truncated: &mut bool,
    ) -> DispatchState {
        let proposed = match self.supervisor.decide(history).await {
            Ok(directive) => directive,
            Err(e) => {
                error!(error = %e, hop = hops, "Supervisor failed, ending turn");
                history.push(Message::system(format!("⚠️ 路由失败，本轮已终止: {}", e)));
                return DispatchState::Done;
            }
        };

        let verdict = enforce(history, proposed);
        info!(
            hop = hops,
            proposed = %proposed,
            directive = %verdict.directive,
            "Supervisor decision"
        );

        if verdict.directive != RoutingDirective::Finish && hops >= self.max_hops {
            warn!(hop = hops, max_hops = self.max_hops, "Hop ceiling reached, truncating turn");
            *truncated = true;
            history.push(Message::system(format!(
                "⚠️ 本轮处理步骤已达上限 ({})，回复可能不完整。",
                self.max_hops
            )));
            return DispatchState::Done;
        }

        verdict.directive.into()
    }

    async fn hop(&self, specialist: Specialist, history: &[Message], hop: usize) -> Message {
        debug!(hop, specialist = %specialist, "Dispatching to specialist");
        let reply = self.agent(specialist).run(history).await;

        // Routing reads the tag only, so it must name who actually answered
        if reply.author() != Some(specialist) {
            warn!(specialist = %specialist, "Reply missing identity tag, re-tagging");
            return Message::from_specialist(specialist, &reply.content);
        }
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ToolAgent;
    use crate::error::AdvisorError;
    use crate::llm::{Completion, ScriptedModel};
    use crate::models::{ToolInput, ToolOutput, TransactionIntent, TxData};
    use crate::supervisor::RuleSupervisor;
    use crate::tools::{Tool, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubTool {
        name: &'static str,
        output: ToolOutput,
    }

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &'static str {
            self.name
        }
        fn description(&self) -> &'static str {
            "stub"
        }
        async fn execute(&self, _input: &ToolInput) -> crate::Result<ToolOutput> {
            Ok(self.output.clone())
        }
    }

    fn approve_payload() -> String {
        let intent = TransactionIntent::new(
            "请在钱包确认授权 Aave 使用 WETH",
            TxData {
                to: "0xfFf9976782d46CC05630D1f6eBAb18b2324d6B14".to_string(),
                data: "0x095ea7b3".to_string(),
                value: "0".to_string(),
            },
        );
        serde_json::to_string(&intent).unwrap()
    }

    fn specialist(identity: Specialist, script: Vec<Completion>) -> (Arc<ScriptedModel>, Arc<ToolAgent>) {
        let model = Arc::new(ScriptedModel::new(script));
        let mut registry = ToolRegistry::new();
        match identity {
            Specialist::Analyst => registry.register(Arc::new(StubTool {
                name: "get_token_price",
                output: ToolOutput::text("📈 ethereum 当前价格: $3000"),
            })),
            Specialist::Executor => registry.register(Arc::new(StubTool {
                name: "approve_weth_to_aave",
                output: ToolOutput::text(approve_payload()),
            })),
        }
        let agent = ToolAgent::new(identity, model.clone(), registry, 4, Duration::from_secs(1));
        (model, Arc::new(agent))
    }

    fn graph(analyst: Arc<ToolAgent>, executor: Arc<ToolAgent>) -> DispatchGraph {
        DispatchGraph::new(Arc::new(RuleSupervisor::new()), analyst, executor, DEFAULT_MAX_HOPS)
    }

    #[tokio::test]
    async fn test_price_question_single_analyst_hop() {
        let (_, analyst) = specialist(
            Specialist::Analyst,
            vec![
                Completion::call("get_token_price", json!({"symbol": "ethereum"})),
                Completion::text("📈 ethereum 当前价格: $3000"),
            ],
        );
        let (executor_model, executor) = specialist(Specialist::Executor, vec![]);

        let mut history = Vec::new();
        let outcome = graph(analyst, executor).run_turn(&mut history, "what is the eth price").await;

        assert_eq!(outcome.answer, "📈 ethereum 当前价格: $3000");
        assert_eq!(
            outcome.trace,
            vec![
                DispatchState::Supervisor,
                DispatchState::Analyst,
                DispatchState::Supervisor,
                DispatchState::Done
            ]
        );
        assert_eq!(outcome.hops, 1);
        assert!(!outcome.truncated);
        assert!(executor_model.requests().is_empty());
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_deposit_emits_only_approval_and_stops() {
        let (analyst_model, analyst) = specialist(Specialist::Analyst, vec![]);
        let (_, executor) = specialist(
            Specialist::Executor,
            vec![Completion::call("approve_weth_to_aave", json!({}))],
        );

        let mut history = Vec::new();
        let outcome = graph(analyst, executor)
            .run_turn(&mut history, "Deposit 0.001 WETH into Aave")
            .await;

        let payload = approve_payload();
        assert!(outcome.answer.contains(&payload));
        assert_eq!(
            TransactionIntent::extract(&outcome.answer).map(|i| i.tx_data.data),
            Some("0x095ea7b3".to_string())
        );
        assert_eq!(outcome.hops, 1);
        assert!(analyst_model.requests().is_empty());
        assert_eq!(outcome.trace.last(), Some(&DispatchState::Done));
    }

    #[tokio::test]
    async fn test_malformed_transaction_passes_through_and_finishes() {
        let payload = r#"{"type":"transaction","message":"x"}"#;
        let analyst_model = Arc::new(ScriptedModel::new(vec![
            Completion::call("get_token_price", json!({"symbol": "ethereum"})),
            Completion::text("unreachable"),
        ]));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StubTool {
            name: "get_token_price",
            output: ToolOutput::text(payload),
        }));
        let analyst = Arc::new(ToolAgent::new(
            Specialist::Analyst,
            analyst_model.clone(),
            registry,
            4,
            Duration::from_secs(1),
        ));
        let (executor_model, executor) = specialist(Specialist::Executor, vec![]);

        let mut history = Vec::new();
        let outcome = graph(analyst, executor)
            .run_turn(&mut history, "check the eth price, then deposit 0.001 WETH")
            .await;

        assert_eq!(outcome.answer, payload);
        assert!(TransactionIntent::extract(&outcome.answer).is_none());
        assert_eq!(outcome.hops, 1);
        assert_eq!(
            outcome.trace,
            vec![
                DispatchState::Supervisor,
                DispatchState::Analyst,
                DispatchState::Supervisor,
                DispatchState::Done
            ]
        );
        assert_eq!(analyst_model.remaining(), 1);
        assert!(executor_model.requests().is_empty());
    }

    #[tokio::test]
    async fn test_consecutive_turns_each_use_one_analyst_hop() {
        let (analyst_model, analyst) = specialist(
            Specialist::Analyst,
            vec![
                Completion::text("ETH 约 $3000"),
                Completion::text("无常损失是指..."),
            ],
        );
        let (_, executor) = specialist(Specialist::Executor, vec![]);
        let graph = graph(analyst, executor);

        let mut history = Vec::new();
        let first = graph.run_turn(&mut history, "what is the eth price").await;
        let second = graph.run_turn(&mut history, "explain impermanent loss").await;

        assert_eq!(first.hops, 1);
        assert_eq!(second.hops, 1);
        assert_eq!(second.answer, "无常损失是指...");
        assert_eq!(analyst_model.requests().len(), 2);
        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn test_greeting_finishes_without_specialists() {
        let (analyst_model, analyst) = specialist(Specialist::Analyst, vec![]);
        let (executor_model, executor) = specialist(Specialist::Executor, vec![]);

        let mut history = Vec::new();
        let outcome = graph(analyst, executor).run_turn(&mut history, "你好").await;

        assert_eq!(outcome.answer, FALLBACK_ANSWER);
        assert_eq!(outcome.hops, 0);
        assert_eq!(outcome.trace, vec![DispatchState::Supervisor, DispatchState::Done]);
        assert!(analyst_model.requests().is_empty());
        assert!(executor_model.requests().is_empty());
    }

    struct AmbiguousSupervisor;

    #[async_trait]
    impl Supervisor for AmbiguousSupervisor {
        async fn decide(&self, _history: &[Message]) -> crate::Result<RoutingDirective> {
            Err(AdvisorError::RoutingAmbiguity("maybe the analyst?".to_string()))
        }
    }

    #[tokio::test]
    async fn test_routing_ambiguity_never_defaults_to_specialist() {
        let (analyst_model, analyst) = specialist(Specialist::Analyst, vec![]);
        let (executor_model, executor) = specialist(Specialist::Executor, vec![]);
        let graph = DispatchGraph::new(Arc::new(AmbiguousSupervisor), analyst, executor, 4);

        let mut history = Vec::new();
        let outcome = graph.run_turn(&mut history, "deposit 0.001 weth").await;

        assert!(outcome.answer.contains("Routing ambiguity"));
        assert_eq!(outcome.hops, 0);
        assert!(analyst_model.requests().is_empty());
        assert!(executor_model.requests().is_empty());
    }

    /// Alternates specialists forever; only the guard and ceiling stop it.
    struct PingPongSupervisor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Supervisor for PingPongSupervisor {
        async fn decide(&self, _history: &[Message]) -> crate::Result<RoutingDirective> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(if n % 2 == 0 {
                RoutingDirective::Analyst
            } else {
                RoutingDirective::Executor
            })
        }
    }

    #[tokio::test]
    async fn test_runaway_supervisor_is_bounded() {
        let (_, analyst) = specialist(Specialist::Analyst, vec![Completion::text("analysis")]);
        let (_, executor) = specialist(Specialist::Executor, vec![Completion::text("checked")]);
        let graph = DispatchGraph::new(
            Arc::new(PingPongSupervisor {
                calls: AtomicUsize::new(0),
            }),
            analyst,
            executor,
            4,
        );

        let mut history = Vec::new();
        let outcome = graph.run_turn(&mut history, "anything").await;

        // Third proposal (ANALYST after EXECUTOR) is overridden to FINISH
        assert_eq!(outcome.hops, 2);
        assert_eq!(outcome.answer, "analysis\n\nchecked");
        assert_eq!(outcome.trace.last(), Some(&DispatchState::Done));
    }

    #[tokio::test]
    async fn test_hop_ceiling_truncates() {
        let (_, analyst) = specialist(Specialist::Analyst, vec![Completion::text("partial")]);
        let (executor_model, executor) = specialist(Specialist::Executor, vec![]);
        let graph = DispatchGraph::new(
            Arc::new(RuleSupervisor::new()),
            analyst,
            executor,
            1,
        );

        let mut history = Vec::new();
        let outcome = graph
            .run_turn(&mut history, "check the eth price, then deposit 0.001 WETH")
            .await;

        assert!(outcome.truncated);
        assert_eq!(outcome.hops, 1);
        assert!(outcome.answer.starts_with("partial\n\n⚠️"));
        assert!(executor_model.requests().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_then_act_visits_both() {
        let (_, analyst) = specialist(Specialist::Analyst, vec![Completion::text("ETH $3000")]);
        let (_, executor) = specialist(
            Specialist::Executor,
            vec![Completion::call("approve_weth_to_aave", json!({}))],
        );

        let mut history = Vec::new();
        let outcome = graph(analyst, executor)
            .run_turn(&mut history, "check the eth price, then deposit 0.001 WETH into Aave")
            .await;

        assert_eq!(outcome.hops, 2);
        assert!(outcome.answer.starts_with("ETH $3000\n\n"));
        assert!(outcome.answer.ends_with(&approve_payload()));
    }
}
