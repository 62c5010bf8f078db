//! Language-model supervisor
//!
//! Sends the routing policy plus the current turn to the model and accepts
//! only a bare `ANALYST` / `EXECUTOR` / `FINISH` (or `{"next": ...}`).
//! Anything else is a routing ambiguity; it is never guessed at.

use super::{turn_replies, turn_speakers, Supervisor};
use crate::classifier::{Intent, IntentClassifier};
use crate::error::AdvisorError;
use crate::llm::{CompletionRequest, LanguageModel, ModelTurn};
use crate::models::{Message, Role, RoutingDirective};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

const ROUTING_POLICY: &str = r#"你是 DeFi 理财团队的主管 (Supervisor)，团队成员：
- ANALYST: 负责行情、价格、新闻、研报知识库查询与分析，不执行任何链上操作。
- EXECUTOR: 负责钱包余额查询、WETH 授权、存入 Aave、ETH 兑换 WETH 等链上操作。

路由规则：
1. 如果最后一条消息包含 "type": "transaction"，必须回答 FINISH（等待用户在钱包确认）。
2. 如果最后一条消息来自 [Analyst]，只有当用户明确要求“先查询再执行”时才回答 EXECUTOR，否则回答 FINISH。
3. 如果最后一条消息来自 [Executor]，回答 FINISH。
4. 如果用户只是打招呼或闲聊，回答 FINISH。
5. 否则根据用户的最新指令选择 ANALYST 或 EXECUTOR。

只输出一个单词：ANALYST、EXECUTOR 或 FINISH。不要输出其他任何内容。"#;

pub struct GeminiSupervisor {
    model: Arc<dyn LanguageModel>,
}

impl GeminiSupervisor {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    fn build_request(history: &[Message]) -> CompletionRequest {
        let mut transcript = String::new();
        if let Some(user) = history.iter().rev().find(|m| m.role == Role::User) {
            transcript.push_str(&format!("[User] {}\n", user.content));
        }
        for msg in turn_replies(history) {
            transcript.push_str(&msg.content);
            transcript.push('\n');
        }

        CompletionRequest {
            system: ROUTING_POLICY.to_string(),
            turns: vec![ModelTurn::User(format!(
                "当前对话：\n{}\n下一步由谁处理？",
                transcript.trim_end()
            ))],
            tools: Vec::new(),
        }
    }
}

#[async_trait]
impl Supervisor for GeminiSupervisor {
    async fn decide(&self, history: &[Message]) -> Result<RoutingDirective> {
        if history.last().map(Message::has_transaction_intent).unwrap_or(false) {
            return Ok(RoutingDirective::Finish);
        }

        // Greetings need no model round-trip
        if turn_speakers(history).is_empty() {
            let greeting = super::latest_instruction(history)
                .map(|text| IntentClassifier::classify(text) == Intent::Greeting)
                .unwrap_or(true);
            if greeting {
                info!("Greeting detected, finishing without model call");
                return Ok(RoutingDirective::Finish);
            }
        }

        let completion = self.model.complete(Self::build_request(history)).await?;
        let raw = completion.text.unwrap_or_default();
        debug!(raw = %raw, "Supervisor model output");
        parse_directive(&raw)
    }
}

/// Strict directive parser
///
/// Accepts the bare token (case, surrounding quotes, punctuation and code
/// fences are ignored) or a JSON object `{"next": "<TOKEN>"}`.
pub fn parse_directive(raw: &str) -> Result<RoutingDirective> {
    let trimmed = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
            if let Some(next) = value.get("next").and_then(|v| v.as_str()) {
                return token(next).ok_or_else(|| ambiguity(raw));
            }
        }
        return Err(ambiguity(raw));
    }

    token(trimmed).ok_or_else(|| ambiguity(raw))
}

fn token(raw: &str) -> Option<RoutingDirective> {
    let cleaned = raw
        .trim_matches(|c: char| !c.is_ascii_alphabetic())
        .to_ascii_uppercase();
    match cleaned.as_str() {
        "ANALYST" => Some(RoutingDirective::Analyst),
        "EXECUTOR" => Some(RoutingDirective::Executor),
        "FINISH" => Some(RoutingDirective::Finish),
        _ => None,
    }
}

fn ambiguity(raw: &str) -> AdvisorError {
    AdvisorError::RoutingAmbiguity(raw.trim().chars().take(200).collect())
}
