//! Specialist agents
//!
//! A specialist reads the full shared history, may call tools from its own
//! capability set, and produces exactly one tagged reply. Tool failures and
//! timeouts become reply text; a specialist never fails the turn.
//!
//! MODEL → TOOL CALLS → OBSERVE → MODEL → ... → REPLY

use crate::error::AdvisorError;
use crate::llm::{CompletionRequest, LanguageModel, ModelTurn, ToolCall};
use crate::models::{Message, Role, Specialist, ToolInput, ToolOutput};
use crate::tools::ToolRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub mod prompts;

#[async_trait]
pub trait Agent: Send + Sync {
    fn identity(&self) -> Specialist;

    /// Produce one reply tagged with [`Agent::identity`].
    async fn run(&self, history: &[Message]) -> Message;
}

/// Language-model specialist with a private tool registry
pub struct ToolAgent {
    identity: Specialist,
    instructions: String,
    model: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    max_tool_rounds: usize,
    tool_timeout: Duration,
}

impl ToolAgent {
    pub fn new(
        identity: Specialist,
        model: Arc<dyn LanguageModel>,
        tools: ToolRegistry,
        max_tool_rounds: usize,
        tool_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            instructions: prompts::instructions_for(identity).to_string(),
            model,
            tools,
            max_tool_rounds: max_tool_rounds.max(1),
            tool_timeout,
        }
    }

    /// Shared history as seen by this specialist: its own replies are model
    /// turns, everything else (tags kept) is user input.
    fn transcript(&self, history: &[Message]) -> Vec<ModelTurn> {
        history
            .iter()
            .map(|msg| match (msg.role, msg.author()) {
                (Role::User, _) => ModelTurn::User(msg.content.clone()),
                (_, Some(author)) if author == self.identity => {
                    ModelTurn::Model(msg.body().to_string())
                }
                (Role::System, None) => ModelTurn::User(format!("[System] {}", msg.content)),
                _ => ModelTurn::User(msg.content.clone()),
            })
            .collect()
    }

    fn reply(&self, body: &str) -> Message {
        let body = body.trim();
        let body = body
            .strip_prefix(self.identity.tag())
            .map(str::trim_start)
            .unwrap_or(body);
        Message::from_specialist(self.identity, body)
    }

    async fn invoke(&self, call: &ToolCall) -> ToolOutput {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(agent = %self.identity, tool_name = %call.name, "Model requested unknown tool");
            return ToolOutput::failure(
                AdvisorError::ToolNotFound(call.name.clone()).to_string(),
            );
        };

        let input = ToolInput {
            tool_name: call.name.clone(),
            parameters: call.args.clone(),
        };

        let start = Instant::now();
        // Broadcasting tools bound their own phases; cancelling one after
        // submission would hide the transaction hash
        let result = if tool.broadcasts() {
            Ok(tool.execute(&input).await)
        } else {
            tokio::time::timeout(self.tool_timeout, tool.execute(&input)).await
        };

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(agent = %self.identity, tool_name = %call.name, error = %e, "Tool failed");
                ToolOutput::failure(format!("❌ {} 执行失败: {}", call.name, e))
            }
            Err(_) => {
                warn!(agent = %self.identity, tool_name = %call.name, "Tool timed out");
                ToolOutput::failure(
                    AdvisorError::ToolTimeout(
                        call.name.clone(),
                        self.tool_timeout.as_millis() as u64,
                    )
                    .to_string(),
                )
            }
        };

        debug!(
            agent = %self.identity,
            tool_name = %call.name,
            success = output.success,
            duration_ms = start.elapsed().as_millis() as u64,
            "Tool call finished"
        );
        output
    }
}

#[async_trait]
impl Agent for ToolAgent {
    fn identity(&self) -> Specialist {
        self.identity
    }

    async fn run(&self, history: &[Message]) -> Message {
        let mut turns = self.transcript(history);
        let tools = self.tools.specs();

        for round in 0..self.max_tool_rounds {
            let request = CompletionRequest {
                system: self.instructions.clone(),
                turns: turns.clone(),
                tools: tools.clone(),
            };

            let completion = match self.model.complete(request).await {
                Ok(completion) => completion,
                Err(e) => {
                    warn!(agent = %self.identity, error = %e, "Model call failed");
                    return self.reply(&format!("⚠️ 暂时无法完成请求: {}", e));
                }
            };

            if completion.tool_calls.is_empty() {
                let text = completion.text.unwrap_or_default();
                if text.trim().is_empty() {
                    return self.reply("（没有可用的回复）");
                }
                return self.reply(&text);
            }

            if let Some(text) = completion.text.filter(|t| !t.trim().is_empty()) {
                turns.push(ModelTurn::Model(text));
            }

            for call in completion.tool_calls {
                turns.push(ModelTurn::ToolCall(call.clone()));
                let output = self.invoke(&call).await;

                // Raw payload goes straight to the user; no paraphrase
                if output.is_transaction() {
                    info!(agent = %self.identity, tool_name = %call.name, "Transaction intent emitted");
                    return Message::from_specialist(self.identity, &output.content);
                }

                turns.push(ModelTurn::ToolResult {
                    name: call.name.clone(),
                    content: output.content,
                });
            }

            debug!(agent = %self.identity, round = round + 1, "Tool round complete");
        }

        warn!(
            agent = %self.identity,
            max_rounds = self.max_tool_rounds,
            "Tool round limit reached"
        );
        self.reply(&format!(
            "⚠️ 工具调用次数超过上限 ({})，请换个方式提问。",
            self.max_tool_rounds
        ))
    }
}
