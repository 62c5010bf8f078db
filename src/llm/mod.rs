//! Language-model abstraction
//!
//! Specialists and the LLM supervisor talk to a [`LanguageModel`]; the Gemini
//! client is the production backend and [`ScriptedModel`] replays canned
//! completions for tests.

use crate::Result;
use async_trait::async_trait;
use serde_json::Value;

pub mod gemini;
pub mod scripted;

pub use gemini::GeminiModel;
pub use scripted::ScriptedModel;

/// Function declaration offered to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub args: Value,
}

/// One entry of the model-facing transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    User(String),
    Model(String),
    ToolCall(ToolCall),
    ToolResult { name: String, content: String },
}

#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system: String,
    pub turns: Vec<ModelTurn>,
    pub tools: Vec<ToolSpec>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn call(name: impl Into<String>, args: Value) -> Self {
        Self {
            text: None,
            tool_calls: vec![ToolCall {
                name: name.into(),
                args,
            }],
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;
}
