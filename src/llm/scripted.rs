//! Scripted language model (offline, deterministic)
//!
//! Replays a queue of completions in order and keeps every request it saw.

use super::{Completion, CompletionRequest, LanguageModel};
use crate::error::AdvisorError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<crate::Result<Completion>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new(completions: Vec<Completion>) -> Self {
        Self {
            script: Mutex::new(completions.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a failure as the next completion.
    pub fn push_error(&self, message: &str) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(AdvisorError::LlmError(message.to_string())));
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> crate::Result<Completion> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        self.script
            .lock()
            .map_err(|_| AdvisorError::LlmError("script lock poisoned".to_string()))?
            .pop_front()
            .unwrap_or_else(|| Err(AdvisorError::LlmError("script exhausted".to_string())))
    }
}
