//! In-memory session logs
//!
//! Each session owns an ordered, append-only message log. Retention is
//! applied between turns, never inside one.

use super::SessionStore;
use crate::models::{Message, Role};
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// How much history a session keeps. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Keep at most this many messages, cut on a user-turn boundary
    pub max_messages: Option<usize>,
    /// Forget a session idle for longer than this
    pub idle_ttl: Option<Duration>,
}

impl RetentionPolicy {
    pub fn is_expired(&self, last_active: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.idle_ttl {
            Some(ttl) => {
                let idle = now.signed_duration_since(last_active);
                idle.to_std().map(|idle| idle > ttl).unwrap_or(false)
            }
            None => false,
        }
    }
}

/// Conversation log for one session
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    messages: VecDeque<Message>,
}

impl ConversationHistory {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            messages: VecDeque::new(),
        }
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push_back(message);
        self.updated_at = Utc::now();
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Keep roughly the last `keep_count` messages, starting at a user message.
    pub fn trim_to_recent(&mut self, keep_count: usize) {
        if self.messages.len() <= keep_count {
            return;
        }

        while self.messages.len() > keep_count {
            self.messages.pop_front();
        }

        // Never start the log in the middle of a turn
        if let Some(first_user) = self.messages.iter().position(|m| m.role == Role::User) {
            self.messages.drain(..first_user);
        }

        self.updated_at = Utc::now();
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.updated_at = Utc::now();
    }
}

pub struct InMemorySessionStore {
    histories: Arc<RwLock<HashMap<String, ConversationHistory>>>,
    policy: RetentionPolicy,
}

impl InMemorySessionStore {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            histories: Arc::new(RwLock::new(HashMap::new())),
            policy,
        }
    }

    pub async fn session_count(&self) -> usize {
        self.histories.read().await.len()
    }

    fn evict_expired(&self, histories: &mut HashMap<String, ConversationHistory>) {
        if self.policy.idle_ttl.is_none() {
            return;
        }
        let now = Utc::now();
        let before = histories.len();
        histories.retain(|_, history| !self.policy.is_expired(history.updated_at, now));
        let evicted = before - histories.len();
        if evicted > 0 {
            debug!(evicted, remaining = histories.len(), "Evicted idle sessions");
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>> {
        let expired = {
            let histories = self.histories.read().await;
            match histories.get(session_id) {
                Some(history) => {
                    if !self.policy.is_expired(history.updated_at, Utc::now()) {
                        return Ok(history.messages().cloned().collect());
                    }
                    true
                }
                None => false,
            }
        };

        if expired {
            debug!(session_id = %session_id, "Session expired, starting fresh");
            self.histories.write().await.remove(session_id);
        }
        Ok(Vec::new())
    }

    async fn append(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        let mut histories = self.histories.write().await;
        self.evict_expired(&mut histories);
        let history = histories
            .entry(session_id.to_string())
            .or_insert_with(|| ConversationHistory::new(session_id));

        for message in messages {
            history.add_message(message.clone());
        }
        if let Some(max) = self.policy.max_messages {
            history.trim_to_recent(max);
        }
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        if let Some(history) = self.histories.write().await.get_mut(session_id) {
            history.clear();
        }
        Ok(())
    }
}
