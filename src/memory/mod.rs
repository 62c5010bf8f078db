//! Session memory
//!
//! Keyed store of ordered message logs plus the per-session lock that keeps
//! two turns of one conversation from interleaving.

pub mod postgres;
pub mod store;

pub use postgres::PostgresSessionStore;
pub use store::{ConversationHistory, InMemorySessionStore, RetentionPolicy};

use crate::config::MemorySettings;
use crate::models::Message;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

/// Session used when a caller sends no key.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Prune idle lock entries once the table grows past this.
const LOCK_TABLE_SOFT_LIMIT: usize = 1024;

#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>>;
    async fn append(&self, session_id: &str, messages: &[Message]) -> Result<()>;
    async fn clear(&self, session_id: &str) -> Result<()>;
}

/// One async mutex per session key.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other turn holds `session_id`.
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            if locks.len() > LOCK_TABLE_SOFT_LIMIT {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Postgres when a database URL is configured and reachable, otherwise memory.
pub fn build_session_store(settings: &MemorySettings) -> Arc<dyn SessionStore> {
    let policy = RetentionPolicy {
        max_messages: settings.max_messages,
        idle_ttl: settings.idle_ttl,
    };

    if let Some(url) = settings.database_url.as_deref() {
        match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(url)
        {
            Ok(pool) => {
                info!("Session memory backend: postgres");
                return Arc::new(PostgresSessionStore::new(pool, policy));
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres session backend, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Session memory backend: in-memory");
    Arc::new(InMemorySessionStore::new(policy))
}
