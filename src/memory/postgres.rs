//! Postgres-backed session logs (survive restarts)

use super::store::RetentionPolicy;
use super::SessionStore;
use crate::error::AdvisorError;
use crate::models::{Message, Role};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;
use uuid::Uuid;

pub struct PostgresSessionStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
    policy: RetentionPolicy,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool, policy: RetentionPolicy) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
            policy,
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS session_messages (
                      seq BIGSERIAL PRIMARY KEY,
                      message_id UUID NOT NULL UNIQUE,
                      session_id TEXT NOT NULL,
                      role TEXT NOT NULL,
                      content TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_session_messages_session_seq
                    ON session_messages (session_id, seq);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                AdvisorError::DatabaseError(format!(
                    "Failed to initialize session schema: {}",
                    e
                ))
            })?;

        Ok(())
    }
}

fn db_error(action: &str) -> impl Fn(sqlx::Error) -> AdvisorError + '_ {
    move |e| AdvisorError::DatabaseError(format!("Failed to {}: {}", action, e))
}

#[async_trait::async_trait]
impl SessionStore for PostgresSessionStore {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT message_id, role, content, created_at
            FROM session_messages
            WHERE session_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("load session history"))?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let role: String = row.try_get("role").map_err(db_error("read role"))?;
            let created_at: DateTime<Utc> =
                row.try_get("created_at").map_err(db_error("read created_at"))?;
            let message_id: Uuid = row.try_get("message_id").map_err(db_error("read id"))?;

            messages.push(Message {
                message_id,
                timestamp: created_at,
                role: Role::parse(&role).unwrap_or(Role::System),
                content: row.try_get("content").map_err(db_error("read content"))?,
            });
        }

        if let Some(last) = messages.last() {
            if self.policy.is_expired(last.timestamp, Utc::now()) {
                debug!(session_id = %session_id, "Session expired, clearing");
                self.clear(session_id).await?;
                return Ok(Vec::new());
            }
        }

        Ok(messages)
    }

    async fn append(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        self.ensure_schema().await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("begin session transaction"))?;

        for msg in messages {
            sqlx::query(
                r#"
                INSERT INTO session_messages (message_id, session_id, role, content, created_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(msg.message_id)
            .bind(session_id)
            .bind(msg.role.as_str())
            .bind(&msg.content)
            .bind(msg.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(db_error("insert session message"))?;
        }

        if let Some(max) = self.policy.max_messages {
            // Keep the newest `max` rows, then drop leading non-user rows
            sqlx::query(
                r#"
                DELETE FROM session_messages
                WHERE session_id = $1
                  AND seq < COALESCE((
                    SELECT MIN(seq) FROM session_messages
                    WHERE session_id = $1 AND role = 'user'
                      AND seq >= (
                        SELECT MIN(seq) FROM (
                          SELECT seq FROM session_messages
                          WHERE session_id = $1
                          ORDER BY seq DESC
                          LIMIT $2
                        ) newest
                      )
                  ), 0)
                "#,
            )
            .bind(session_id)
            .bind(max as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_error("trim session history"))?;
        }

        tx.commit()
            .await
            .map_err(db_error("commit session transaction"))?;

        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query("DELETE FROM session_messages WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("clear session history"))?;
        Ok(())
    }
}
