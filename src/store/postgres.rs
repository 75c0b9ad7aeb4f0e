//! Postgres-backed conversation store
//!
//! Schema is created lazily on first use. Appends run in a transaction whose
//! first statement row-locks the session, so concurrent writers to one session
//! are serialized and sequence numbers never collide.

use crate::error::EngineError;
use crate::models::{
    meta, Message, MessageRole, Metadata, NewMessage, Session, SessionStatus, ToolOutcome, TurnRecord,
};
use crate::store::ConversationStore;
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;
use uuid::Uuid;

const SESSION_COLUMNS: &str =
    "session_id, owner_id, kind, created_at, last_activity_at, message_count, status";
const MESSAGE_COLUMNS: &str = "message_id, session_id, seq, role, content, metadata, created_at";

pub struct PostgresConversationStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresConversationStore {
    /// Build a lazily-connecting pool; no connection is attempted until first use.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| {
                EngineError::Config(format!("Invalid database URL for conversation store: {}", e))
            })?;

        info!("Conversation store backend: postgres");
        Ok(Self::with_pool(pool))
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS chat_sessions (
                      session_id TEXT PRIMARY KEY,
                      owner_id TEXT NOT NULL,
                      kind TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL,
                      last_activity_at TIMESTAMPTZ NOT NULL,
                      message_count BIGINT NOT NULL DEFAULT 0,
                      next_seq BIGINT NOT NULL DEFAULT 1,
                      status TEXT NOT NULL DEFAULT 'active'
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_chat_sessions_owner
                    ON chat_sessions (owner_id, kind, last_activity_at DESC);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS chat_messages (
                      message_id UUID PRIMARY KEY,
                      session_id TEXT NOT NULL REFERENCES chat_sessions (session_id),
                      seq BIGINT NOT NULL,
                      role TEXT NOT NULL,
                      content TEXT NOT NULL,
                      metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
                      created_at TIMESTAMPTZ NOT NULL,
                      UNIQUE (session_id, seq)
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS chat_turns (
                      session_id TEXT NOT NULL REFERENCES chat_sessions (session_id),
                      turn_id TEXT NOT NULL,
                      tool_outcomes JSONB NOT NULL DEFAULT '[]'::jsonb,
                      reply TEXT,
                      completed_at TIMESTAMPTZ,
                      PRIMARY KEY (session_id, turn_id)
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_chat_messages_session_time
                    ON chat_messages (session_id, created_at, seq);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                EngineError::StoreUnavailable(format!(
                    "Failed to initialize conversation store schema: {}",
                    e
                ))
            })?;

        Ok(())
    }

    async fn require_session(&self, session_id: &str) -> Result<()> {
        if self.find_session(session_id).await?.is_none() {
            return Err(EngineError::UnknownSession(session_id.to_string()));
        }
        Ok(())
    }
}

fn session_from_row(row: &PgRow) -> Result<Session> {
    let status: String = row.try_get("status")?;
    let message_count: i64 = row.try_get("message_count")?;

    Ok(Session {
        session_id: row.try_get("session_id")?,
        owner_id: row.try_get("owner_id")?,
        kind: row.try_get("kind")?,
        created_at: row.try_get("created_at")?,
        last_activity_at: row.try_get("last_activity_at")?,
        message_count: message_count.max(0) as u64,
        status: SessionStatus::from_db(&status),
    })
}

fn message_from_row(row: &PgRow) -> Result<Message> {
    let role: String = row.try_get("role")?;
    let Json(metadata): Json<Metadata> = row.try_get("metadata")?;

    Ok(Message {
        message_id: row.try_get("message_id")?,
        session_id: row.try_get("session_id")?,
        seq: row.try_get("seq")?,
        role: MessageRole::from_db(&role),
        content: row.try_get("content")?,
        timestamp: row.try_get("created_at")?,
        metadata,
    })
}

#[async_trait::async_trait]
impl ConversationStore for PostgresConversationStore {
    async fn insert_session(&self, session: &Session) -> Result<bool> {
        self.ensure_schema().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO chat_sessions
              (session_id, owner_id, kind, created_at, last_activity_at, message_count, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.owner_id)
        .bind(&session.kind)
        .bind(session.created_at)
        .bind(session.last_activity_at)
        .bind(session.message_count as i64)
        .bind(session.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>> {
        self.ensure_schema().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM chat_sessions WHERE session_id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn touch_session(&self, session_id: &str) -> Result<Option<Session>> {
        self.ensure_schema().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE chat_sessions
            SET last_activity_at = GREATEST(last_activity_at, NOW())
            WHERE session_id = $1
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn set_session_status(&self, session_id: &str, status: SessionStatus) -> Result<bool> {
        self.ensure_schema().await?;

        let result = sqlx::query("UPDATE chat_sessions SET status = $2 WHERE session_id = $1")
            .bind(session_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_sessions(&self, owner_id: &str, kind: Option<&str>) -> Result<Vec<Session>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM chat_sessions
            WHERE owner_id = $1 AND ($2::TEXT IS NULL OR kind = $2)
            ORDER BY last_activity_at DESC
            "#,
            SESSION_COLUMNS
        ))
        .bind(owner_id)
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(session_from_row).collect()
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message> {
        self.ensure_schema().await?;

        let mut tx = self.pool.begin().await?;

        let counters = sqlx::query(
            r#"
            UPDATE chat_sessions
            SET message_count = message_count + 1,
                next_seq = next_seq + 1,
                last_activity_at = GREATEST(last_activity_at, NOW())
            WHERE session_id = $1
            RETURNING next_seq - 1 AS seq, last_activity_at
            "#,
        )
        .bind(&message.session_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(counters) = counters else {
            return Err(EngineError::UnknownSession(message.session_id));
        };

        let seq: i64 = counters.try_get("seq")?;
        let timestamp: DateTime<Utc> = counters.try_get("last_activity_at")?;
        let message_id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO chat_messages
              (message_id, session_id, seq, role, content, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(message_id)
        .bind(&message.session_id)
        .bind(seq)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(Json(&message.metadata))
        .bind(timestamp)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Message {
            message_id,
            session_id: message.session_id,
            seq,
            role: message.role,
            content: message.content,
            timestamp,
            metadata: message.metadata,
        })
    }

    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>> {
        self.require_session(session_id).await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {cols} FROM (
              SELECT {cols} FROM chat_messages
              WHERE session_id = $1
              ORDER BY created_at DESC, seq DESC
              LIMIT $2
            ) recent
            ORDER BY created_at ASC, seq ASC
            "#,
            cols = MESSAGE_COLUMNS
        ))
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn turn_messages(&self, session_id: &str, turn_id: &str) -> Result<Vec<Message>> {
        self.require_session(session_id).await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM chat_messages
            WHERE session_id = $1 AND metadata ->> '{}' = $2
            ORDER BY created_at ASC, seq ASC
            "#,
            MESSAGE_COLUMNS,
            meta::TURN_ID
        ))
        .bind(session_id)
        .bind(turn_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn count_messages(&self, session_id: &str) -> Result<u64> {
        self.require_session(session_id).await?;

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE session_id = $1")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count.max(0) as u64)
    }

    async fn retain_latest(&self, session_id: &str, keep: usize) -> Result<u64> {
        self.require_session(session_id).await?;

        let result = sqlx::query(
            r#"
            DELETE FROM chat_messages
            WHERE session_id = $1
              AND message_id NOT IN (
                SELECT message_id FROM chat_messages
                WHERE session_id = $1
                ORDER BY created_at DESC, seq DESC
                LIMIT $2
              )
            "#,
        )
        .bind(session_id)
        .bind(keep as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn clear_messages(&self, session_id: &str) -> Result<()> {
        self.ensure_schema().await?;

        let mut tx = self.pool.begin().await?;

        let reset = sqlx::query("UPDATE chat_sessions SET message_count = 0 WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        if reset.rows_affected() == 0 {
            return Err(EngineError::UnknownSession(session_id.to_string()));
        }

        sqlx::query("DELETE FROM chat_messages WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn record_tool_outcome(&self, session_id: &str, turn_id: &str, outcome: &ToolOutcome) -> Result<()> {
        self.require_session(session_id).await?;

        sqlx::query(
            r#"
            INSERT INTO chat_turns (session_id, turn_id, tool_outcomes)
            VALUES ($1, $2, jsonb_build_array($3::jsonb))
            ON CONFLICT (session_id, turn_id)
            DO UPDATE SET tool_outcomes = chat_turns.tool_outcomes || EXCLUDED.tool_outcomes
            "#,
        )
        .bind(session_id)
        .bind(turn_id)
        .bind(Json(outcome))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_reply(&self, session_id: &str, turn_id: &str, reply: &str) -> Result<()> {
        self.require_session(session_id).await?;

        sqlx::query(
            r#"
            INSERT INTO chat_turns (session_id, turn_id, reply, completed_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (session_id, turn_id)
            DO UPDATE SET reply = EXCLUDED.reply, completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(session_id)
        .bind(turn_id)
        .bind(reply)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn turn_record(&self, session_id: &str, turn_id: &str) -> Result<Option<TurnRecord>> {
        self.require_session(session_id).await?;

        let row = sqlx::query(
            "SELECT tool_outcomes, reply FROM chat_turns WHERE session_id = $1 AND turn_id = $2",
        )
        .bind(session_id)
        .bind(turn_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let Json(tool_outcomes): Json<Vec<ToolOutcome>> = row.try_get("tool_outcomes")?;

        Ok(Some(TurnRecord {
            turn_id: turn_id.to_string(),
            tool_outcomes,
            reply: row.try_get("reply")?,
        }))
    }
}
