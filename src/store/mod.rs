//! Session and message persistence
//!
//! `ConversationStore` is the document-store seam: sessions keyed by id,
//! messages keyed by session id. The in-memory backend is the default and the
//! test double; the Postgres backend is used whenever a database URL is set.

pub mod postgres;

pub use postgres::PostgresConversationStore;

use crate::error::EngineError;
use crate::models::{Message, NewMessage, Session, SessionStatus, ToolOutcome, TurnRecord};
use crate::Result;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for session + message persistence
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    /// Insert a new session row. Returns false if the id is already taken.
    async fn insert_session(&self, session: &Session) -> Result<bool>;

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>>;

    /// Refresh `last_activity_at`; returns the updated row if it exists.
    async fn touch_session(&self, session_id: &str) -> Result<Option<Session>>;

    async fn set_session_status(&self, session_id: &str, status: SessionStatus) -> Result<bool>;

    /// Sessions of an owner, most recent activity first.
    async fn list_sessions(&self, owner_id: &str, kind: Option<&str>) -> Result<Vec<Session>>;

    /// Write a message and bump the session counters in one atomic step.
    /// Fails with `UnknownSession` when the session row is missing.
    async fn append_message(&self, message: NewMessage) -> Result<Message>;

    /// Most recent `limit` messages, oldest first.
    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>>;

    /// Messages tagged with `metadata.turn_id == turn_id`, oldest first.
    async fn turn_messages(&self, session_id: &str, turn_id: &str) -> Result<Vec<Message>>;

    async fn count_messages(&self, session_id: &str) -> Result<u64>;

    /// Delete everything but the newest `keep` messages; returns how many were removed.
    async fn retain_latest(&self, session_id: &str, keep: usize) -> Result<u64>;

    /// Delete all messages and reset the session's message count.
    /// Turn records survive.
    async fn clear_messages(&self, session_id: &str) -> Result<()>;

    /// Add one executed tool result to the turn's record, creating it if needed.
    async fn record_tool_outcome(&self, session_id: &str, turn_id: &str, outcome: &ToolOutcome) -> Result<()>;

    /// Mark the turn complete with its assistant reply.
    async fn record_reply(&self, session_id: &str, turn_id: &str, reply: &str) -> Result<()>;

    /// The turn's record; never touched by `retain_latest` or `clear_messages`.
    async fn turn_record(&self, session_id: &str, turn_id: &str) -> Result<Option<TurnRecord>>;
}

struct SessionSlot {
    session: Session,
    next_seq: i64,
    messages: VecDeque<Message>,
    turns: HashMap<String, TurnRecord>,
}

/// In-memory conversation store for development and tests
pub struct InMemoryConversationStore {
    sessions: Arc<RwLock<HashMap<String, SessionSlot>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown(session_id: &str) -> EngineError {
    EngineError::UnknownSession(session_id.to_string())
}

#[async_trait::async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn insert_session(&self, session: &Session) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.session_id) {
            return Ok(false);
        }

        sessions.insert(
            session.session_id.clone(),
            SessionSlot {
                session: session.clone(),
                next_seq: 1,
                messages: VecDeque::new(),
                turns: HashMap::new(),
            },
        );
        Ok(true)
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).map(|slot| slot.session.clone()))
    }

    async fn touch_session(&self, session_id: &str) -> Result<Option<Session>> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.get_mut(session_id).map(|slot| {
            slot.session.last_activity_at = slot.session.last_activity_at.max(Utc::now());
            slot.session.clone()
        }))
    }

    async fn set_session_status(&self, session_id: &str, status: SessionStatus) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(slot) => {
                slot.session.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_sessions(&self, owner_id: &str, kind: Option<&str>) -> Result<Vec<Session>> {
        let sessions = self.sessions.read().await;

        let mut items: Vec<Session> = sessions
            .values()
            .map(|slot| &slot.session)
            .filter(|s| s.owner_id == owner_id)
            .filter(|s| kind.map_or(true, |k| s.kind == k))
            .cloned()
            .collect();

        items.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(items)
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message> {
        let mut sessions = self.sessions.write().await;
        let slot = sessions
            .get_mut(&message.session_id)
            .ok_or_else(|| unknown(&message.session_id))?;

        // Clamp so timestamps never go backwards within a session.
        let timestamp = slot.session.last_activity_at.max(Utc::now());
        let seq = slot.next_seq;

        let stored = Message {
            message_id: Uuid::new_v4(),
            session_id: message.session_id,
            seq,
            role: message.role,
            content: message.content,
            timestamp,
            metadata: message.metadata,
        };

        slot.next_seq += 1;
        slot.session.message_count += 1;
        slot.session.last_activity_at = timestamp;
        slot.messages.push_back(stored.clone());

        Ok(stored)
    }

    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>> {
        let sessions = self.sessions.read().await;
        let slot = sessions.get(session_id).ok_or_else(|| unknown(session_id))?;

        let skip = slot.messages.len().saturating_sub(limit);
        Ok(slot.messages.iter().skip(skip).cloned().collect())
    }

    async fn turn_messages(&self, session_id: &str, turn_id: &str) -> Result<Vec<Message>> {
        let sessions = self.sessions.read().await;
        let slot = sessions.get(session_id).ok_or_else(|| unknown(session_id))?;

        Ok(slot
            .messages
            .iter()
            .filter(|m| m.meta_str(crate::models::meta::TURN_ID) == Some(turn_id))
            .cloned()
            .collect())
    }

    async fn count_messages(&self, session_id: &str) -> Result<u64> {
        let sessions = self.sessions.read().await;
        let slot = sessions.get(session_id).ok_or_else(|| unknown(session_id))?;
        Ok(slot.messages.len() as u64)
    }

    async fn retain_latest(&self, session_id: &str, keep: usize) -> Result<u64> {
        let mut sessions = self.sessions.write().await;
        let slot = sessions.get_mut(session_id).ok_or_else(|| unknown(session_id))?;

        let excess = slot.messages.len().saturating_sub(keep);
        slot.messages.drain(..excess);
        Ok(excess as u64)
    }

    async fn clear_messages(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let slot = sessions.get_mut(session_id).ok_or_else(|| unknown(session_id))?;

        slot.messages.clear();
        slot.session.message_count = 0;
        Ok(())
    }

    async fn record_tool_outcome(&self, session_id: &str, turn_id: &str, outcome: &ToolOutcome) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let slot = sessions.get_mut(session_id).ok_or_else(|| unknown(session_id))?;

        slot.turns
            .entry(turn_id.to_string())
            .or_insert_with(|| TurnRecord::new(turn_id))
            .tool_outcomes
            .push(outcome.clone());
        Ok(())
    }

    async fn record_reply(&self, session_id: &str, turn_id: &str, reply: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let slot = sessions.get_mut(session_id).ok_or_else(|| unknown(session_id))?;

        slot.turns
            .entry(turn_id.to_string())
            .or_insert_with(|| TurnRecord::new(turn_id))
            .reply = Some(reply.to_string());
        Ok(())
    }

    async fn turn_record(&self, session_id: &str, turn_id: &str) -> Result<Option<TurnRecord>> {
        let sessions = self.sessions.read().await;
        let slot = sessions.get(session_id).ok_or_else(|| unknown(session_id))?;
        Ok(slot.turns.get(turn_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{meta, MessageRole};

    async fn store_with_session(id: &str) -> InMemoryConversationStore {
        let store = InMemoryConversationStore::new();
        store
            .insert_session(&Session::new(id.to_string(), "u1", "finance"))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_duplicate_session_rejected() {
        let store = store_with_session("s1").await;
        let again = store
            .insert_session(&Session::new("s1".to_string(), "u2", "hr"))
            .await
            .unwrap();
        assert!(!again);
        assert_eq!(store.find_session("s1").await.unwrap().unwrap().owner_id, "u1");
    }

    #[tokio::test]
    async fn test_append_assigns_sequence_and_counts() {
        let store = store_with_session("s1").await;
        let a = store
            .append_message(NewMessage::new("s1", MessageRole::User, "one"))
            .await
            .unwrap();
        let b = store
            .append_message(NewMessage::new("s1", MessageRole::Assistant, "two"))
            .await
            .unwrap();

        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
        assert!(b.timestamp >= a.timestamp);

        let session = store.find_session("s1").await.unwrap().unwrap();
        assert_eq!(session.message_count, 2);
        assert_eq!(session.last_activity_at, b.timestamp);
    }

    #[tokio::test]
    async fn test_append_to_unknown_session_fails() {
        let store = InMemoryConversationStore::new();
        let err = store
            .append_message(NewMessage::new("missing", MessageRole::User, "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownSession(_)));
    }

    #[tokio::test]
    async fn test_retain_latest_drops_oldest() {
        let store = store_with_session("s1").await;
        for i in 0..5 {
            store
                .append_message(NewMessage::new("s1", MessageRole::User, format!("m{}", i)))
                .await
                .unwrap();
        }

        assert_eq!(store.retain_latest("s1", 2).await.unwrap(), 3);
        assert_eq!(store.retain_latest("s1", 2).await.unwrap(), 0);

        let kept: Vec<String> = store
            .recent_messages("s1", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(kept, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn test_turn_messages_filter() {
        let store = store_with_session("s1").await;
        store
            .append_message(NewMessage::new("s1", MessageRole::User, "a").with_meta(meta::TURN_ID, "t1"))
            .await
            .unwrap();
        store
            .append_message(NewMessage::new("s1", MessageRole::User, "b").with_meta(meta::TURN_ID, "t2"))
            .await
            .unwrap();

        let t1 = store.turn_messages("s1", "t1").await.unwrap();
        assert_eq!(t1.len(), 1);
        assert_eq!(t1[0].content, "a");
    }

    #[tokio::test]
    async fn test_list_sessions_by_owner_and_kind() {
        let store = store_with_session("s1").await;
        store
            .insert_session(&Session::new("s2".to_string(), "u1", "hr"))
            .await
            .unwrap();
        store
            .insert_session(&Session::new("s3".to_string(), "u2", "finance"))
            .await
            .unwrap();

        assert_eq!(store.list_sessions("u1", None).await.unwrap().len(), 2);
        let finance = store.list_sessions("u1", Some("finance")).await.unwrap();
        assert_eq!(finance.len(), 1);
        assert_eq!(finance[0].session_id, "s1");
    }

    #[tokio::test]
    async fn test_turn_records_survive_trim_and_clear() {
        let store = store_with_session("s1").await;
        let outcome = ToolOutcome {
            tool_name: "addExpense".into(),
            arguments: serde_json::json!({"amount": 5}),
            status: crate::models::ToolStatus::Success,
            output: serde_json::json!("Recorded"),
            error: None,
            invocation_key: "k1".into(),
            invoked_at: Utc::now(),
            replayed: false,
        };
        store.record_tool_outcome("s1", "t1", &outcome).await.unwrap();
        assert!(!store.turn_record("s1", "t1").await.unwrap().unwrap().is_complete());

        store.record_reply("s1", "t1", "Done.").await.unwrap();
        store.retain_latest("s1", 0).await.unwrap();
        store.clear_messages("s1").await.unwrap();

        let record = store.turn_record("s1", "t1").await.unwrap().unwrap();
        assert_eq!(record.reply.as_deref(), Some("Done."));
        assert_eq!(record.tool_outcomes[0].invocation_key, "k1");
        assert!(store.turn_record("s1", "t2").await.unwrap().is_none());
        assert!(matches!(
            store.record_reply("nope", "t1", "x").await,
            Err(EngineError::UnknownSession(_))
        ));
    }
}
