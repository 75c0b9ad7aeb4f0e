//! Conversation history with count-bounded retention
//!
//! Every append is followed by a synchronous trim, so a concurrent reader never
//! sees more than `max_history_length` messages for a session.

use crate::error::{within, EngineError};
use crate::models::{Message, MessageRole, Metadata, NewMessage, ToolOutcome, TurnRecord};
use crate::store::ConversationStore;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct HistoryStore {
    store: Arc<dyn ConversationStore>,
    max_history_length: usize,
    timeout: Duration,
}

impl HistoryStore {
    pub fn new(store: Arc<dyn ConversationStore>, max_history_length: usize, timeout: Duration) -> Self {
        Self {
            store,
            max_history_length: max_history_length.max(1),
            timeout,
        }
    }

    pub fn max_history_length(&self) -> usize {
        self.max_history_length
    }

    async fn bounded<T, F>(&self, what: &'static str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let limit = self.timeout;
        within(limit, fut, || {
            EngineError::StoreUnavailable(format!("{} timed out after {:?}", what, limit))
        })
        .await
    }

    /// Append a message, bump session accounting, then enforce retention.
    pub async fn append(
        &self,
        session_id: &str,
        role: MessageRole,
        content: impl Into<String>,
        metadata: Metadata,
    ) -> Result<Message> {
        let message = NewMessage {
            session_id: session_id.to_string(),
            role,
            content: content.into(),
            metadata,
        };

        let stored = self
            .bounded("history append", self.store.append_message(message))
            .await?;
        self.trim(session_id).await?;

        Ok(stored)
    }

    /// Most recent `limit` messages (default: the retention bound), oldest first.
    pub async fn read(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<Message>> {
        let limit = limit.unwrap_or(self.max_history_length);
        self.bounded("history read", self.store.recent_messages(session_id, limit))
            .await
    }

    /// Delete the oldest excess messages in one batch. Idempotent.
    pub async fn trim(&self, session_id: &str) -> Result<u64> {
        let removed = self
            .bounded(
                "history trim",
                self.store.retain_latest(session_id, self.max_history_length),
            )
            .await?;

        if removed > 0 {
            debug!(session_id = %session_id, removed, "Trimmed conversation history");
        }
        Ok(removed)
    }

    /// Remove all messages; the session itself survives.
    pub async fn clear(&self, session_id: &str) -> Result<()> {
        self.bounded("history clear", self.store.clear_messages(session_id))
            .await
    }

    pub async fn count(&self, session_id: &str) -> Result<u64> {
        self.bounded("history count", self.store.count_messages(session_id))
            .await
    }

    /// Messages already written for one turn (used to detect retries).
    pub async fn turn_messages(&self, session_id: &str, turn_id: &str) -> Result<Vec<Message>> {
        self.bounded("turn lookup", self.store.turn_messages(session_id, turn_id))
            .await
    }

    pub async fn record_tool_outcome(&self, session_id: &str, turn_id: &str, outcome: &ToolOutcome) -> Result<()> {
        self.bounded(
            "turn record write",
            self.store.record_tool_outcome(session_id, turn_id, outcome),
        )
        .await
    }

    pub async fn record_reply(&self, session_id: &str, turn_id: &str, reply: &str) -> Result<()> {
        self.bounded("turn record write", self.store.record_reply(session_id, turn_id, reply))
            .await
    }

    /// What an earlier attempt of the turn executed, even if trimming removed its messages.
    pub async fn turn_record(&self, session_id: &str, turn_id: &str) -> Result<Option<TurnRecord>> {
        self.bounded("turn record lookup", self.store.turn_record(session_id, turn_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Session;
    use crate::store::InMemoryConversationStore;

    async fn history(max: usize) -> (HistoryStore, Arc<InMemoryConversationStore>) {
        let store = Arc::new(InMemoryConversationStore::new());
        store
            .insert_session(&Session::new("s1".to_string(), "u1", "finance"))
            .await
            .unwrap();
        let history = HistoryStore::new(store.clone(), max, Duration::from_secs(1));
        (history, store)
    }

    #[tokio::test]
    async fn test_windowing_keeps_last_messages_in_order() {
        let (history, _) = history(3).await;
        for i in 0..5 {
            history
                .append("s1", MessageRole::User, format!("m{}", i), Metadata::new())
                .await
                .unwrap();
        }

        let messages = history.read("s1", Some(10)).await.unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_history_bound_and_ordering_hold_after_many_appends() {
        let (history, _) = history(4).await;
        for i in 0..25 {
            let role = if i % 2 == 0 { MessageRole::User } else { MessageRole::Assistant };
            history
                .append("s1", role, format!("m{}", i), Metadata::new())
                .await
                .unwrap();
            assert!(history.count("s1").await.unwrap() <= 4);
        }

        let messages = history.read("s1", Some(100)).await.unwrap();
        assert_eq!(messages.len(), 4);
        assert!(messages
            .windows(2)
            .all(|w| (w[0].timestamp, w[0].seq) <= (w[1].timestamp, w[1].seq)));
    }

    #[tokio::test]
    async fn test_trim_is_idempotent() {
        let (history, store) = history(2).await;
        for i in 0..4 {
            store
                .append_message(NewMessage::new("s1", MessageRole::User, format!("m{}", i)))
                .await
                .unwrap();
        }

        assert_eq!(history.trim("s1").await.unwrap(), 2);
        let first: Vec<_> = history.read("s1", Some(10)).await.unwrap().into_iter().map(|m| m.message_id).collect();
        assert_eq!(history.trim("s1").await.unwrap(), 0);
        let second: Vec<_> = history.read("s1", Some(10)).await.unwrap().into_iter().map(|m| m.message_id).collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_clear_keeps_session() {
        let (history, store) = history(5).await;
        history
            .append("s1", MessageRole::User, "hello", Metadata::new())
            .await
            .unwrap();
        history.clear("s1").await.unwrap();

        assert!(history.read("s1", None).await.unwrap().is_empty());
        let session = store.find_session("s1").await.unwrap().unwrap();
        assert_eq!(session.message_count, 0);

        history
            .append("s1", MessageRole::User, "again", Metadata::new())
            .await
            .unwrap();
        assert_eq!(history.count("s1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let (history, _) = history(5).await;
        let err = history
            .append("nope", MessageRole::User, "x", Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownSession(_)));
    }

    #[tokio::test]
    async fn test_store_timeout_is_store_unavailable() {
        let history = HistoryStore::new(
            Arc::new(crate::testing::StalledStore),
            5,
            Duration::from_millis(20),
        );
        let err = history.read("s1", None).await.unwrap_err();
        assert!(matches!(err, EngineError::StoreUnavailable(_)));
    }
}
