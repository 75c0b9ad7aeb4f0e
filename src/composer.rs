//! Response composition
//!
//! Writes a turn's results to the history and returns them with the reply
//! kept apart from tool output. Tool messages go first; the assistant reply is
//! written last and marks the turn as complete. Each write is mirrored into the
//! turn record, which history trimming never touches.

use crate::memory::HistoryStore;
use crate::models::{meta, FinalResponse, MessageRole, Metadata, ToolOutcome};
use crate::Result;
use serde_json::Value;
use tracing::debug;

#[derive(Clone)]
pub struct ResponseComposer {
    history: HistoryStore,
}

impl ResponseComposer {
    pub fn new(history: HistoryStore) -> Self {
        Self { history }
    }

    pub async fn compose(
        &self,
        session_id: &str,
        turn_id: &str,
        visible_text: &str,
        outcomes: Vec<ToolOutcome>,
    ) -> Result<FinalResponse> {
        for outcome in outcomes.iter().filter(|o| !o.replayed) {
            self.history
                .append(
                    session_id,
                    MessageRole::Tool,
                    outcome.transcript_text(),
                    tool_metadata(turn_id, outcome),
                )
                .await?;
            self.history
                .record_tool_outcome(session_id, turn_id, outcome)
                .await?;
        }

        self.history
            .append(
                session_id,
                MessageRole::Assistant,
                visible_text,
                turn_metadata(turn_id, meta::TYPE_REPLY),
            )
            .await?;
        self.history.record_reply(session_id, turn_id, visible_text).await?;

        debug!(
            session_id = %session_id,
            turn_id = %turn_id,
            tool_outputs = outcomes.len(),
            "Composed response"
        );

        Ok(FinalResponse {
            text: visible_text.to_string(),
            tool_outputs: outcomes,
        })
    }

    /// Record the fixed apology. A fallback does not complete the turn.
    pub async fn compose_fallback(&self, session_id: &str, turn_id: &str, text: &str) -> Result<FinalResponse> {
        self.history
            .append(
                session_id,
                MessageRole::Assistant,
                text,
                turn_metadata(turn_id, meta::TYPE_FALLBACK),
            )
            .await?;

        Ok(FinalResponse {
            text: text.to_string(),
            tool_outputs: Vec::new(),
        })
    }
}

pub fn turn_metadata(turn_id: &str, message_type: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(meta::TYPE.to_string(), Value::from(message_type));
    metadata.insert(meta::TURN_ID.to_string(), Value::from(turn_id));
    metadata
}

fn tool_metadata(turn_id: &str, outcome: &ToolOutcome) -> Metadata {
    let mut metadata = turn_metadata(turn_id, meta::TYPE_TOOL_EXECUTION);
    metadata.insert(meta::TOOL_NAME.to_string(), Value::from(outcome.tool_name.as_str()));
    metadata.insert(meta::ARGUMENTS.to_string(), outcome.arguments.clone());
    metadata.insert(meta::STATUS.to_string(), Value::from(outcome.status.as_str()));
    metadata.insert(meta::OUTPUT.to_string(), outcome.output.clone());
    metadata.insert(
        meta::INVOCATION_KEY.to_string(),
        Value::from(outcome.invocation_key.as_str()),
    );
    if let Some(error) = &outcome.error {
        metadata.insert(meta::ERROR.to_string(), Value::from(error.as_str()));
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Session, ToolStatus};
    use crate::store::{ConversationStore, InMemoryConversationStore};
    use crate::tools::dispatcher::prior_outcomes;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    async fn composer() -> (ResponseComposer, HistoryStore) {
        let store = Arc::new(InMemoryConversationStore::new());
        store
            .insert_session(&Session::new("s1".into(), "u1", "finance"))
            .await
            .unwrap();
        let history = HistoryStore::new(store, 20, Duration::from_secs(1));
        (ResponseComposer::new(history.clone()), history)
    }

    fn outcome(key: &str, replayed: bool) -> ToolOutcome {
        ToolOutcome {
            tool_name: "getBalance".into(),
            arguments: json!({}),
            status: ToolStatus::Success,
            output: json!("Balance: 100"),
            error: None,
            invocation_key: key.into(),
            invoked_at: Utc::now(),
            replayed,
        }
    }

    #[tokio::test]
    async fn test_tool_messages_precede_reply() {
        let (composer, history) = composer().await;
        let response = composer
            .compose("s1", "t1", "Sure!", vec![outcome("k1", false)])
            .await
            .unwrap();
        assert_eq!(response.text, "Sure!");

        let messages = history.read("s1", None).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::Tool);
        assert_eq!(messages[0].content, "Balance: 100");
        assert_eq!(messages[0].message_type(), Some(meta::TYPE_TOOL_EXECUTION));
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].message_type(), Some(meta::TYPE_REPLY));
        assert_eq!(messages[1].meta_str(meta::TURN_ID), Some("t1"));

        let prior = prior_outcomes(&messages);
        assert_eq!(prior["k1"].output, json!("Balance: 100"));

        let record = history.turn_record("s1", "t1").await.unwrap().unwrap();
        assert!(record.is_complete());
        assert_eq!(record.tool_outcomes.len(), 1);
        assert_eq!(record.tool_outcomes[0].invocation_key, "k1");
    }

    #[tokio::test]
    async fn test_replayed_outcomes_are_not_rewritten() {
        let (composer, history) = composer().await;
        composer
            .compose("s1", "t1", "ok", vec![outcome("k1", true)])
            .await
            .unwrap();

        let messages = history.read("s1", None).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn test_fallback_is_marked() {
        let (composer, history) = composer().await;
        composer.compose_fallback("s1", "t1", "sorry").await.unwrap();
        let messages = history.read("s1", None).await.unwrap();
        assert_eq!(messages[0].message_type(), Some(meta::TYPE_FALLBACK));
        assert!(history.turn_record("s1", "t1").await.unwrap().is_none());
    }
}
