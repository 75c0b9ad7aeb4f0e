//! Core data models for the conversation engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Opaque key/value metadata attached to a message
pub type Metadata = serde_json::Map<String, Value>;

/// Metadata keys written by the engine
pub mod meta {
    pub const TYPE: &str = "type";
    pub const TURN_ID: &str = "turn_id";
    pub const TOOL_NAME: &str = "tool_name";
    pub const ARGUMENTS: &str = "arguments";
    pub const STATUS: &str = "status";
    pub const ERROR: &str = "error";
    pub const INVOCATION_KEY: &str = "invocation_key";
    pub const OUTPUT: &str = "output";

    pub const TYPE_QUERY: &str = "query";
    pub const TYPE_REPLY: &str = "reply";
    pub const TYPE_FALLBACK: &str = "fallback";
    pub const TYPE_TOOL_EXECUTION: &str = "tool_execution";
}

//
// ================= Session =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Closed => "closed",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "closed" => SessionStatus::Closed,
            _ => SessionStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub owner_id: String,
    /// Domain tag of the assistant that owns this conversation
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Messages appended since the last clear
    pub message_count: u64,
    pub status: SessionStatus,
}

impl Session {
    pub fn new(session_id: String, owner_id: &str, kind: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            owner_id: owner_id.to_string(),
            kind: kind.to_string(),
            created_at: now,
            last_activity_at: now,
            message_count: 0,
            status: SessionStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

//
// ================= Message =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
        }
    }

    pub fn from_db(role: &str) -> Self {
        match role.to_lowercase().as_str() {
            "assistant" | "agent" => MessageRole::Assistant,
            "system" => MessageRole::System,
            "tool" => MessageRole::Tool,
            _ => MessageRole::User,
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A message about to be appended. The store assigns id, sequence and timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    pub metadata: Metadata,
}

impl NewMessage {
    pub fn new(session_id: &str, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.to_string(),
            role,
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// A persisted, immutable message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Uuid,
    pub session_id: String,
    /// Per-session sequence number, breaks timestamp ties
    pub seq: i64,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Message {
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn message_type(&self) -> Option<&str> {
        self.meta_str(meta::TYPE)
    }
}

//
// ================= Retrieval =================
//

/// A similarity hit used to build one prompt; never persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub id: String,
    pub score: f32,
    pub content: String,
    pub source_payload: Value,
}

//
// ================= Tools =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    ParseError,
    UnknownTool,
    ExecutionError,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Success => "success",
            ToolStatus::ParseError => "parse_error",
            ToolStatus::UnknownTool => "unknown_tool",
            ToolStatus::ExecutionError => "execution_error",
        }
    }

    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "success" => ToolStatus::Success,
            "parse_error" => ToolStatus::ParseError,
            "unknown_tool" => ToolStatus::UnknownTool,
            _ => ToolStatus::ExecutionError,
        }
    }
}

/// Result of one directive occurrence (the ToolInvocation of the data model)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool_name: String,
    pub arguments: Value,
    pub status: ToolStatus,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub invocation_key: String,
    pub invoked_at: DateTime<Utc>,
    /// True when the result came from an earlier attempt of the same turn
    #[serde(default)]
    pub replayed: bool,
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    /// Text recorded as the tool message content
    pub fn transcript_text(&self) -> String {
        match (&self.error, &self.output) {
            (Some(error), _) => format!("Error: {}", error),
            (None, Value::String(text)) => text.clone(),
            (None, other) => other.to_string(),
        }
    }
}

/// Side effects of one turn, kept apart from the trimmed history so retries
/// stay safe after retention has dropped the turn's messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_id: String,
    pub tool_outcomes: Vec<ToolOutcome>,
    /// Set once the assistant reply is written; the turn is complete from then on
    pub reply: Option<String>,
}

impl TurnRecord {
    pub fn new(turn_id: &str) -> Self {
        Self {
            turn_id: turn_id.to_string(),
            tool_outcomes: Vec::new(),
            reply: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.reply.is_some()
    }
}

//
// ================= Turn I/O =================
//

/// One incoming user message from the presentation layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    /// Client idempotency key; retries of the same turn reuse it
    #[serde(default)]
    pub turn_id: Option<String>,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
            owner_id: None,
            turn_id: None,
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn for_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_turn_id(mut self, turn_id: impl Into<String>) -> Self {
        self.turn_id = Some(turn_id.into());
        self
    }
}

/// Conversational reply kept apart from tool output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResponse {
    pub text: String,
    pub tool_outputs: Vec<ToolOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub session_id: String,
    pub turn_id: String,
    pub response: FinalResponse,
    pub context_documents: usize,
    /// The model was unreachable and the fixed apology was returned
    pub fallback: bool,
    /// The turn had already completed and was answered from the transcript
    pub replayed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_round_trip_from_db() {
        assert_eq!(MessageRole::from_db("assistant"), MessageRole::Assistant);
        assert_eq!(MessageRole::from_db("agent"), MessageRole::Assistant);
        assert_eq!(MessageRole::from_db("TOOL"), MessageRole::Tool);
        assert_eq!(MessageRole::from_db("whatever"), MessageRole::User);
    }

    #[test]
    fn test_transcript_text() {
        let mut outcome = ToolOutcome {
            tool_name: "getBalance".to_string(),
            arguments: json!({}),
            status: ToolStatus::Success,
            output: json!("Balance: 100"),
            error: None,
            invocation_key: "k".to_string(),
            invoked_at: Utc::now(),
            replayed: false,
        };
        assert_eq!(outcome.transcript_text(), "Balance: 100");

        outcome.output = json!({"balance": 100});
        assert_eq!(outcome.transcript_text(), r#"{"balance":100}"#);

        outcome.status = ToolStatus::ExecutionError;
        outcome.error = Some("ledger offline".to_string());
        assert_eq!(outcome.transcript_text(), "Error: ledger offline");
    }

    #[test]
    fn test_new_message_metadata() {
        let msg = NewMessage::new("s1", MessageRole::User, "hi")
            .with_meta(meta::TYPE, meta::TYPE_QUERY)
            .with_meta(meta::TURN_ID, "t1");
        assert_eq!(msg.metadata.get(meta::TYPE), Some(&json!("query")));
        assert_eq!(msg.metadata.len(), 2);
    }
}
