//! Test doubles shared by unit tests

use crate::error::EngineError;
use crate::llm::{LanguageModel, ModelRequest};
use crate::models::{Message, NewMessage, Session, SessionStatus, ToolOutcome, TurnRecord};
use crate::retrieval::{EmbeddingService, IndexPoint, ScoredPoint, VectorIndex};
use crate::store::ConversationStore;
use crate::tools::{Tool, ToolContext};
use crate::Result;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const STALL: Duration = Duration::from_secs(30);

/// A store whose every call hangs
pub struct StalledStore;

#[async_trait::async_trait]
impl ConversationStore for StalledStore {
    async fn insert_session(&self, _session: &Session) -> Result<bool> {
        tokio::time::sleep(STALL).await;
        Ok(true)
    }

    async fn find_session(&self, _session_id: &str) -> Result<Option<Session>> {
        tokio::time::sleep(STALL).await;
        Ok(None)
    }

    async fn touch_session(&self, _session_id: &str) -> Result<Option<Session>> {
        tokio::time::sleep(STALL).await;
        Ok(None)
    }

    async fn set_session_status(&self, _session_id: &str, _status: SessionStatus) -> Result<bool> {
        tokio::time::sleep(STALL).await;
        Ok(false)
    }

    async fn list_sessions(&self, _owner_id: &str, _kind: Option<&str>) -> Result<Vec<Session>> {
        tokio::time::sleep(STALL).await;
        Ok(Vec::new())
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message> {
        tokio::time::sleep(STALL).await;
        Err(EngineError::UnknownSession(message.session_id))
    }

    async fn recent_messages(&self, _session_id: &str, _limit: usize) -> Result<Vec<Message>> {
        tokio::time::sleep(STALL).await;
        Ok(Vec::new())
    }

    async fn turn_messages(&self, _session_id: &str, _turn_id: &str) -> Result<Vec<Message>> {
        tokio::time::sleep(STALL).await;
        Ok(Vec::new())
    }

    async fn count_messages(&self, _session_id: &str) -> Result<u64> {
        tokio::time::sleep(STALL).await;
        Ok(0)
    }

    async fn retain_latest(&self, _session_id: &str, _keep: usize) -> Result<u64> {
        tokio::time::sleep(STALL).await;
        Ok(0)
    }

    async fn clear_messages(&self, _session_id: &str) -> Result<()> {
        tokio::time::sleep(STALL).await;
        Ok(())
    }

    async fn record_tool_outcome(&self, _session_id: &str, _turn_id: &str, _outcome: &ToolOutcome) -> Result<()> {
        tokio::time::sleep(STALL).await;
        Ok(())
    }

    async fn record_reply(&self, _session_id: &str, _turn_id: &str, _reply: &str) -> Result<()> {
        tokio::time::sleep(STALL).await;
        Ok(())
    }

    async fn turn_record(&self, _session_id: &str, _turn_id: &str) -> Result<Option<TurnRecord>> {
        tokio::time::sleep(STALL).await;
        Ok(None)
    }
}

/// Replies with canned texts in order, then repeats the last one
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(str::to_string).collect()),
            last: Mutex::new(String::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.replies.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(last.clone())
    }
}

pub struct FailingModel;

#[async_trait::async_trait]
impl LanguageModel for FailingModel {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: &ModelRequest) -> Result<String> {
        Err(EngineError::ModelUnavailable("connection refused".to_string()))
    }
}

pub struct SlowModel(pub Duration);

#[async_trait::async_trait]
impl LanguageModel for SlowModel {
    fn name(&self) -> &str {
        "slow"
    }

    async fn complete(&self, _request: &ModelRequest) -> Result<String> {
        tokio::time::sleep(self.0).await;
        Ok("too late".to_string())
    }
}

/// Deterministic vectors of a fixed dimension
pub struct StaticEmbedder {
    dimension: usize,
}

impl StaticEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait::async_trait]
impl EmbeddingService for StaticEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let seed = t.len() as f32;
                (0..self.dimension).map(|i| seed + i as f32).collect()
            })
            .collect())
    }
}

/// Never answers within any configured timeout
pub struct StallingEmbedder;

#[async_trait::async_trait]
impl EmbeddingService for StallingEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        tokio::time::sleep(STALL).await;
        Ok(Vec::new())
    }
}

pub struct FailingEmbedder;

#[async_trait::async_trait]
impl EmbeddingService for FailingEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(EngineError::RetrievalDegraded("embedding service down".to_string()))
    }
}

/// Returns the same hits for every query and records upserts
pub struct StaticIndex {
    hits: Vec<ScoredPoint>,
    fail: bool,
    searches: AtomicUsize,
    upserted: Mutex<Vec<IndexPoint>>,
}

impl StaticIndex {
    pub fn new(hits: Vec<ScoredPoint>) -> Self {
        Self {
            hits,
            fail: false,
            searches: AtomicUsize::new(0),
            upserted: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn upserted(&self) -> Vec<IndexPoint> {
        self.upserted.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl VectorIndex for StaticIndex {
    async fn search(
        &self,
        _collection: &str,
        _vector: &[f32],
        _limit: usize,
        _score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EngineError::RetrievalDegraded("index unreachable".to_string()));
        }
        Ok(self.hits.clone())
    }

    async fn upsert(&self, _collection: &str, points: Vec<IndexPoint>) -> Result<()> {
        if self.fail {
            return Err(EngineError::RetrievalDegraded("index unreachable".to_string()));
        }
        self.upserted.lock().unwrap().extend(points);
        Ok(())
    }
}

/// Returns a fixed output and counts invocations
pub struct CountingTool {
    name: &'static str,
    output: Value,
    calls: AtomicUsize,
}

impl CountingTool {
    pub fn new(name: &'static str, output: Value) -> Self {
        Self {
            name,
            output,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        "Test tool"
    }

    fn usage(&self) -> &'static str {
        "{}"
    }

    async fn execute(&self, _ctx: &ToolContext, _args: &Value) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

pub struct FailingTool {
    name: &'static str,
    error: fn(&'static str) -> EngineError,
    message: &'static str,
}

impl FailingTool {
    pub fn invalid_input(name: &'static str, message: &'static str) -> Self {
        Self {
            name,
            error: |m| EngineError::InvalidToolInput(m.to_string()),
            message,
        }
    }

    pub fn internal(name: &'static str) -> Self {
        Self {
            name,
            error: |m| EngineError::StoreUnavailable(m.to_string()),
            message: "connection refused",
        }
    }
}

#[async_trait::async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        "Always fails"
    }

    fn usage(&self) -> &'static str {
        "{}"
    }

    async fn execute(&self, _ctx: &ToolContext, _args: &Value) -> Result<Value> {
        Err((self.error)(self.message))
    }
}

pub struct SlowTool {
    name: &'static str,
    delay: Duration,
}

impl SlowTool {
    pub fn new(name: &'static str, delay: Duration) -> Self {
        Self { name, delay }
    }
}

#[async_trait::async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        "Never answers in time"
    }

    fn usage(&self) -> &'static str {
        "{}"
    }

    async fn execute(&self, _ctx: &ToolContext, _args: &Value) -> Result<Value> {
        tokio::time::sleep(self.delay).await;
        Ok(Value::Null)
    }
}
