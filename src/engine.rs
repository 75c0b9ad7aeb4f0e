//! Conversation engine
//!
//! One engine per assistant domain. A turn runs, under its session's lock:
//!
//! ```text
//! ensure session -> append user message -> (read history || retrieve) ->
//! assemble prompt -> invoke model -> parse directives -> dispatch -> compose
//! ```
//!
//! Only store failures propagate. Model outages become a fixed apology,
//! retrieval failures an empty context, tool failures per-directive errors.

use crate::composer::{turn_metadata, ResponseComposer};
use crate::config::{EngineConfig, Timeouts};
use crate::domains::DomainProfile;
use crate::error::EngineError;
use crate::llm::{self, GenerationOptions, LanguageModel, ModelRequest};
use crate::memory::{HistoryStore, SessionLocks, SessionManager};
use crate::models::{
    meta, FinalResponse, Message, MessageRole, Session, ToolOutcome, TurnOutcome, TurnRecord,
    TurnRequest,
};
use crate::prompt::PromptAssembler;
use crate::retrieval::{self, EmbeddingService, Ingestor, RetrievalOptions, Retriever, VectorIndex};
use crate::store::{ConversationStore, InMemoryConversationStore, PostgresConversationStore};
use crate::tools::dispatcher::{outcome_from_message, prior_outcomes};
use crate::tools::{parse_reply, ToolContext, ToolDispatcher};
use crate::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Shown when the language model cannot be reached
pub const FALLBACK_REPLY: &str =
    "I'm sorry, I'm having trouble responding right now. Please try again in a moment.";

/// Owner used when a request does not name one
pub const DEFAULT_OWNER: &str = "anonymous";

/// External collaborators, shared by every engine of a process
#[derive(Clone)]
pub struct EngineServices {
    pub store: Arc<dyn ConversationStore>,
    pub model: Arc<dyn LanguageModel>,
    pub embedder: Option<Arc<dyn EmbeddingService>>,
    pub index: Option<Arc<dyn VectorIndex>>,
    pub locks: Arc<SessionLocks>,
}

impl EngineServices {
    pub fn new(store: Arc<dyn ConversationStore>, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            store,
            model,
            embedder: None,
            index: None,
            locks: Arc::new(SessionLocks::new()),
        }
    }

    pub fn with_retrieval(mut self, embedder: Arc<dyn EmbeddingService>, index: Arc<dyn VectorIndex>) -> Self {
        self.embedder = Some(embedder);
        self.index = Some(index);
        self
    }

    /// Postgres when a database URL is configured, memory otherwise.
    /// Retrieval is wired only when a vector index is configured.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let store: Arc<dyn ConversationStore> = match &config.database_url {
            Some(url) => Arc::new(PostgresConversationStore::connect_lazy(url)?),
            None => {
                warn!("No database URL configured; conversations are kept in memory");
                Arc::new(InMemoryConversationStore::new())
            }
        };

        let services = Self::new(store, llm::model_from_config(config)?);
        match retrieval::index_from_config(config)? {
            Some(index) => Ok(services.with_retrieval(retrieval::embedder_from_config(config)?, index)),
            None => {
                warn!("No vector index configured; turns run without retrieved context");
                Ok(services)
            }
        }
    }

    /// Document loader over the same embedder and index, bounded by the configured timeouts.
    pub fn ingestor(&self, timeouts: &Timeouts) -> Option<Ingestor> {
        match (&self.embedder, &self.index) {
            (Some(embedder), Some(index)) => {
                Some(Ingestor::new(embedder.clone(), index.clone()).with_timeouts(timeouts))
            }
            _ => None,
        }
    }
}

pub struct ConversationEngine {
    profile: DomainProfile,
    sessions: SessionManager,
    history: HistoryStore,
    retriever: Option<Retriever>,
    model: Arc<dyn LanguageModel>,
    dispatcher: ToolDispatcher,
    composer: ResponseComposer,
    locks: Arc<SessionLocks>,
    generation: GenerationOptions,
    retrieval: RetrievalOptions,
    model_timeout: Duration,
}

impl ConversationEngine {
    pub fn new(profile: DomainProfile, services: EngineServices, config: &EngineConfig) -> Self {
        let timeouts = &config.timeouts;
        let history = HistoryStore::new(services.store.clone(), config.max_history_length, timeouts.store);

        let retriever = match (&services.embedder, &services.index, &profile.collection) {
            (Some(embedder), Some(index), Some(collection)) => Some(Retriever::new(
                embedder.clone(),
                index.clone(),
                collection.clone(),
                timeouts.embedding,
                timeouts.index,
            )),
            _ => None,
        };

        Self {
            sessions: SessionManager::new(services.store.clone(), timeouts.store),
            composer: ResponseComposer::new(history.clone()),
            dispatcher: ToolDispatcher::new(profile.registry.clone(), timeouts.tool),
            history,
            retriever,
            model: services.model,
            locks: services.locks,
            generation: GenerationOptions {
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            },
            retrieval: RetrievalOptions {
                limit: config.retrieval_limit,
                score_threshold: config.retrieval_score_threshold,
            },
            model_timeout: timeouts.model,
            profile,
        }
    }

    pub fn kind(&self) -> &str {
        &self.profile.kind
    }

    pub fn profile(&self) -> &DomainProfile {
        &self.profile
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn has_retrieval(&self) -> bool {
        self.retriever.is_some()
    }

    /// Process one user message end to end.
    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnOutcome> {
        let text = request.message.trim();
        if text.is_empty() {
            return Err(EngineError::InvalidRequest("message must not be empty".to_string()));
        }

        let start = Instant::now();
        let requested_owner = non_blank(request.owner_id.as_deref());
        let turn_id = non_blank(request.turn_id.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let session_id = self
            .sessions
            .ensure_session(
                requested_owner.unwrap_or(DEFAULT_OWNER),
                &self.profile.kind,
                request.session_id.as_deref(),
            )
            .await?;

        let _guard = self.locks.acquire(&session_id).await;

        let session = self.sessions.get(&session_id).await?;
        let owner_id = requested_owner.unwrap_or(session.owner_id.as_str()).to_string();

        let existing = self.history.turn_messages(&session_id, &turn_id).await?;
        let record = self.history.turn_record(&session_id, &turn_id).await?;
        if let Some(outcome) = replay(&session, &turn_id, &existing, record.as_ref()) {
            info!(session_id = %session_id, turn_id = %turn_id, "Turn already completed, replaying");
            return Ok(outcome);
        }

        if !existing.iter().any(|m| m.role == MessageRole::User) {
            self.history
                .append(
                    &session_id,
                    MessageRole::User,
                    text,
                    turn_metadata(&turn_id, meta::TYPE_QUERY),
                )
                .await?;
        }

        let (history, documents) = tokio::join!(
            self.history.read(&session_id, None),
            self.retrieve(text)
        );
        let history: Vec<Message> = history?
            .into_iter()
            .filter(|m| m.meta_str(meta::TURN_ID) != Some(turn_id.as_str()))
            .collect();

        let prompt = PromptAssembler::assemble(
            &self.profile.persona,
            &self.profile.domain_knowledge,
            self.dispatcher.registry(),
            &documents,
            &history,
            text,
        );
        let request = ModelRequest {
            system_prompt: prompt.system,
            user_prompt: prompt.user,
            options: self.generation,
        };

        let raw = match llm::invoke(self.model.as_ref(), &request, self.model_timeout).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    model = %self.model.name(),
                    error = %e,
                    "Model unavailable, replying with fallback"
                );
                let response = self
                    .composer
                    .compose_fallback(&session_id, &turn_id, FALLBACK_REPLY)
                    .await?;
                return Ok(TurnOutcome {
                    session_id,
                    turn_id,
                    response,
                    context_documents: documents.len(),
                    fallback: true,
                    replayed: false,
                });
            }
        };

        let mut prior = prior_outcomes(&existing);
        for outcome in record.iter().flat_map(|r| &r.tool_outcomes) {
            prior
                .entry(outcome.invocation_key.clone())
                .or_insert_with(|| outcome.clone());
        }

        let registry = self.dispatcher.registry();
        let parsed = parse_reply(&raw, |name| registry.contains(name));
        let ctx = ToolContext {
            owner_id,
            session_id: session_id.clone(),
        };
        let outcomes = self
            .dispatcher
            .dispatch(&ctx, &turn_id, &parsed.directives, &prior)
            .await;

        let response = self
            .composer
            .compose(&session_id, &turn_id, &parsed.visible_text, outcomes)
            .await?;

        info!(
            session_id = %session_id,
            kind = %self.profile.kind,
            context_documents = documents.len(),
            tool_outputs = response.tool_outputs.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Turn completed"
        );

        Ok(TurnOutcome {
            session_id,
            turn_id,
            response,
            context_documents: documents.len(),
            fallback: false,
            replayed: false,
        })
    }

    async fn retrieve(&self, text: &str) -> Vec<crate::models::RetrievedDocument> {
        match &self.retriever {
            Some(retriever) => retriever.retrieve(text, self.retrieval).await,
            None => Vec::new(),
        }
    }

    pub async fn get_history(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<Message>> {
        self.history.read(session_id, limit).await
    }

    /// Waits for an in-flight turn of the same session to finish first.
    pub async fn clear_history(&self, session_id: &str) -> Result<()> {
        let _guard = self.locks.acquire(session_id).await;
        self.history.clear(session_id).await?;
        info!(session_id = %session_id, "Cleared conversation history");
        Ok(())
    }

    pub async fn close_session(&self, session_id: &str) -> Result<()> {
        let _guard = self.locks.acquire(session_id).await;
        self.sessions.close(session_id).await
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// A turn whose reply is persisted is answered from its record, or from the
/// transcript when the record is missing.
fn replay(
    session: &Session,
    turn_id: &str,
    messages: &[Message],
    record: Option<&TurnRecord>,
) -> Option<TurnOutcome> {
    let (text, outcomes) = match record {
        Some(TurnRecord {
            reply: Some(reply),
            tool_outcomes,
            ..
        }) => (reply.clone(), tool_outcomes.clone()),
        _ => {
            let reply = messages.iter().rev().find(|m| {
                m.role == MessageRole::Assistant && m.message_type() == Some(meta::TYPE_REPLY)
            })?;
            (
                reply.content.clone(),
                messages.iter().filter_map(outcome_from_message).collect(),
            )
        }
    };

    let tool_outputs = outcomes
        .into_iter()
        .map(|mut outcome: ToolOutcome| {
            outcome.replayed = true;
            outcome
        })
        .collect();

    Some(TurnOutcome {
        session_id: session.session_id.clone(),
        turn_id: turn_id.to_string(),
        response: FinalResponse { text, tool_outputs },
        context_documents: 0,
        fallback: false,
        replayed: true,
    })
}
