//! REST API for the presentation layer
//!
//! One engine per assistant kind, addressed by the `:kind` path segment.
//! Session routes find the owning engine through the session's kind.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::engine::ConversationEngine;
use crate::error::EngineError;
use crate::models::{Message, Session, ToolOutcome, TurnRequest};
use crate::retrieval::Ingestor;

const STORE_APOLOGY: &str =
    "Sorry, your conversation can't be reached right now. Please try again in a moment.";

/// =============================
/// Request / Response Models
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub turn_id: String,
    pub text: String,
    pub tool_outputs: Vec<ToolOutcome>,
    pub context_documents: usize,
    pub fallback: bool,
    pub replayed: bool,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SessionListParams {
    pub owner_id: String,
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DocumentRequest {
    pub source: String,
    pub text: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn ok<T: Serialize>(data: T) -> ApiResult {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

fn fail(status: StatusCode, message: impl Into<String>) -> ApiResult {
    (status, Json(ApiResponse::error(message.into())))
}

/// Raw error text is logged, never returned.
fn from_engine_error(e: &EngineError) -> ApiResult {
    match e {
        EngineError::StoreUnavailable(_) => {
            error!(error = %e, "Store unavailable");
            fail(StatusCode::SERVICE_UNAVAILABLE, STORE_APOLOGY)
        }
        EngineError::UnknownSession(id) => fail(StatusCode::NOT_FOUND, format!("Unknown session: {}", id)),
        EngineError::InvalidRequest(reason) => fail(StatusCode::BAD_REQUEST, reason.clone()),
        other => {
            error!(error = %other, "Request failed");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong. Please try again.")
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub engines: Arc<HashMap<String, Arc<ConversationEngine>>>,
    pub ingestor: Option<Arc<Ingestor>>,
}

impl ApiState {
    pub fn new(engines: Vec<ConversationEngine>, ingestor: Option<Arc<Ingestor>>) -> Self {
        let engines = engines
            .into_iter()
            .map(|engine| (engine.kind().to_string(), Arc::new(engine)))
            .collect();
        Self {
            engines: Arc::new(engines),
            ingestor,
        }
    }

    fn engine(&self, kind: &str) -> Option<&Arc<ConversationEngine>> {
        self.engines.get(kind)
    }

    /// All engines share one store, so any of them can resolve a session.
    async fn engine_for_session(&self, session_id: &str) -> Result<&Arc<ConversationEngine>, ApiResult> {
        let any = self
            .engines
            .values()
            .next()
            .ok_or_else(|| fail(StatusCode::SERVICE_UNAVAILABLE, "No assistants configured"))?;

        let session = any
            .sessions()
            .get(session_id)
            .await
            .map_err(|e| from_engine_error(&e))?;

        self.engine(&session.kind)
            .ok_or_else(|| fail(StatusCode::NOT_FOUND, format!("Unknown assistant: {}", session.kind)))
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let mut kinds: Vec<&String> = state.engines.keys().collect();
    kinds.sort();
    Json(serde_json::json!({
        "status": "healthy",
        "assistants": kinds,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
    Json(req): Json<TurnRequest>,
) -> ApiResult {
    let Some(engine) = state.engine(&kind) else {
        return fail(StatusCode::NOT_FOUND, format!("Unknown assistant: {}", kind));
    };
    if req.message.trim().is_empty() {
        return fail(StatusCode::BAD_REQUEST, "message must not be empty");
    }

    info!(kind = %kind, session_id = ?req.session_id, "Received chat turn");

    match engine.handle_turn(req).await {
        Ok(outcome) => ok(ChatResponse {
            session_id: outcome.session_id,
            turn_id: outcome.turn_id,
            text: outcome.response.text,
            tool_outputs: outcome.response.tool_outputs,
            context_documents: outcome.context_documents,
            fallback: outcome.fallback,
            replayed: outcome.replayed,
        }),
        Err(e) => from_engine_error(&e),
    }
}

/// =============================
/// Session Endpoints
/// =============================

async fn get_history(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> ApiResult {
    let engine = match state.engine_for_session(&session_id).await {
        Ok(engine) => engine,
        Err(response) => return response,
    };

    match engine.get_history(&session_id, params.limit).await {
        Ok(messages) => ok::<Vec<Message>>(messages),
        Err(e) => from_engine_error(&e),
    }
}

async fn clear_history(State(state): State<ApiState>, Path(session_id): Path<String>) -> ApiResult {
    let engine = match state.engine_for_session(&session_id).await {
        Ok(engine) => engine,
        Err(response) => return response,
    };

    match engine.clear_history(&session_id).await {
        Ok(()) => ok(serde_json::json!({ "session_id": session_id, "cleared": true })),
        Err(e) => from_engine_error(&e),
    }
}

async fn close_session(State(state): State<ApiState>, Path(session_id): Path<String>) -> ApiResult {
    let engine = match state.engine_for_session(&session_id).await {
        Ok(engine) => engine,
        Err(response) => return response,
    };

    match engine.close_session(&session_id).await {
        Ok(()) => ok(serde_json::json!({ "session_id": session_id, "status": "closed" })),
        Err(e) => from_engine_error(&e),
    }
}

async fn list_sessions(State(state): State<ApiState>, Query(params): Query<SessionListParams>) -> ApiResult {
    let Some(engine) = state.engines.values().next() else {
        return fail(StatusCode::SERVICE_UNAVAILABLE, "No assistants configured");
    };

    match engine
        .sessions()
        .list(&params.owner_id, params.kind.as_deref())
        .await
    {
        Ok(sessions) => ok::<Vec<Session>>(sessions),
        Err(e) => from_engine_error(&e),
    }
}

/// =============================
/// Document Ingestion
/// =============================

async fn ingest_document(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
    Json(req): Json<DocumentRequest>,
) -> ApiResult {
    let Some(engine) = state.engine(&kind) else {
        return fail(StatusCode::NOT_FOUND, format!("Unknown assistant: {}", kind));
    };
    let Some(collection) = engine.profile().collection.as_deref() else {
        return fail(StatusCode::BAD_REQUEST, format!("{} has no document collection", kind));
    };
    let Some(ingestor) = state.ingestor.as_ref() else {
        return fail(StatusCode::SERVICE_UNAVAILABLE, "Document ingestion is not configured");
    };

    match ingestor.ingest(collection, &req.source, &req.text).await {
        Ok(chunks) => ok(serde_json::json!({
            "collection": collection,
            "source": req.source,
            "chunks": chunks,
        })),
        Err(EngineError::InvalidRequest(reason)) => fail(StatusCode::BAD_REQUEST, reason),
        Err(e) => {
            warn!(kind = %kind, error = %e, "Document ingestion failed");
            fail(StatusCode::BAD_GATEWAY, "Document could not be indexed")
        }
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", get(list_sessions))
        .route(
            "/api/sessions/:session_id/history",
            get(get_history).delete(clear_history),
        )
        .route("/api/sessions/:session_id/close", post(close_session))
        .route("/api/:kind/chat", post(chat_handler))
        .route("/api/:kind/documents", post(ingest_document))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
