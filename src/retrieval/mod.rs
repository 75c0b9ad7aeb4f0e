//! Retrieval-augmented context
//!
//! Embeds the query, asks the vector index for nearest neighbours, drops hits
//! under the score threshold. Retrieval is optional per turn: any embedding or
//! index failure degrades to an empty context instead of failing the turn.

pub mod embedding;
pub mod ingest;
pub mod qdrant;

pub use embedding::{GeminiEmbedder, OpenAiEmbedder};
pub use ingest::{chunk_text, Ingestor};
pub use qdrant::QdrantIndex;

use crate::config::{EngineConfig, ModelProvider};
use crate::error::{within, EngineError};
use crate::models::RetrievedDocument;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Payload fields tried, in order, for a hit's text
const CONTENT_FIELDS: [&str; 4] = ["content", "text", "page_content", "chunk_text"];

#[async_trait::async_trait]
pub trait EmbeddingService: Send + Sync {
    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Value,
}

#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>>;

    /// Used by out-of-band ingestion only.
    async fn upsert(&self, collection: &str, points: Vec<IndexPoint>) -> Result<()>;

    /// Create the collection if the backend needs it to exist before upserts.
    async fn ensure_collection(&self, _collection: &str, _dimension: usize) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalOptions {
    pub limit: usize,
    pub score_threshold: f32,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            score_threshold: 0.35,
        }
    }
}

#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
    collection: String,
    embed_timeout: Duration,
    index_timeout: Duration,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingService>,
        index: Arc<dyn VectorIndex>,
        collection: impl Into<String>,
        embed_timeout: Duration,
        index_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            index,
            collection: collection.into(),
            embed_timeout,
            index_timeout,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Never fails: a degraded retrieval is an empty context.
    pub async fn retrieve(&self, query: &str, options: RetrievalOptions) -> Vec<RetrievedDocument> {
        if query.trim().is_empty() || options.limit == 0 {
            return Vec::new();
        }

        match self.try_retrieve(query, options).await {
            Ok(documents) => {
                debug!(
                    collection = %self.collection,
                    hits = documents.len(),
                    "Retrieved context documents"
                );
                documents
            }
            Err(e) => {
                warn!(
                    collection = %self.collection,
                    error = %e,
                    "Retrieval degraded, continuing without context"
                );
                Vec::new()
            }
        }
    }

    async fn try_retrieve(
        &self,
        query: &str,
        options: RetrievalOptions,
    ) -> Result<Vec<RetrievedDocument>> {
        let embed_limit = self.embed_timeout;
        let vectors = within(
            embed_limit,
            self.embedder.embed(&[query.to_string()]),
            || EngineError::RetrievalDegraded(format!("embedding timed out after {:?}", embed_limit)),
        )
        .await?;

        let vector = vectors.into_iter().next().ok_or_else(|| {
            EngineError::RetrievalDegraded("embedding service returned no vector".to_string())
        })?;

        let index_limit = self.index_timeout;
        let hits = within(
            index_limit,
            self.index.search(
                &self.collection,
                &vector,
                options.limit,
                Some(options.score_threshold),
            ),
            || EngineError::RetrievalDegraded(format!("index search timed out after {:?}", index_limit)),
        )
        .await?;

        Ok(rank_hits(hits, options))
    }
}

/// Embedder matching the configured model provider.
pub fn embedder_from_config(config: &EngineConfig) -> Result<Arc<dyn EmbeddingService>> {
    match config.model_provider {
        ModelProvider::Gemini => Ok(Arc::new(GeminiEmbedder::new(
            config.gemini_api_key.clone(),
            config.gemini_embedding_model.clone(),
        )?)),
        ModelProvider::OpenAi => Ok(Arc::new(OpenAiEmbedder::new(
            config.openai_api_key.clone(),
            config.openai_base_url.clone(),
            config.openai_embedding_model.clone(),
        )?)),
    }
}

/// Qdrant index when `QDRANT_URL` is set; retrieval is disabled otherwise.
pub fn index_from_config(config: &EngineConfig) -> Result<Option<Arc<dyn VectorIndex>>> {
    match &config.qdrant_url {
        Some(url) => Ok(Some(Arc::new(QdrantIndex::new(url, config.qdrant_api_key.clone())?))),
        None => Ok(None),
    }
}

/// Drop sub-threshold hits, order by descending score, cap at `limit`
fn rank_hits(hits: Vec<ScoredPoint>, options: RetrievalOptions) -> Vec<RetrievedDocument> {
    let mut documents: Vec<RetrievedDocument> = hits
        .into_iter()
        .filter(|hit| hit.score.is_finite() && hit.score >= options.score_threshold)
        .map(|hit| RetrievedDocument {
            id: hit.id,
            score: hit.score.clamp(0.0, 1.0),
            content: payload_content(&hit.payload),
            source_payload: hit.payload,
        })
        .collect();

    documents.sort_by(|a, b| b.score.total_cmp(&a.score));
    documents.truncate(options.limit);
    documents
}

fn payload_content(payload: &Value) -> String {
    CONTENT_FIELDS
        .iter()
        .find_map(|field| payload.get(*field).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| match payload {
            Value::Null => String::new(),
            other => other.to_string(),
        })
}
