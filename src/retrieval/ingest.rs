//! Out-of-band document ingestion
//!
//! Splits text into overlapping chunks, embeds them in one batch and upserts
//! them into the index. Conversational turns never call this.

use crate::config::Timeouts;
use crate::error::{within, EngineError};
use crate::retrieval::{EmbeddingService, IndexPoint, VectorIndex};
use crate::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_CHUNK_CHARS: usize = 800;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

/// Character-window chunking on char boundaries. Whitespace-only chunks are dropped.
pub fn chunk_text(text: &str, chunk_chars: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() || chunk_chars == 0 {
        return Vec::new();
    }

    let step = chunk_chars.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + chunk_chars).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }

    chunks
}

pub struct Ingestor {
    embedder: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
    chunk_chars: usize,
    overlap: usize,
    embedding_timeout: Duration,
    index_timeout: Duration,
}

impl Ingestor {
    pub fn new(embedder: Arc<dyn EmbeddingService>, index: Arc<dyn VectorIndex>) -> Self {
        let defaults = Timeouts::default();
        Self {
            embedder,
            index,
            chunk_chars: DEFAULT_CHUNK_CHARS,
            overlap: DEFAULT_CHUNK_OVERLAP,
            embedding_timeout: defaults.embedding,
            index_timeout: defaults.index,
        }
    }

    pub fn with_timeouts(mut self, timeouts: &Timeouts) -> Self {
        self.embedding_timeout = timeouts.embedding;
        self.index_timeout = timeouts.index;
        self
    }

    pub fn with_chunking(mut self, chunk_chars: usize, overlap: usize) -> Self {
        self.chunk_chars = chunk_chars.max(1);
        self.overlap = overlap.min(self.chunk_chars.saturating_sub(1));
        self
    }

    /// Returns the number of chunks written.
    pub async fn ingest(&self, collection: &str, source_id: &str, text: &str) -> Result<usize> {
        let chunks = chunk_text(text, self.chunk_chars, self.overlap);
        if chunks.is_empty() {
            return Err(EngineError::InvalidRequest(
                "document has no text to ingest".to_string(),
            ));
        }

        let embed_limit = self.embedding_timeout;
        let vectors = within(embed_limit, self.embedder.embed(&chunks), || {
            EngineError::RetrievalDegraded(format!("embedding timed out after {:?}", embed_limit))
        })
        .await?;
        if vectors.len() != chunks.len() {
            return Err(EngineError::RetrievalDegraded(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                vectors.len()
            )));
        }

        if let Some(dimension) = vectors.first().map(Vec::len) {
            within(
                self.index_timeout,
                self.index.ensure_collection(collection, dimension),
                || self.index_expired("collection setup"),
            )
            .await?;
        }

        let points: Vec<IndexPoint> = chunks
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (chunk, vector))| IndexPoint {
                id: Uuid::new_v4().to_string(),
                vector,
                payload: json!({
                    "content": chunk,
                    "source": source_id,
                    "chunk": i,
                }),
            })
            .collect();

        let count = points.len();
        within(self.index_timeout, self.index.upsert(collection, points), || {
            self.index_expired("upsert")
        })
        .await?;

        info!(collection = %collection, source = %source_id, chunks = count, "Ingested document");
        Ok(count)
    }

    fn index_expired(&self, what: &str) -> EngineError {
        EngineError::RetrievalDegraded(format!("index {} timed out after {:?}", what, self.index_timeout))
    }
}
