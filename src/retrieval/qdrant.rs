//! Qdrant vector index over its REST API

use crate::error::EngineError;
use crate::retrieval::{IndexPoint, ScoredPoint, VectorIndex};
use crate::Result;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info};

pub struct QdrantIndex {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl QdrantIndex {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    async fn send_json(&self, request: RequestBuilder, what: &str) -> Result<Value> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| EngineError::RetrievalDegraded(format!("Qdrant {} failed: {}", what, e)))?;

        let status = response.status();
        let body = response.json::<Value>().await.map_err(|e| {
            EngineError::RetrievalDegraded(format!("Qdrant {} returned invalid JSON: {}", what, e))
        })?;

        if !status.is_success() {
            error!("Qdrant {} error response: {}", what, body);
            return Err(EngineError::RetrievalDegraded(format!(
                "Qdrant {} returned {}",
                what, status
            )));
        }

        Ok(body)
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    score_threshold: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Value,
}

/// Qdrant ids are either unsigned integers or UUID strings
fn point_id(id: Value) -> String {
    match id {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[async_trait::async_trait]
impl VectorIndex for QdrantIndex {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>> {
        let request = self
            .client
            .post(format!("{}/collections/{}/points/search", self.base_url, collection))
            .json(&SearchRequest {
                vector,
                limit,
                with_payload: true,
                score_threshold,
            });

        let body = self.send_json(request, "search").await?;
        let parsed: SearchResponse = serde_json::from_value(body).map_err(|e| {
            EngineError::RetrievalDegraded(format!("Unexpected Qdrant search response: {}", e))
        })?;

        Ok(parsed
            .result
            .into_iter()
            .map(|hit| ScoredPoint {
                id: point_id(hit.id),
                score: hit.score,
                payload: hit.payload,
            })
            .collect())
    }

    async fn upsert(&self, collection: &str, points: Vec<IndexPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let count = points.len();
        let request = self
            .client
            .put(format!("{}/collections/{}/points?wait=true", self.base_url, collection))
            .json(&json!({ "points": points }));

        self.send_json(request, "upsert").await?;
        info!(collection = %collection, count, "Upserted points");
        Ok(())
    }

    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<()> {
        let exists = self
            .authorized(
                self.client
                    .get(format!("{}/collections/{}", self.base_url, collection)),
            )
            .send()
            .await
            .map_err(|e| EngineError::RetrievalDegraded(format!("Qdrant lookup failed: {}", e)))?
            .status()
            .is_success();

        if exists {
            return Ok(());
        }

        let request = self
            .client
            .put(format!("{}/collections/{}", self.base_url, collection))
            .json(&json!({
                "vectors": { "size": dimension, "distance": "Cosine" }
            }));

        self.send_json(request, "create collection").await?;
        info!(collection = %collection, dimension, "Created collection");
        Ok(())
    }
}
