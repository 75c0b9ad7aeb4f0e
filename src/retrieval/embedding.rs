//! Embedding service clients
//!
//! Both clients batch every input text into a single request.

use crate::error::EngineError;
use crate::retrieval::EmbeddingService;
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

fn pooled_client() -> Result<Client> {
    Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(8)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| EngineError::Config(format!("Failed to build HTTP client: {}", e)))
}

// =============================
// Gemini
// =============================

pub struct GeminiEmbedder {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiEmbedder {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        Ok(Self {
            client: pooled_client()?,
            api_key,
            model,
            base_url: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Debug, Serialize)]
struct GeminiBatchRequest<'a> {
    requests: Vec<GeminiEmbedRequest<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiEmbedRequest<'a> {
    model: String,
    content: GeminiContent<'a>,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GeminiBatchResponse {
    #[serde(default)]
    embeddings: Vec<GeminiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
}

#[async_trait::async_trait]
impl EmbeddingService for GeminiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if self.api_key.is_empty() {
            return Err(EngineError::RetrievalDegraded(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let model_path = format!("models/{}", self.model);
        let request = GeminiBatchRequest {
            requests: texts
                .iter()
                .map(|text| GeminiEmbedRequest {
                    model: model_path.clone(),
                    content: GeminiContent {
                        parts: vec![GeminiPart { text }],
                    },
                })
                .collect(),
        };

        let url = format!(
            "{}/{}:batchEmbedContents?key={}",
            self.base_url, self.model, self.api_key
        );

        debug!(count = texts.len(), model = %self.model, "Requesting Gemini embeddings");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::RetrievalDegraded(format!("Gemini embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini embedding error response: {}", error_text);
            return Err(EngineError::RetrievalDegraded(format!(
                "Gemini embedding returned {}",
                status
            )));
        }

        let parsed: GeminiBatchResponse = response.json().await.map_err(|e| {
            EngineError::RetrievalDegraded(format!("Gemini embedding parse error: {}", e))
        })?;

        if parsed.embeddings.len() != texts.len() {
            return Err(EngineError::RetrievalDegraded(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }

        Ok(parsed.embeddings.into_iter().map(|e| e.values).collect())
    }
}

// =============================
// OpenAI-compatible
// =============================

pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, base_url: String, model: String) -> Result<Self> {
        Ok(Self {
            client: pooled_client()?,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait::async_trait]
impl EmbeddingService for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&OpenAiEmbeddingRequest {
                model: &self.model,
                input: texts,
            });
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await.map_err(|e| {
            EngineError::RetrievalDegraded(format!("Embedding request failed: {}", e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Embedding error response: {}", error_text);
            return Err(EngineError::RetrievalDegraded(format!(
                "Embedding endpoint returned {}",
                status
            )));
        }

        let mut parsed: OpenAiEmbeddingResponse = response.json().await.map_err(|e| {
            EngineError::RetrievalDegraded(format!("Embedding parse error: {}", e))
        })?;

        if parsed.data.len() != texts.len() {
            return Err(EngineError::RetrievalDegraded(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|e| e.index);
        Ok(parsed.data.into_iter().map(|e| e.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_batch_request_shape() {
        let request = GeminiBatchRequest {
            requests: vec![GeminiEmbedRequest {
                model: "models/text-embedding-004".to_string(),
                content: GeminiContent {
                    parts: vec![GeminiPart { text: "monthly budget" }],
                },
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["requests"][0]["model"], "models/text-embedding-004");
        assert_eq!(json["requests"][0]["content"]["parts"][0]["text"], "monthly budget");
    }

    #[test]
    fn test_openai_response_parsing() {
        let body = r#"{"data":[{"index":1,"embedding":[0.5]},{"index":0,"embedding":[0.1]}],"model":"m"}"#;
        let mut parsed: OpenAiEmbeddingResponse = serde_json::from_str(body).unwrap();
        parsed.data.sort_by_key(|e| e.index);
        assert_eq!(parsed.data[0].embedding, vec![0.1]);
    }

    #[tokio::test]
    async fn test_gemini_without_key_degrades() {
        let embedder = GeminiEmbedder::new(String::new(), "text-embedding-004".into()).unwrap();
        let err = embedder.embed(&["q".to_string()]).await.unwrap_err();
        assert!(matches!(err, EngineError::RetrievalDegraded(_)));
    }
}
