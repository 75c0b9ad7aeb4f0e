//! Gemini API client
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::error::EngineError;
use crate::llm::{LanguageModel, ModelRequest};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_request(request: &ModelRequest) -> GeminiRequest {
        GeminiRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: request.user_prompt.clone(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.options.temperature,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: request.options.max_tokens,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: request.system_prompt.clone(),
                }],
            },
        }
    }
}

#[async_trait::async_trait]
impl LanguageModel for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    /// Generate a reply from Gemini
    async fn complete(&self, request: &ModelRequest) -> crate::Result<String> {
        if self.api_key.is_empty() {
            return Err(EngineError::ModelUnavailable(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!(
            "{}/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        info!(model = %self.model, "Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&Self::build_request(request))
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                EngineError::ModelUnavailable(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(EngineError::ModelUnavailable(format!(
                "Gemini API returned {}",
                status
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            EngineError::ModelUnavailable(format!("Gemini parse error: {}", e))
        })?;

        let answer = extract_text(&gemini_response).ok_or_else(|| {
            EngineError::ModelUnavailable("Empty response from Gemini".to_string())
        })?;

        if let Some(usage) = &gemini_response.usage_metadata {
            info!(
                prompt_tokens = usage.prompt_token_count,
                reply_tokens = usage.candidates_token_count,
                "Gemini response received"
            );
        }

        Ok(answer)
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_text(response: &GeminiResponse) -> Option<String> {
    let candidate = response.candidates.first()?;
    let text: String = candidate
        .content
        .parts
        .iter()
        .map(|p| p.text.as_str())
        .collect();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: i32,
    #[serde(default)]
    candidates_token_count: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::GenerationOptions;

    #[test]
    fn test_request_serialization() {
        let request = GeminiClient::build_request(&ModelRequest {
            system_prompt: "You are a bookkeeping assistant".to_string(),
            user_prompt: "What did I spend?".to_string(),
            options: GenerationOptions {
                temperature: 0.1,
                max_tokens: 256,
            },
        });

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "What did I spend?");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "You are a bookkeeping assistant");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response: GeminiResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Sure! "},{"text":"TOOL:getBalance:{}"}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(&response).unwrap(), "Sure! TOOL:getBalance:{}");
    }

    #[test]
    fn test_extract_text_empty_candidates() {
        let response: GeminiResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(extract_text(&response).is_none());
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client = GeminiClient::new(String::new(), "gemini-2.0-flash".into()).unwrap();
        let result = client
            .complete(&ModelRequest {
                system_prompt: String::new(),
                user_prompt: "hi".into(),
                options: GenerationOptions::default(),
            })
            .await;

        let error_msg = result.unwrap_err().to_string();
        assert!(error_msg.to_lowercase().contains("api_key"));
    }
}
