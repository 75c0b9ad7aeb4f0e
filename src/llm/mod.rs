//! Language-model invocation
//!
//! One synchronous request/response per turn. The "tool" mechanism lives in
//! the reply text itself, so no provider function-calling API is used.

pub mod gemini;
pub mod openai;

pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

use crate::config::{EngineConfig, ModelProvider};
use crate::error::{within, EngineError};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub options: GenerationOptions,
}

#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    /// Raw reply text for one prompt pair.
    async fn complete(&self, request: &ModelRequest) -> Result<String>;
}

/// Run one completion under a deadline. Every failure, including the deadline,
/// comes back as `ModelUnavailable`.
pub async fn invoke(
    model: &dyn LanguageModel,
    request: &ModelRequest,
    timeout: Duration,
) -> Result<String> {
    let result = within(timeout, model.complete(request), || {
        EngineError::ModelUnavailable(format!("{} timed out after {:?}", model.name(), timeout))
    })
    .await;

    result.map_err(|e| match e {
        EngineError::ModelUnavailable(_) => e,
        other => {
            warn!(model = %model.name(), error = %other, "Model call failed");
            EngineError::ModelUnavailable(other.to_string())
        }
    })
}

/// Build the configured model client.
pub fn model_from_config(config: &EngineConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.model_provider {
        ModelProvider::Gemini => Ok(Arc::new(GeminiClient::new(
            config.gemini_api_key.clone(),
            config.gemini_model.clone(),
        )?)),
        ModelProvider::OpenAi => Ok(Arc::new(OpenAiClient::new(
            config.openai_api_key.clone(),
            config.openai_base_url.clone(),
            config.openai_model.clone(),
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingModel, ScriptedModel, SlowModel};

    fn request() -> ModelRequest {
        ModelRequest {
            system_prompt: "sys".into(),
            user_prompt: "hi".into(),
            options: GenerationOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_invoke_returns_text() {
        let model = ScriptedModel::new(vec!["hello there"]);
        let text = invoke(&model, &request(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(text, "hello there");
        assert_eq!(model.requests()[0].user_prompt, "hi");
    }

    #[tokio::test]
    async fn test_invoke_maps_failures() {
        let err = invoke(&FailingModel, &request(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ModelUnavailable(_)));
    }

    #[tokio::test]
    async fn test_invoke_times_out() {
        let model = SlowModel(Duration::from_millis(500));
        let err = invoke(&model, &request(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ModelUnavailable(_)));
    }

    #[test]
    fn test_model_from_config_selects_provider() {
        let mut config = EngineConfig::default();
        assert_eq!(model_from_config(&config).unwrap().name(), "gemini");
        config.model_provider = ModelProvider::OpenAi;
        assert_eq!(model_from_config(&config).unwrap().name(), "openai");
    }
}
