//! Engine configuration
//!
//! Every setting comes from an environment variable with a default, so a bare
//! `EngineConfig::from_env()` yields a working in-memory setup.

use crate::error::EngineError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which language-model backend to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelProvider {
    Gemini,
    OpenAi,
}

impl FromStr for ModelProvider {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(ModelProvider::Gemini),
            "openai" | "open_ai" | "openai-compatible" => Ok(ModelProvider::OpenAi),
            other => Err(EngineError::Config(format!(
                "MODEL_PROVIDER must be 'gemini' or 'openai', got '{}'",
                other
            ))),
        }
    }
}

/// Bounded timeouts for every external call made during a turn
#[derive(Debug, Clone)]
pub struct Timeouts {
    pub model: Duration,
    pub embedding: Duration,
    pub index: Duration,
    pub store: Duration,
    pub tool: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            model: Duration::from_secs(30),
            embedding: Duration::from_secs(10),
            index: Duration::from_secs(10),
            store: Duration::from_secs(5),
            tool: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retention bound: most-recent messages kept per session
    pub max_history_length: usize,
    pub retrieval_limit: usize,
    pub retrieval_score_threshold: f32,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeouts: Timeouts,

    pub model_provider: ModelProvider,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_embedding_model: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub openai_embedding_model: String,

    pub qdrant_url: Option<String>,
    pub qdrant_api_key: Option<String>,
    pub database_url: Option<String>,
    pub port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_history_length: 20,
            retrieval_limit: 5,
            retrieval_score_threshold: 0.35,
            temperature: 0.2,
            max_tokens: 1024,
            timeouts: Timeouts::default(),
            model_provider: ModelProvider::Gemini,
            gemini_api_key: String::new(),
            gemini_model: "gemini-2.0-flash".to_string(),
            gemini_embedding_model: "text-embedding-004".to_string(),
            openai_api_key: String::new(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            openai_embedding_model: "text-embedding-3-small".to_string(),
            qdrant_url: None,
            qdrant_api_key: None,
            database_url: None,
            port: 8080,
        }
    }
}

impl EngineConfig {
    /// Load from the process environment. Call `dotenv::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (the environment in production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let max_history_length = parse_or(&get, "MAX_HISTORY_LENGTH", defaults.max_history_length)?;
        if max_history_length == 0 {
            return Err(EngineError::Config(
                "MAX_HISTORY_LENGTH must be at least 1".to_string(),
            ));
        }

        let timeouts = Timeouts {
            model: secs_or(&get, "MODEL_TIMEOUT_SECS", defaults.timeouts.model)?,
            embedding: secs_or(&get, "EMBEDDING_TIMEOUT_SECS", defaults.timeouts.embedding)?,
            index: secs_or(&get, "INDEX_TIMEOUT_SECS", defaults.timeouts.index)?,
            store: secs_or(&get, "STORE_TIMEOUT_SECS", defaults.timeouts.store)?,
            tool: secs_or(&get, "TOOL_TIMEOUT_SECS", defaults.timeouts.tool)?,
        };

        let model_provider = match get("MODEL_PROVIDER") {
            Some(value) => value.parse()?,
            None => defaults.model_provider,
        };

        let port = match get("PORT").or_else(|| get("API_PORT")) {
            Some(value) => value.trim().parse().map_err(|_| {
                EngineError::Config(format!("PORT must be a port number, got '{}'", value))
            })?,
            None => defaults.port,
        };

        Ok(Self {
            max_history_length,
            retrieval_limit: parse_or(&get, "RETRIEVAL_LIMIT", defaults.retrieval_limit)?,
            retrieval_score_threshold: parse_or(
                &get,
                "RETRIEVAL_SCORE_THRESHOLD",
                defaults.retrieval_score_threshold,
            )?,
            temperature: parse_or(&get, "MODEL_TEMPERATURE", defaults.temperature)?,
            max_tokens: parse_or(&get, "MODEL_MAX_TOKENS", defaults.max_tokens)?,
            timeouts,
            model_provider,
            gemini_api_key: get("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: get("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            gemini_embedding_model: get("GEMINI_EMBEDDING_MODEL")
                .unwrap_or(defaults.gemini_embedding_model),
            openai_api_key: get("OPENAI_API_KEY").unwrap_or_default(),
            openai_base_url: get("OPENAI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.openai_base_url),
            openai_model: get("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            openai_embedding_model: get("OPENAI_EMBEDDING_MODEL")
                .unwrap_or(defaults.openai_embedding_model),
            qdrant_url: get("QDRANT_URL").map(|url| url.trim_end_matches('/').to_string()),
            qdrant_api_key: get("QDRANT_API_KEY"),
            database_url: get("POSTGRES_URL").or_else(|| get("DATABASE_URL")),
            port,
        })
    }
}

fn parse_or<T, F>(get: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            EngineError::Config(format!("{} has an invalid value: '{}'", key, raw))
        }),
        None => Ok(default),
    }
}

fn secs_or<F>(get: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_or(get, key, default.as_secs())?;
    Ok(Duration::from_secs(secs))
}
