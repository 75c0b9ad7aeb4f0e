//! Error types for the conversation engine

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {

    // =============================
    // Turn-fatal Errors
    // =============================

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    // =============================
    // Contained Errors
    // =============================

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Retrieval degraded: {0}")]
    RetrievalDegraded(String),

    #[error("Tool directive parse error: {0}")]
    ToolParseError(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool execution error: {0}")]
    ToolExecutionError(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    // =============================
    // Setup / Request Errors
    // =============================

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl EngineError {
    /// Only store failures and session inconsistencies abort a turn.
    /// Everything else is converted into a degraded-but-successful outcome.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::StoreUnavailable(_) | EngineError::UnknownSession(_)
        )
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::StoreUnavailable(e.to_string())
    }
}

/// Await `fut` for at most `limit`; on expiry the error from `on_timeout` is returned.
pub async fn within<T, F, E>(limit: Duration, fut: F, on_timeout: E) -> Result<T>
where
    F: Future<Output = Result<T>>,
    E: FnOnce() -> EngineError,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_kinds() {
        assert!(EngineError::StoreUnavailable("down".into()).is_fatal());
        assert!(EngineError::UnknownSession("s1".into()).is_fatal());
        assert!(!EngineError::ModelUnavailable("503".into()).is_fatal());
        assert!(!EngineError::RetrievalDegraded("index".into()).is_fatal());
        assert!(!EngineError::UnknownTool("nope".into()).is_fatal());
    }

    #[test]
    fn test_sqlx_error_maps_to_store_unavailable() {
        let err: EngineError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, EngineError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_within_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, EngineError>(1)
        };
        let result = within(Duration::from_millis(10), slow, || {
            EngineError::ModelUnavailable("slow".into())
        })
        .await;
        assert!(matches!(result, Err(EngineError::ModelUnavailable(_))));

        let fast = within(Duration::from_secs(1), async { Ok::<_, EngineError>(7) }, || {
            EngineError::ModelUnavailable("fast".into())
        })
        .await;
        assert_eq!(fast.unwrap(), 7);
    }
}
