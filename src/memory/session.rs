//! Session lifecycle: create, resume, close

use crate::error::{within, EngineError};
use crate::models::{Session, SessionStatus};
use crate::store::ConversationStore;
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const MAX_MINT_ATTEMPTS: usize = 4;

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn ConversationStore>,
    timeout: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn ConversationStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    async fn bounded<T, F>(&self, what: &'static str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let limit = self.timeout;
        within(limit, fut, || {
            EngineError::StoreUnavailable(format!("{} timed out after {:?}", what, limit))
        })
        .await
    }

    /// Resume `explicit_session_id` when it names an active session, otherwise
    /// mint and insert a fresh one.
    pub async fn ensure_session(
        &self,
        owner_id: &str,
        kind: &str,
        explicit_session_id: Option<&str>,
    ) -> Result<String> {
        if let Some(id) = explicit_session_id.filter(|id| !id.trim().is_empty()) {
            match self.bounded("session lookup", self.store.find_session(id)).await? {
                Some(session) if session.is_active() => {
                    self.bounded("session touch", self.store.touch_session(id))
                        .await?;
                    debug!(session_id = %id, "Resumed session");
                    return Ok(session.session_id);
                }
                Some(_) => {
                    info!(session_id = %id, "Session is closed, starting a new one");
                }
                None => {
                    info!(session_id = %id, "Session not found, starting a new one");
                }
            }
        }

        for _ in 0..MAX_MINT_ATTEMPTS {
            let session = Session::new(mint_session_id(kind), owner_id, kind);
            if self
                .bounded("session insert", self.store.insert_session(&session))
                .await?
            {
                info!(
                    session_id = %session.session_id,
                    owner_id = %owner_id,
                    kind = %kind,
                    "Created session"
                );
                return Ok(session.session_id);
            }
        }

        Err(EngineError::StoreUnavailable(
            "Could not mint a unique session id".to_string(),
        ))
    }

    pub async fn get(&self, session_id: &str) -> Result<Session> {
        self.bounded("session lookup", self.store.find_session(session_id))
            .await?
            .ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))
    }

    /// Mark a session closed. Sessions are never deleted.
    pub async fn close(&self, session_id: &str) -> Result<()> {
        let updated = self
            .bounded(
                "session close",
                self.store.set_session_status(session_id, SessionStatus::Closed),
            )
            .await?;

        if !updated {
            return Err(EngineError::UnknownSession(session_id.to_string()));
        }
        info!(session_id = %session_id, "Closed session");
        Ok(())
    }

    pub async fn list(&self, owner_id: &str, kind: Option<&str>) -> Result<Vec<Session>> {
        self.bounded("session list", self.store.list_sessions(owner_id, kind))
            .await
    }
}

/// `{kind}_{unix millis}_{8 hex chars}`
fn mint_session_id(kind: &str) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", kind, Utc::now().timestamp_millis(), &random[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HistoryStore;
    use crate::store::InMemoryConversationStore;

    fn manager() -> (SessionManager, Arc<InMemoryConversationStore>) {
        let store = Arc::new(InMemoryConversationStore::new());
        (SessionManager::new(store.clone(), Duration::from_secs(1)), store)
    }

    #[test]
    fn test_minted_id_shape() {
        let id = mint_session_id("finance");
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "finance");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 8);
    }

    #[tokio::test]
    async fn test_new_session_has_empty_history() {
        let (manager, store) = manager();
        let id = manager.ensure_session("u1", "finance", None).await.unwrap();
        assert!(id.starts_with("finance_"));

        let history = HistoryStore::new(store, 10, Duration::from_secs(1));
        assert!(history.read(&id, Some(10)).await.unwrap().is_empty());

        let session = manager.get(&id).await.unwrap();
        assert_eq!(session.owner_id, "u1");
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_explicit_id_is_resumed() {
        let (manager, _) = manager();
        let id = manager.ensure_session("u1", "hr", None).await.unwrap();
        let before = manager.get(&id).await.unwrap().last_activity_at;

        let resumed = manager.ensure_session("u1", "hr", Some(&id)).await.unwrap();
        assert_eq!(resumed, id);
        assert!(manager.get(&id).await.unwrap().last_activity_at >= before);
    }

    #[tokio::test]
    async fn test_unknown_or_closed_id_mints_new() {
        let (manager, _) = manager();
        let fresh = manager
            .ensure_session("u1", "finance", Some("finance_0_deadbeef"))
            .await
            .unwrap();
        assert_ne!(fresh, "finance_0_deadbeef");

        manager.close(&fresh).await.unwrap();
        let next = manager.ensure_session("u1", "finance", Some(&fresh)).await.unwrap();
        assert_ne!(next, fresh);
        assert_eq!(manager.get(&fresh).await.unwrap().status, SessionStatus::Closed);
    }

    #[tokio::test]
    async fn test_close_unknown_session() {
        let (manager, _) = manager();
        assert!(matches!(
            manager.close("missing").await,
            Err(EngineError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn test_store_outage_fails_loudly() {
        let manager = SessionManager::new(
            Arc::new(crate::testing::StalledStore),
            Duration::from_millis(20),
        );
        let err = manager.ensure_session("u1", "finance", None).await.unwrap_err();
        assert!(matches!(err, EngineError::StoreUnavailable(_)));
    }
}
