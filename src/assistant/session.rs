//! Correspondent → assistant session mapping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info};

use super::AssistantBackend;
use crate::error::AssistantError;

/// How long a correspondent's session is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRetention {
    /// Never evicted; lives until the process exits.
    ProcessLifetime,
    /// Dropped once unused for longer than the given duration.
    IdleTtl(Duration),
}

#[derive(Debug, Clone)]
struct SessionEntry {
    session_id: String,
    last_used: Instant,
}

impl SessionEntry {
    fn is_expired(&self, retention: SessionRetention, now: Instant) -> bool {
        match retention {
            SessionRetention::ProcessLifetime => false,
            SessionRetention::IdleTtl(ttl) => now.duration_since(self.last_used) > ttl,
        }
    }
}

/// Lazily created sessions, one per correspondent.
pub struct SessionStore {
    backend: Arc<dyn AssistantBackend>,
    retention: SessionRetention,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn AssistantBackend>, retention: SessionRetention) -> Self {
        Self {
            backend,
            retention,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Return the correspondent's session, creating it on first contact.
    ///
    /// The map stays locked while a new session is created so a correspondent
    /// never ends up with two.
    pub async fn get_or_create(&self, correspondent: &str) -> Result<String, AssistantError> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        if let Some(entry) = sessions.get_mut(correspondent) {
            if !entry.is_expired(self.retention, now) {
                entry.last_used = now;
                debug!(
                    correspondent = correspondent,
                    session_id = %entry.session_id,
                    "Using existing session"
                );
                return Ok(entry.session_id.clone());
            }
            info!(
                correspondent = correspondent,
                session_id = %entry.session_id,
                "Session idle past retention, starting a new one"
            );
            sessions.remove(correspondent);
        }

        let session_id = self.backend.create_session().await?;
        info!(
            correspondent = correspondent,
            session_id = %session_id,
            "Created new session"
        );
        sessions.insert(
            correspondent.to_string(),
            SessionEntry {
                session_id: session_id.clone(),
                last_used: now,
            },
        );
        Ok(session_id)
    }

    /// Look up a session without creating one.
    pub async fn get(&self, correspondent: &str) -> Option<String> {
        self.sessions
            .read()
            .await
            .get(correspondent)
            .map(|e| e.session_id.clone())
    }

    /// Drop every session idle past the retention window. Returns how many were dropped.
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| !entry.is_expired(self.retention, now));
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, "Evicted idle sessions");
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::assistant::{SessionMessage, ToolOutput, Turn};

    /// Backend that only knows how to create sessions.
    #[derive(Default)]
    struct CountingBackend {
        created: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl AssistantBackend for CountingBackend {
        async fn create_session(&self) -> Result<String, AssistantError> {
            if self.fail {
                return Err(AssistantError::Api {
                    status: 503,
                    message: "unavailable".into(),
                });
            }
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(format!("thread_{n}"))
        }
        async fn append_user_message(&self, _: &str, _: &str) -> Result<String, AssistantError> {
            unimplemented!()
        }
        async fn start_turn(&self, _: &str) -> Result<Turn, AssistantError> {
            unimplemented!()
        }
        async fn get_turn(&self, _: &str, _: &str) -> Result<Turn, AssistantError> {
            unimplemented!()
        }
        async fn submit_tool_outputs(
            &self,
            _: &str,
            _: &str,
            _: Vec<ToolOutput>,
        ) -> Result<Turn, AssistantError> {
            unimplemented!()
        }
        async fn list_messages(&self, _: &str) -> Result<Vec<SessionMessage>, AssistantError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn lookup_is_idempotent() {
        let backend = Arc::new(CountingBackend::default());
        let store = SessionStore::new(backend.clone(), SessionRetention::ProcessLifetime);

        let first = store.get_or_create("jane@example.com").await.unwrap();
        let second = store.get_or_create("jane@example.com").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn correspondents_get_separate_sessions() {
        let backend = Arc::new(CountingBackend::default());
        let store = SessionStore::new(backend.clone(), SessionRetention::ProcessLifetime);

        let jane = store.get_or_create("jane@example.com").await.unwrap();
        let john = store.get_or_create("john@example.com").await.unwrap();

        assert_ne!(jane, john);
        assert_eq!(store.len().await, 2);
        assert_eq!(store.get("jane@example.com").await, Some(jane));
    }

    #[tokio::test]
    async fn creation_failure_propagates_and_records_nothing() {
        let backend = Arc::new(CountingBackend {
            fail: true,
            ..Default::default()
        });
        let store = SessionStore::new(backend, SessionRetention::ProcessLifetime);

        let err = store.get_or_create("jane@example.com").await.unwrap_err();
        assert!(matches!(err, AssistantError::Api { status: 503, .. }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn idle_session_is_replaced() {
        let backend = Arc::new(CountingBackend::default());
        let store = SessionStore::new(
            backend.clone(),
            SessionRetention::IdleTtl(Duration::from_millis(20)),
        );

        let first = store.get_or_create("jane@example.com").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let second = store.get_or_create("jane@example.com").await.unwrap();

        assert_ne!(first, second);
        assert_eq!(backend.created.load(Ordering::SeqCst), 2);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn evict_idle_respects_retention() {
        let backend = Arc::new(CountingBackend::default());
        let forever = SessionStore::new(backend.clone(), SessionRetention::ProcessLifetime);
        forever.get_or_create("jane@example.com").await.unwrap();
        assert_eq!(forever.evict_idle().await, 0);

        let ttl = SessionStore::new(backend, SessionRetention::IdleTtl(Duration::from_millis(10)));
        ttl.get_or_create("jane@example.com").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(ttl.evict_idle().await, 1);
        assert!(ttl.is_empty().await);
    }
}
