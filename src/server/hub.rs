//! Registry of live sessions

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::info;
use uuid::Uuid;

use super::actor::{self, SessionHandle};
use crate::config::PartyConfig;
use crate::error::PartyError;

/// Builds the URL a phone opens to join a session (usually shown as a QR code)
pub trait JoinUrlProvider: Send + Sync {
    fn join_url(&self, session_id: &str) -> String;
}

/// `{base}/controller?session={id}`
#[derive(Debug, Clone)]
pub struct BaseUrl {
    base: String,
}

impl BaseUrl {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }
}

impl JoinUrlProvider for BaseUrl {
    fn join_url(&self, session_id: &str) -> String {
        format!("{}/controller?session={}", self.base, session_id)
    }
}

pub struct Hub {
    config: PartyConfig,
    join_urls: Arc<dyn JoinUrlProvider>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl Hub {
    pub fn new(config: PartyConfig, join_urls: Arc<dyn JoinUrlProvider>) -> Arc<Self> {
        Arc::new(Self {
            config,
            join_urls,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &PartyConfig {
        &self.config
    }

    pub fn join_url(&self, session_id: &str) -> String {
        self.join_urls.join_url(session_id)
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn a session actor under a fresh id
    pub fn create(&self) -> SessionHandle {
        let id = Uuid::new_v4().simple().to_string();
        let handle = actor::spawn(id.clone(), &self.config);
        info!(session = %id, "session created");
        let mut sessions = self.sessions();
        sessions.retain(|_, h| !h.is_closed());
        sessions.insert(id, handle.clone());
        handle
    }

    /// Running session by id
    pub fn get(&self, session_id: &str) -> Result<SessionHandle, PartyError> {
        let mut sessions = self.sessions();
        match sessions.get(session_id) {
            Some(handle) if !handle.is_closed() => Ok(handle.clone()),
            Some(_) => {
                sessions.remove(session_id);
                Err(PartyError::SessionNotFound(session_id.to_string()))
            }
            None => Err(PartyError::SessionNotFound(session_id.to_string())),
        }
    }

    /// The requested session if it is still running, otherwise a new one
    pub fn for_display(&self, requested: Option<&str>) -> SessionHandle {
        requested
            .and_then(|id| self.get(id).ok())
            .unwrap_or_else(|| self.create())
    }

    /// Number of running sessions
    pub fn len(&self) -> usize {
        self.sessions().values().filter(|h| !h.is_closed()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::actor::Join;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn hub() -> Arc<Hub> {
        Hub::new(PartyConfig::default(), Arc::new(BaseUrl::new("http://192.168.1.20:8080/")))
    }

    #[test]
    fn test_join_url() {
        assert_eq!(
            BaseUrl::new("http://192.168.1.20:8080/").join_url("abc"),
            "http://192.168.1.20:8080/controller?session=abc"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_reuses_running_session() {
        let hub = hub();
        let first = hub.for_display(None);
        assert_eq!(hub.len(), 1);
        let again = hub.for_display(Some(first.id()));
        assert_eq!(again.id(), first.id());
        assert!(matches!(hub.get("missing"), Err(PartyError::SessionNotFound(_))));

        // once the last socket leaves the session is gone
        let (tx, _rx) = mpsc::unbounded_channel();
        let display = Uuid::new_v4();
        first.attach(display, Join::Display, tx).unwrap();
        first.detach(display);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(hub.get(first.id()).is_err());
        let fresh = hub.for_display(Some(first.id()));
        assert_ne!(fresh.id(), first.id());
        assert_eq!(hub.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unattached_session_is_dropped() {
        let hub = hub();
        let orphan = hub.create();
        assert_eq!(hub.len(), 1);

        tokio::time::sleep(actor::ATTACH_GRACE + Duration::from_millis(1)).await;
        assert!(orphan.is_closed());
        assert!(hub.is_empty());
        assert!(matches!(hub.get(orphan.id()), Err(PartyError::SessionNotFound(_))));
    }
}
