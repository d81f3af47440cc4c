//! Session store: the authenticated identity and its transitions.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use chatline_core::{
    ActiveSession, AuthError, ChatApi, Credentials, Session, SessionEpoch, TransportError,
};
use tokio::sync::watch;

/// Holds the current session, if any.
///
/// The only component that sees credentials. Each successful login assigns
/// a fresh [`SessionEpoch`]; watchers observe every transition.
pub struct SessionStore<A: ChatApi> {
    api: Arc<A>,
    state: watch::Sender<Option<ActiveSession>>,
    last_epoch: AtomicU64,
}

impl<A: ChatApi> SessionStore<A> {
    /// Create a store with no session.
    #[must_use]
    pub fn new(api: Arc<A>) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            api,
            state,
            last_epoch: AtomicU64::new(0),
        }
    }

    /// Authenticate and assign the resulting session.
    ///
    /// # Errors
    /// Returns the login failure; no session is assigned in that case.
    pub async fn login(&self, username: &str, password: &str) -> Result<ActiveSession, AuthError> {
        let credentials = Credentials::new(username, password);
        match self.api.login(&credentials).await {
            Ok(session) => Ok(self.assign(session)),
            Err(e) => {
                tracing::warn!(username, "Login rejected: {e}");
                Err(e)
            }
        }
    }

    /// Register a user. Does not assign a session.
    ///
    /// # Errors
    /// Returns error if the server rejects the request or is unreachable.
    pub async fn signup(&self, username: &str, password: &str) -> Result<(), TransportError> {
        let credentials = Credentials::new(username, password);
        self.api.signup(&credentials).await.inspect_err(|e| {
            tracing::warn!(username, "Signup failed: {e}");
        })
    }

    fn assign(&self, session: Session) -> ActiveSession {
        let epoch = SessionEpoch(self.last_epoch.fetch_add(1, Ordering::SeqCst) + 1);
        let active = ActiveSession { epoch, session };
        tracing::info!(%epoch, username = %active.session.username, "Session assigned");
        self.state.send_replace(Some(active.clone()));
        active
    }

    /// Clear the session. Returns the session that was active.
    pub fn reset(&self) -> Option<ActiveSession> {
        let previous = self.state.send_replace(None);
        if let Some(prev) = &previous {
            tracing::info!(epoch = %prev.epoch, "Session cleared");
        }
        previous
    }

    /// The current session with its epoch.
    #[must_use]
    pub fn current(&self) -> Option<ActiveSession> {
        self.state.borrow().clone()
    }

    /// The current identity.
    #[must_use]
    pub fn current_session(&self) -> Option<Session> {
        self.state.borrow().as_ref().map(|a| a.session.clone())
    }

    /// Whether `epoch` is the epoch of the current session.
    #[must_use]
    pub fn is_current(&self, epoch: SessionEpoch) -> bool {
        self.state
            .borrow()
            .as_ref()
            .is_some_and(|a| a.epoch == epoch)
    }

    /// Watch session transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<ActiveSession>> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use chatline_core::UserId;

    fn store() -> (MemoryBackend, SessionStore<MemoryBackend>) {
        let backend = MemoryBackend::new();
        backend.add_user("bob", "right");
        (backend.clone(), SessionStore::new(Arc::new(backend)))
    }

    #[tokio::test]
    async fn test_login_unknown_user() {
        let (_, store) = store();
        assert_eq!(store.login("ghost", "x").await.unwrap_err(), AuthError::NotFound);
        assert!(store.current().is_none());
    }

    #[tokio::test]
    async fn test_login_wrong_password() {
        let (_, store) = store();
        assert_eq!(
            store.login("bob", "wrong").await.unwrap_err(),
            AuthError::InvalidCredentials
        );
        assert!(store.current().is_none());
    }

    #[tokio::test]
    async fn test_login_assigns_session() {
        let (_, store) = store();
        let mut rx = store.subscribe();

        let active = store.login("bob", "right").await.unwrap();
        assert_eq!(active.session.id, UserId(1));
        assert_eq!(active.session.username, "bob");
        assert_eq!(store.current_session(), Some(active.session.clone()));
        assert!(store.is_current(active.epoch));

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref(), Some(&active));
    }

    #[tokio::test]
    async fn test_each_login_gets_new_epoch() {
        let (_, store) = store();
        let first = store.login("bob", "right").await.unwrap();
        let second = store.login("bob", "right").await.unwrap();
        assert!(second.epoch > first.epoch);
        assert!(!store.is_current(first.epoch));
        assert!(store.is_current(second.epoch));
    }

    #[tokio::test]
    async fn test_failed_login_keeps_existing_session() {
        let (_, store) = store();
        let active = store.login("bob", "right").await.unwrap();
        let _ = store.login("bob", "wrong").await;
        assert!(store.is_current(active.epoch));
    }

    #[tokio::test]
    async fn test_unexpected_failure() {
        let (backend, store) = store();
        backend.fail_logins(true);
        assert!(matches!(
            store.login("bob", "right").await.unwrap_err(),
            AuthError::Unexpected(_)
        ));
        assert!(store.current().is_none());
    }

    #[tokio::test]
    async fn test_reset_clears() {
        let (_, store) = store();
        let active = store.login("bob", "right").await.unwrap();
        assert_eq!(store.reset(), Some(active.clone()));
        assert!(store.current().is_none());
        assert!(!store.is_current(active.epoch));
        assert_eq!(store.reset(), None);
    }

    #[tokio::test]
    async fn test_signup_then_login() {
        let (_, store) = store();
        store.signup("dana", "pw").await.unwrap();
        assert!(store.current().is_none());
        assert_eq!(
            store.signup("dana", "pw").await.unwrap_err(),
            TransportError::Status(409)
        );
        let active = store.login("dana", "pw").await.unwrap();
        assert_eq!(active.session.username, "dana");
    }
}
