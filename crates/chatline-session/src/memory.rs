//! In-memory chat server.
//!
//! Implements both [`ChatApi`] and [`PushChannel`] in process. Useful for
//! tests and offline demos; data is lost on drop. Fault and latency knobs
//! let callers hold or fail individual calls.

use std::{
    collections::HashMap,
    sync::{
        Arc, PoisonError, RwLock, Weak,
        atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chatline_core::{
    AuthError, ChatApi, ConnectionError, Credentials, Message, PushChannel, PushConnection, RoomId,
    Session, Subscribers, TransportError, UserId,
    traits::{ConnectionId, CreateMessage, EventHandler, SubscriptionToken},
};
use tokio::sync::watch;
use uuid::Uuid;

/// A pass-through point that can be held shut.
struct Gate {
    open: watch::Sender<bool>,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            open: watch::channel(true).0,
        }
    }
}

impl Gate {
    fn hold(&self) {
        self.open.send_replace(false);
    }

    fn release(&self) {
        self.open.send_replace(true);
    }

    async fn pass(&self) {
        let mut rx = self.open.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

#[derive(Default)]
struct Faults {
    login: AtomicBool,
    history: AtomicBool,
    create: AtomicBool,
    handshake: AtomicBool,
}

struct StoredUser {
    id: UserId,
    password: String,
}

#[derive(Default)]
struct Shared {
    users: RwLock<HashMap<String, StoredUser>>,
    last_user_id: AtomicI64,
    messages: RwLock<Vec<Message>>,
    connections: RwLock<Vec<Arc<MemoryConnection>>>,
    published: RwLock<Vec<Message>>,
    echo_to_sender: AtomicBool,
    faults: Faults,
    history_gate: Gate,
    create_gate: Gate,
    handshake_gate: Gate,
    history_calls: AtomicUsize,
    create_calls: AtomicUsize,
}

impl Shared {
    fn insert_user(&self, username: &str, password: &str) -> Option<UserId> {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        if users.contains_key(username) {
            return None;
        }
        let id = UserId(self.last_user_id.fetch_add(1, Ordering::SeqCst) + 1);
        users.insert(
            username.to_string(),
            StoredUser {
                id,
                password: password.to_string(),
            },
        );
        Some(id)
    }

    fn deliver(&self, from: Option<ConnectionId>, message: &Message) {
        let echo = self.echo_to_sender.load(Ordering::SeqCst);
        let connections = self.connections.read().unwrap_or_else(PoisonError::into_inner);
        for conn in connections.iter() {
            if echo || Some(conn.id) != from {
                conn.deliver(message);
            }
        }
    }
}

/// In-memory chat server.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    /// Create an empty server.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user directly. Returns the existing id if the name is taken.
    pub fn add_user(&self, username: &str, password: &str) -> UserId {
        if let Some(id) = self.shared.insert_user(username, password) {
            return id;
        }
        self.shared
            .users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(username)
            .map_or(UserId(0), |u| u.id)
    }

    /// Append a message to the backlog without any client involvement.
    pub fn seed_message(&self, author: &str, content: &str) {
        self.shared
            .messages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Message::new(author, content));
    }

    /// Push a message to every open connection, as another participant would.
    pub fn broadcast(&self, message: &Message) {
        self.shared.deliver(None, message);
    }

    /// Whether a connection also receives its own publishes.
    pub fn set_echo_to_sender(&self, echo: bool) {
        self.shared.echo_to_sender.store(echo, Ordering::SeqCst);
    }

    /// Simulate the network dropping every connection.
    pub fn drop_connections(&self) {
        for conn in self
            .shared
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            conn.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Number of connections still delivering.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.shared
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| !c.closed.load(Ordering::SeqCst))
            .count()
    }

    /// Persisted messages, oldest first.
    #[must_use]
    pub fn stored_messages(&self) -> Vec<Message> {
        self.shared
            .messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Messages published by clients, in order.
    #[must_use]
    pub fn published(&self) -> Vec<Message> {
        self.shared
            .published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn history_calls(&self) -> usize {
        self.shared.history_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.shared.create_calls.load(Ordering::SeqCst)
    }

    pub fn fail_logins(&self, fail: bool) {
        self.shared.faults.login.store(fail, Ordering::SeqCst);
    }

    pub fn fail_history(&self, fail: bool) {
        self.shared.faults.history.store(fail, Ordering::SeqCst);
    }

    pub fn fail_creates(&self, fail: bool) {
        self.shared.faults.create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_handshakes(&self, fail: bool) {
        self.shared.faults.handshake.store(fail, Ordering::SeqCst);
    }

    /// Park backlog fetches until [`release_history`](Self::release_history).
    pub fn hold_history(&self) {
        self.shared.history_gate.hold();
    }

    pub fn release_history(&self) {
        self.shared.history_gate.release();
    }

    /// Park message creation until [`release_creates`](Self::release_creates).
    pub fn hold_creates(&self) {
        self.shared.create_gate.hold();
    }

    pub fn release_creates(&self) {
        self.shared.create_gate.release();
    }

    /// Park push handshakes until [`release_handshakes`](Self::release_handshakes).
    pub fn hold_handshakes(&self) {
        self.shared.handshake_gate.hold();
    }

    pub fn release_handshakes(&self) {
        self.shared.handshake_gate.release();
    }
}

#[async_trait]
impl ChatApi for MemoryBackend {
    async fn login(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        if self.shared.faults.login.load(Ordering::SeqCst) {
            return Err(AuthError::Unexpected("status 500".to_string()));
        }
        let users = self
            .shared
            .users
            .read()
            .map_err(|e| AuthError::Unexpected(e.to_string()))?;
        let user = users.get(&credentials.username).ok_or(AuthError::NotFound)?;
        if user.password != credentials.password {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(Session {
            id: user.id,
            username: credentials.username.clone(),
        })
    }

    async fn signup(&self, credentials: &Credentials) -> Result<(), TransportError> {
        self.shared
            .insert_user(&credentials.username, &credentials.password)
            .map(|_| ())
            .ok_or(TransportError::Status(409))
    }

    async fn fetch_messages(&self, _room: RoomId) -> Result<Vec<Message>, TransportError> {
        self.shared.history_calls.fetch_add(1, Ordering::SeqCst);
        self.shared.history_gate.pass().await;
        if self.shared.faults.history.load(Ordering::SeqCst) {
            return Err(TransportError::Http("connection reset".to_string()));
        }
        Ok(self
            .shared
            .messages
            .read()
            .map_err(|e| TransportError::Http(e.to_string()))?
            .clone())
    }

    async fn create_message(&self, request: &CreateMessage) -> Result<(), TransportError> {
        self.shared.create_calls.fetch_add(1, Ordering::SeqCst);
        self.shared.create_gate.pass().await;
        if self.shared.faults.create.load(Ordering::SeqCst) {
            return Err(TransportError::Status(500));
        }
        let author = self
            .shared
            .users
            .read()
            .map_err(|e| TransportError::Http(e.to_string()))?
            .iter()
            .find(|(_, u)| u.id == request.user_id)
            .map(|(name, _)| name.clone())
            .ok_or(TransportError::Status(404))?;
        self.shared
            .messages
            .write()
            .map_err(|e| TransportError::Http(e.to_string()))?
            .push(Message::new(author, request.content.clone()));
        Ok(())
    }
}

#[async_trait]
impl PushChannel for MemoryBackend {
    async fn connect(&self) -> Result<Arc<dyn PushConnection>, ConnectionError> {
        if self.shared.faults.handshake.load(Ordering::SeqCst) {
            return Err(ConnectionError::Handshake("connection refused".to_string()));
        }
        self.shared.handshake_gate.pass().await;

        let conn = Arc::new(MemoryConnection {
            id: Uuid::new_v4(),
            subscribers: Subscribers::new(),
            closed: AtomicBool::new(false),
            server: Arc::downgrade(&self.shared),
        });
        self.shared
            .connections
            .write()
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?
            .push(Arc::clone(&conn));
        Ok(conn)
    }
}

/// Connection to a [`MemoryBackend`].
pub struct MemoryConnection {
    id: ConnectionId,
    subscribers: Subscribers,
    closed: AtomicBool,
    server: Weak<Shared>,
}

impl MemoryConnection {
    fn deliver(&self, message: &Message) {
        if !self.closed.load(Ordering::SeqCst) {
            self.subscribers.dispatch(message);
        }
    }
}

impl PushConnection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn subscribe(&self, handler: EventHandler) -> SubscriptionToken {
        self.subscribers.subscribe(handler)
    }

    fn unsubscribe(&self, token: SubscriptionToken) {
        self.subscribers.unsubscribe(token);
    }

    fn publish(&self, message: &Message) -> Result<(), ConnectionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        let server = self.server.upgrade().ok_or(ConnectionError::Closed)?;
        server
            .published
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        server.deliver(Some(self.id), message);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers.clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn collecting(conn: &Arc<dyn PushConnection>) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        conn.subscribe(Arc::new(move |m: Message| {
            sink.lock().unwrap().push(m.to_string());
        }));
        seen
    }

    #[tokio::test]
    async fn test_publish_reaches_other_connections_only() {
        let backend = MemoryBackend::new();
        let alice = backend.connect().await.unwrap();
        let bob = backend.connect().await.unwrap();
        let alice_seen = collecting(&alice);
        let bob_seen = collecting(&bob);

        bob.publish(&Message::new("bob", "hi")).unwrap();
        assert_eq!(*alice_seen.lock().unwrap(), vec!["bob: hi".to_string()]);
        assert!(bob_seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_echo_to_sender() {
        let backend = MemoryBackend::new();
        backend.set_echo_to_sender(true);
        let bob = backend.connect().await.unwrap();
        let seen = collecting(&bob);

        bob.publish(&Message::new("bob", "hi")).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["bob: hi".to_string()]);
    }

    #[tokio::test]
    async fn test_create_requires_known_user() {
        let backend = MemoryBackend::new();
        let request = CreateMessage {
            content: "x".to_string(),
            user_id: UserId(42),
            room_id: RoomId(1),
        };
        assert_eq!(
            backend.create_message(&request).await.unwrap_err(),
            TransportError::Status(404)
        );
    }

    #[test]
    fn test_add_user_is_idempotent() {
        let backend = MemoryBackend::new();
        let first = backend.add_user("bob", "a");
        let again = backend.add_user("bob", "b");
        let other = backend.add_user("carol", "c");
        assert_eq!(first, again);
        assert_ne!(first, other);
    }
}
