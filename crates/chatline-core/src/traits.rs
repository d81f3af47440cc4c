//! Session types, error taxonomy and the transport seams.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{Message, RoomId};

/// Server-side user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque user identifier.
    pub id: UserId,
    /// Display name used as message author.
    pub username: String,
}

/// Generation counter bumped on every session assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionEpoch(pub u64);

impl fmt::Display for SessionEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A session together with the epoch it was assigned in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub epoch: SessionEpoch,
    pub session: Session,
}

/// Login/signup request body.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// User record returned by `POST /auth/login`.
#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl From<UserRecord> for Session {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            username: user.username,
        }
    }
}

/// `POST /message/create` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessage {
    pub content: String,
    pub user_id: UserId,
    pub room_id: RoomId,
}

/// Login failure, one variant per user-visible notification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("User not found")]
    NotFound,
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Login failed: {0}")]
    Unexpected(String),
}

/// Request/response failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Unexpected status: {0}")]
    Status(u16),
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Push channel failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Connection closed")]
    Closed,
    #[error("Encode error: {0}")]
    Encode(String),
}

/// Request/response boundary of the chat server.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Authenticate and return the identity.
    async fn login(&self, credentials: &Credentials) -> Result<Session, AuthError>;

    /// Register a new user.
    async fn signup(&self, credentials: &Credentials) -> Result<(), TransportError>;

    /// Fetch the full message backlog of a room, oldest first.
    async fn fetch_messages(&self, room: RoomId) -> Result<Vec<Message>, TransportError>;

    /// Persist a message.
    async fn create_message(&self, request: &CreateMessage) -> Result<(), TransportError>;
}

/// Identifier of a single push connection, for logs.
pub type ConnectionId = Uuid;

/// Callback invoked for every inbound `message` event.
///
/// Handlers run on the connection's reader task and must not call back into
/// `subscribe`/`unsubscribe` of the same connection.
pub type EventHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Handle returned by [`PushConnection::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(pub Uuid);

impl SubscriptionToken {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A live push-channel connection.
pub trait PushConnection: Send + Sync {
    /// Connection identifier.
    fn id(&self) -> ConnectionId;

    /// Register a handler for inbound `message` events.
    fn subscribe(&self, handler: EventHandler) -> SubscriptionToken;

    /// Remove a handler. Once this returns the handler is not running and
    /// will not be called again.
    fn unsubscribe(&self, token: SubscriptionToken);

    /// Emit a `message` event to the other participants.
    ///
    /// # Errors
    /// Returns error if the connection is closed or the payload cannot be encoded.
    fn publish(&self, message: &Message) -> Result<(), ConnectionError>;

    /// Close the connection. Idempotent; no handler runs after it returns.
    fn close(&self);

    /// Whether the connection has stopped delivering events.
    fn is_closed(&self) -> bool;
}

/// Factory for push connections.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Perform the handshake and return an open connection.
    async fn connect(&self) -> Result<Arc<dyn PushConnection>, ConnectionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_record_drops_password() {
        let json = r#"{"id":1,"username":"bob","password":"$argon2id$..."}"#;
        let record: UserRecord = serde_json::from_str(json).unwrap();
        let session = Session::from(record);
        assert_eq!(
            session,
            Session {
                id: UserId(1),
                username: "bob".to_string()
            }
        );
    }

    #[test]
    fn test_create_message_body() {
        let body = CreateMessage {
            content: "hello".to_string(),
            user_id: UserId(4),
            room_id: RoomId(1),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({"content": "hello", "userId": 4, "roomId": 1}));
    }

    #[test]
    fn test_auth_errors_are_distinct() {
        let notices = [
            AuthError::NotFound.to_string(),
            AuthError::InvalidCredentials.to_string(),
            AuthError::Unexpected("500".to_string()).to_string(),
        ];
        assert_eq!(notices[0], "User not found");
        assert_eq!(notices[1], "Invalid username or password");
        assert_ne!(notices[2], notices[0]);
        assert_ne!(notices[2], notices[1]);
    }
}
