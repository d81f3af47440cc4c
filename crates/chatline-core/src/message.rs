//! Chat message records and their wire shape.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Room identifier. The client only ever talks to one room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub i64);

impl Default for RoomId {
    fn default() -> Self {
        Self(1)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A chat message as shown in the timeline.
///
/// Immutable once built; the transport gives no identity, so two messages
/// with the same author and content are indistinguishable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    author: String,
    content: String,
}

impl Message {
    /// Create a message.
    #[must_use]
    pub fn new(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            content: content.into(),
        }
    }

    /// Author display name.
    #[must_use]
    pub fn author(&self) -> &str {
        &self.author
    }

    /// Message text.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.author, self.content)
    }
}

/// Author reference as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireAuthor {
    pub username: String,
}

/// Message payload shared by `GET /message/all` and the `message` push event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub content: String,
    #[serde(rename = "userId")]
    pub user_id: WireAuthor,
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        Self::new(wire.user_id.username, wire.content)
    }
}

impl From<&Message> for WireMessage {
    fn from(msg: &Message) -> Self {
        Self {
            content: msg.content.clone(),
            user_id: WireAuthor {
                username: msg.author.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_joins_author_and_content() {
        assert_eq!(Message::new("bob", "hi").to_string(), "bob: hi");
        assert_eq!(Message::new("bob", "").to_string(), "bob: ");
    }

    #[test]
    fn test_wire_shape() {
        let json = r#"{"content":"yo","userId":{"username":"alice"}}"#;
        let wire: WireMessage = serde_json::from_str(json).unwrap();
        let msg = Message::from(wire);
        assert_eq!(msg.author(), "alice");
        assert_eq!(msg.content(), "yo");

        let back = serde_json::to_value(WireMessage::from(&msg)).unwrap();
        assert_eq!(back["userId"]["username"], "alice");
        assert_eq!(back["content"], "yo");
    }

    #[test]
    fn test_wire_ignores_extra_fields() {
        let json = r#"{"id":7,"content":"x","userId":{"id":3,"username":"bob","password":"h"}}"#;
        let wire: WireMessage = serde_json::from_str(json).unwrap();
        assert_eq!(wire.user_id.username, "bob");
    }
}
