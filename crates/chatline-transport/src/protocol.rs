//! Push channel wire protocol.
//!
//! Every WebSocket text frame carries one JSON envelope:
//! `{"event": "message", "data": {"content": "...", "userId": {"username": "..."}}}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use chatline_core::{Message, WireMessage};

/// Name of the chat message event.
pub const MESSAGE_EVENT: &str = "message";

/// Frame envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A chat message.
    Message(Message),
    /// An event this client does not handle.
    Other(String),
}

/// Frame codec error.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decode a text frame.
///
/// # Errors
/// Returns error if the frame is not an envelope or a `message` payload is malformed.
pub fn decode_frame(text: &str) -> Result<InboundFrame, FrameError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    if envelope.event != MESSAGE_EVENT {
        return Ok(InboundFrame::Other(envelope.event));
    }
    let wire: WireMessage = serde_json::from_value(envelope.data)?;
    Ok(InboundFrame::Message(wire.into()))
}

/// Encode a `message` event.
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode_message(message: &Message) -> Result<String, FrameError> {
    let envelope = Envelope {
        event: MESSAGE_EVENT.to_string(),
        data: serde_json::to_value(WireMessage::from(message))?,
    };
    Ok(serde_json::to_string(&envelope)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_message_frame() {
        let text = r#"{"event":"message","data":{"content":"yo","userId":{"username":"alice"}}}"#;
        let frame = decode_frame(text).unwrap();
        assert_eq!(frame, InboundFrame::Message(Message::new("alice", "yo")));
    }

    #[test]
    fn test_unknown_event_is_reported() {
        let frame = decode_frame(r#"{"event":"typing","data":{"username":"bob"}}"#).unwrap();
        assert_eq!(frame, InboundFrame::Other("typing".to_string()));
    }

    #[test]
    fn test_malformed_frames() {
        assert!(decode_frame("not json").is_err());
        assert!(decode_frame(r#"{"event":"message","data":{"content":"x"}}"#).is_err());
    }

    #[test]
    fn test_encode_message_shape() {
        let json = encode_message(&Message::new("bob", "hello")).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], "message");
        assert_eq!(value["data"]["content"], "hello");
        assert_eq!(value["data"]["userId"]["username"], "bob");
    }
}
