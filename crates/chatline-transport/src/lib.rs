//! Transport layer for the chatline client.
//!
//! Provides:
//! - Push frame protocol (JSON envelope)
//! - REST client (`HttpChatApi`)
//! - WebSocket push channel (`WsPushChannel`)

pub mod http;
pub mod protocol;
pub mod websocket;

pub use http::HttpChatApi;
pub use protocol::{InboundFrame, MESSAGE_EVENT};
pub use websocket::{WsConnection, WsPushChannel};
