//! Core abstractions for the chatline client.
//!
//! This crate provides the fundamental building blocks:
//! - `Message` / `WireMessage` - Timeline entries and their wire shape
//! - `Timeline` - Ordered, append-only view with history-first merge
//! - `ClientConfig` - Server endpoints and timing knobs
//! - `ChatApi` / `PushChannel` traits and the error taxonomy

pub mod config;
pub mod message;
pub mod subscribers;
pub mod timeline;
pub mod traits;

pub use config::{ClientConfig, ConfigError};
pub use message::{Message, RoomId, WireMessage};
pub use subscribers::Subscribers;
pub use timeline::Timeline;
pub use traits::{
    ActiveSession, AuthError, ChatApi, ConnectionError, Credentials, PushChannel, PushConnection,
    Session, SessionEpoch, TransportError, UserId,
};
