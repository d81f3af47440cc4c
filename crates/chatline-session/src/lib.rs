//! Session lifecycle and timeline sync for the chatline client.
//!
//! Provides:
//! - `SessionStore` - Authenticated identity and its transitions
//! - `HistoryLoader` - One-shot backlog fetch
//! - `ConnectionManager` - Push connection bound to the current session
//! - `SendPipeline` - Guarded send with local echo
//! - `ChatClient` - Wires them together
//! - `MemoryBackend` - In-process server (feature: memory)

pub mod client;
pub mod connection;
pub mod history;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
pub mod send;
pub mod store;

pub use client::ChatClient;
pub use connection::{ConnectionManager, ConnectionState};
pub use history::HistoryLoader;
#[cfg(any(test, feature = "memory"))]
pub use memory::MemoryBackend;
pub use send::{GuardPermit, SendError, SendGuard, SendPipeline};
pub use store::SessionStore;
