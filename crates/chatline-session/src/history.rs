//! One-shot backlog fetch.

use std::sync::Arc;

use chatline_core::{ChatApi, Message, RoomId};

/// Loads the message backlog of a room.
pub struct HistoryLoader<A: ChatApi> {
    api: Arc<A>,
}

impl<A: ChatApi> HistoryLoader<A> {
    #[must_use]
    pub const fn new(api: Arc<A>) -> Self {
        Self { api }
    }

    /// Fetch the backlog, oldest first. Failures are logged and yield nothing.
    pub async fn load(&self, room: RoomId) -> Vec<Message> {
        match self.api.fetch_messages(room).await {
            Ok(messages) => {
                tracing::debug!(%room, count = messages.len(), "History fetched");
                messages
            }
            Err(e) => {
                tracing::warn!(%room, "Failed to load history: {e}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    #[tokio::test]
    async fn test_load_returns_backlog_in_order() {
        let backend = MemoryBackend::new();
        backend.seed_message("bob", "hi");
        backend.seed_message("alice", "yo");

        let loader = HistoryLoader::new(Arc::new(backend));
        let messages = loader.load(RoomId(1)).await;
        assert_eq!(messages, vec![Message::new("bob", "hi"), Message::new("alice", "yo")]);
    }

    #[tokio::test]
    async fn test_load_fails_soft() {
        let backend = MemoryBackend::new();
        backend.seed_message("bob", "hi");
        backend.fail_history(true);

        let loader = HistoryLoader::new(Arc::new(backend.clone()));
        assert!(loader.load(RoomId(1)).await.is_empty());
        assert_eq!(backend.history_calls(), 1);
    }
}
