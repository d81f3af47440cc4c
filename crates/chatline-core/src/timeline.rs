//! Ordered, append-only message timeline with live fan-out.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{Message, traits::SessionEpoch};

/// Capacity of the live fan-out channel. Slow receivers skip lagged entries.
const LIVE_CAPACITY: usize = 256;

/// Where an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySource {
    History,
    Live,
    LocalEcho,
}

#[derive(Default)]
struct Inner {
    /// Visible entries. Only ever grows.
    entries: Vec<Message>,
    /// Live/echo entries that arrived before history.
    pending: Vec<Message>,
    history_loaded: bool,
    sealed: bool,
}

/// Message timeline for one session.
///
/// History always comes first: entries appended before `append_history`
/// are held back and land right after the history batch. `snapshot()` is
/// prefix-stable for the lifetime of the timeline.
pub struct Timeline {
    epoch: SessionEpoch,
    inner: RwLock<Inner>,
    sender: broadcast::Sender<Message>,
}

impl Timeline {
    /// Create an empty timeline bound to a session epoch.
    #[must_use]
    pub fn new(epoch: SessionEpoch) -> Self {
        let (sender, _) = broadcast::channel(LIVE_CAPACITY);
        Self {
            epoch,
            inner: RwLock::new(Inner::default()),
            sender,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Session epoch this timeline belongs to.
    #[must_use]
    pub const fn epoch(&self) -> SessionEpoch {
        self.epoch
    }

    /// Install the history batch. Only the first call has an effect.
    pub fn append_history(&self, history: Vec<Message>) {
        let mut inner = self.write();
        if inner.sealed {
            tracing::debug!(epoch = %self.epoch, "Dropping history for sealed timeline");
            return;
        }
        if inner.history_loaded {
            tracing::warn!(epoch = %self.epoch, "History already loaded, ignoring second batch");
            return;
        }
        inner.history_loaded = true;

        let pending = std::mem::take(&mut inner.pending);
        tracing::debug!(
            epoch = %self.epoch,
            history = history.len(),
            buffered = pending.len(),
            "History loaded"
        );
        for msg in history.into_iter().chain(pending) {
            let _ = self.sender.send(msg.clone());
            inner.entries.push(msg);
        }
    }

    /// Append one inbound push event.
    pub fn append_live(&self, message: Message) {
        self.append(EntrySource::Live, message);
    }

    /// Append the sender's own message after it was persisted.
    pub fn append_local_echo(&self, message: Message) {
        self.append(EntrySource::LocalEcho, message);
    }

    fn append(&self, source: EntrySource, message: Message) {
        let mut inner = self.write();
        if inner.sealed {
            tracing::debug!(epoch = %self.epoch, ?source, "Dropping entry for sealed timeline");
            return;
        }
        if inner.history_loaded {
            let _ = self.sender.send(message.clone());
            inner.entries.push(message);
        } else {
            tracing::trace!(epoch = %self.epoch, ?source, "Buffering entry until history lands");
            inner.pending.push(message);
        }
    }

    /// Stop accepting entries. Used when the owning session is replaced.
    pub fn seal(&self) {
        self.write().sealed = true;
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.read().sealed
    }

    #[must_use]
    pub fn is_history_loaded(&self) -> bool {
        self.read().history_loaded
    }

    /// Number of visible entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries waiting for history.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.read().pending.len()
    }

    /// Visible entries in display order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.read().entries.clone()
    }

    /// Receiver for entries as they become visible.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.sender.subscribe()
    }

    /// Stream that yields the current snapshot, then entries as they become visible.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, Message> {
        let (snapshot, rx) = {
            let inner = self.read();
            (inner.entries.clone(), self.sender.subscribe())
        };

        let hist = futures::stream::iter(snapshot);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }
}
