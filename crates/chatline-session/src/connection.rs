//! Push connection lifecycle.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use chatline_core::{
    ConnectionError, Message, PushChannel, PushConnection, SessionEpoch, Timeline,
    traits::{ConnectionId, SubscriptionToken},
};

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session, no connection.
    Idle,
    /// Handshake in progress for a session.
    Connecting { epoch: SessionEpoch },
    /// Receiving events for a session.
    Open {
        epoch: SessionEpoch,
        connection_id: ConnectionId,
    },
}

enum Slot {
    Idle,
    Connecting {
        epoch: SessionEpoch,
        attempt: u64,
        /// Publishes issued before the handshake finished.
        pending: Vec<Message>,
    },
    Open {
        epoch: SessionEpoch,
        connection: Arc<dyn PushConnection>,
        token: SubscriptionToken,
    },
}

impl Slot {
    const fn epoch(&self) -> Option<SessionEpoch> {
        match self {
            Self::Idle => None,
            Self::Connecting { epoch, .. } | Self::Open { epoch, .. } => Some(*epoch),
        }
    }
}

/// Owns the push connection of the current session.
///
/// The only place connections are created or destroyed. At most one
/// connection is open, and it always belongs to the newest session that
/// asked for one.
pub struct ConnectionManager<P: PushChannel> {
    channel: P,
    slot: Mutex<Slot>,
    attempts: AtomicU64,
}

impl<P: PushChannel> ConnectionManager<P> {
    #[must_use]
    pub const fn new(channel: P) -> Self {
        Self {
            channel,
            slot: Mutex::new(Slot::Idle),
            attempts: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        match &*self.lock() {
            Slot::Idle => ConnectionState::Idle,
            Slot::Connecting { epoch, .. } => ConnectionState::Connecting { epoch: *epoch },
            Slot::Open {
                epoch, connection, ..
            } => ConnectionState::Open {
                epoch: *epoch,
                connection_id: connection.id(),
            },
        }
    }

    /// Whether the open connection has stopped delivering events.
    ///
    /// `None` when no connection is open.
    #[must_use]
    pub fn is_dropped(&self) -> Option<bool> {
        match &*self.lock() {
            Slot::Open { connection, .. } => Some(connection.is_closed()),
            _ => None,
        }
    }

    /// Connect for `epoch` and forward every inbound message into `timeline`.
    ///
    /// Any existing connection is closed first. If the manager is closed or
    /// re-targeted while the handshake is pending, the new connection is
    /// closed without ever being subscribed.
    ///
    /// # Errors
    /// Returns the handshake failure, or `Closed` if the connection was
    /// superseded before it opened.
    pub async fn open(&self, epoch: SessionEpoch, timeline: Arc<Timeline>) -> Result<(), ConnectionError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut slot = self.lock();
            if slot.epoch().is_some_and(|current| current > epoch) {
                tracing::debug!(%epoch, "Refusing connect for superseded session");
                return Err(ConnectionError::Closed);
            }
            Self::teardown(&mut slot);
            *slot = Slot::Connecting {
                epoch,
                attempt,
                pending: Vec::new(),
            };
        }
        tracing::debug!(%epoch, "Connecting push channel");

        let result = self.channel.connect().await;

        let mut slot = self.lock();
        let wanted = matches!(*slot, Slot::Connecting { attempt: a, .. } if a == attempt);
        let connection = match result {
            Ok(connection) => connection,
            Err(e) => {
                if wanted {
                    *slot = Slot::Idle;
                }
                tracing::warn!(%epoch, "Push channel handshake failed: {e}");
                return Err(e);
            }
        };

        if !wanted {
            drop(slot);
            connection.close();
            tracing::debug!(%epoch, "Discarding connection opened for stale session");
            return Err(ConnectionError::Closed);
        }

        let token = connection.subscribe(Arc::new(move |msg: Message| {
            timeline.append_live(msg);
        }));
        tracing::info!(%epoch, connection_id = %connection.id(), "Push channel open");

        if let Slot::Connecting { pending, .. } = &mut *slot {
            for message in pending.drain(..) {
                if let Err(e) = connection.publish(&message) {
                    tracing::warn!(%epoch, "Failed to flush buffered publish: {e}");
                }
            }
        }
        *slot = Slot::Open {
            epoch,
            connection,
            token,
        };
        Ok(())
    }

    /// Close the connection, if any. Idempotent.
    ///
    /// No event of the closed connection reaches a timeline after this returns.
    pub fn close(&self) {
        Self::teardown(&mut self.lock());
    }

    fn teardown(slot: &mut Slot) {
        match std::mem::replace(slot, Slot::Idle) {
            Slot::Open {
                epoch,
                connection,
                token,
            } => {
                connection.unsubscribe(token);
                connection.close();
                tracing::info!(%epoch, connection_id = %connection.id(), "Push channel closed");
            }
            Slot::Connecting { epoch, pending, .. } => {
                tracing::debug!(%epoch, dropped = pending.len(), "Abandoning pending handshake");
            }
            Slot::Idle => {}
        }
    }

    /// Emit a message to the other participants.
    ///
    /// While the handshake is pending the message is held and sent once the
    /// connection opens; it is dropped if the handshake fails or is abandoned.
    ///
    /// # Errors
    /// Returns `NotConnected` when idle, or the transport failure.
    pub fn publish(&self, message: &Message) -> Result<(), ConnectionError> {
        match &mut *self.lock() {
            Slot::Open { connection, .. } => connection.publish(message),
            Slot::Connecting { pending, .. } => {
                pending.push(message.clone());
                Ok(())
            }
            Slot::Idle => Err(ConnectionError::NotConnected),
        }
    }
}

impl<P: PushChannel> Drop for ConnectionManager<P> {
    fn drop(&mut self) {
        self.close();
    }
}
