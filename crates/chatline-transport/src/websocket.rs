//! WebSocket push channel.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use url::Url;
use uuid::Uuid;

use chatline_core::{
    ConnectionError, Message, PushChannel, PushConnection, Subscribers,
    traits::{ConnectionId, EventHandler, SubscriptionToken},
};

use crate::protocol::{InboundFrame, decode_frame, encode_message};

/// [`PushChannel`] that dials a WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WsPushChannel {
    url: Url,
}

impl WsPushChannel {
    /// Create a channel for the given `ws://` or `wss://` URL.
    #[must_use]
    pub const fn new(url: Url) -> Self {
        Self { url }
    }
}

#[async_trait]
impl PushChannel for WsPushChannel {
    async fn connect(&self) -> Result<Arc<dyn PushConnection>, ConnectionError> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WsMessage>();
        let subscribers = Arc::new(Subscribers::new());
        let closed = Arc::new(AtomicBool::new(false));
        let id = Uuid::new_v4();

        // Writer: drain outbound frames until a close frame goes out
        let writer_closed = Arc::clone(&closed);
        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let is_close = matches!(frame, WsMessage::Close(_));
                if let Err(e) = sink.send(frame).await {
                    tracing::debug!(%id, "Push write failed: {e}");
                    break;
                }
                if is_close {
                    break;
                }
            }
            writer_closed.store(true, Ordering::SeqCst);
        });

        // Reader: decode frames and hand them to subscribers in arrival order
        let reader_subs = Arc::clone(&subscribers);
        let reader_closed = Arc::clone(&closed);
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let text = match frame {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(%id, "Push connection error: {e}");
                        break;
                    }
                };

                match decode_frame(text.as_str()) {
                    Ok(InboundFrame::Message(msg)) => {
                        if reader_closed.load(Ordering::SeqCst) {
                            break;
                        }
                        reader_subs.dispatch(&msg);
                    }
                    Ok(InboundFrame::Other(event)) => {
                        tracing::debug!(%id, "Ignoring push event: {event}");
                    }
                    Err(e) => tracing::warn!(%id, "Invalid push frame: {e}"),
                }
            }
            reader_closed.store(true, Ordering::SeqCst);
            tracing::debug!(%id, "Push connection stopped delivering");
        });

        tracing::debug!(%id, url = %self.url, "Push connection open");

        Ok(Arc::new(WsConnection {
            id,
            subscribers,
            outbound: outbound_tx,
            closed,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        }))
    }
}

/// An open WebSocket push connection.
pub struct WsConnection {
    id: ConnectionId,
    subscribers: Arc<Subscribers>,
    outbound: mpsc::UnboundedSender<WsMessage>,
    closed: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl PushConnection for WsConnection {
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
        let json = encode_message(message).map_err(|e| ConnectionError::Encode(e.to_string()))?;
        self.outbound
            .send(WsMessage::text(json))
            .map_err(|_| ConnectionError::Closed)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Waits for any in-progress dispatch
        self.subscribers.clear();

        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            reader.abort();
            let _ = self.outbound.send(WsMessage::Close(None));
            tracing::debug!(id = %self.id, "Push connection closed");
        }
        // Writer exits after flushing the close frame; dropping the handle detaches it
        drop(self.writer.lock().unwrap_or_else(PoisonError::into_inner).take());
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.close();
    }
}
