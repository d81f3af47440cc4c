//! Send pipeline with a one-at-a-time guard.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chatline_core::{
    ActiveSession, ChatApi, Message, PushChannel, RoomId, Timeline, TransportError,
    traits::CreateMessage,
};
use thiserror::Error;
use tokio::runtime::Handle;

use crate::{ConnectionManager, SessionStore};

/// Send failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("You need to login first")]
    NoSession,
    #[error("A message is already being sent")]
    InFlight,
    #[error("Failed to send message: {0}")]
    Transport(#[from] TransportError),
    #[error("Session changed while sending")]
    Discarded,
}

/// Two-state (free/held) submission guard.
///
/// Release happens a fixed delay after the holder is dropped, which absorbs
/// repeated triggers of the same control.
#[derive(Debug, Clone)]
pub struct SendGuard {
    held: Arc<AtomicBool>,
    release_delay: Duration,
}

impl SendGuard {
    #[must_use]
    pub fn new(release_delay: Duration) -> Self {
        Self {
            held: Arc::new(AtomicBool::new(false)),
            release_delay,
        }
    }

    /// Whether a submission currently holds the guard.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// Take the guard, or `None` if it is held.
    #[must_use]
    pub fn try_acquire(&self) -> Option<GuardPermit> {
        self.held
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| GuardPermit {
                held: Arc::clone(&self.held),
                release_delay: self.release_delay,
            })
    }
}

/// Held guard. Dropping it schedules the release.
#[derive(Debug)]
pub struct GuardPermit {
    held: Arc<AtomicBool>,
    release_delay: Duration,
}

impl Drop for GuardPermit {
    fn drop(&mut self) {
        let held = Arc::clone(&self.held);
        let delay = self.release_delay;
        if let Ok(handle) = Handle::try_current() {
            handle.spawn(async move {
                tokio::time::sleep(delay).await;
                held.store(false, Ordering::SeqCst);
            });
        } else {
            held.store(false, Ordering::SeqCst);
        }
    }
}

/// Persists user submissions, then echoes them locally and publishes them.
pub struct SendPipeline<A: ChatApi, P: PushChannel> {
    api: Arc<A>,
    sessions: Arc<SessionStore<A>>,
    connection: Arc<ConnectionManager<P>>,
    guard: SendGuard,
    room: RoomId,
}

impl<A: ChatApi, P: PushChannel> SendPipeline<A, P> {
    #[must_use]
    pub const fn new(
        api: Arc<A>,
        sessions: Arc<SessionStore<A>>,
        connection: Arc<ConnectionManager<P>>,
        guard: SendGuard,
        room: RoomId,
    ) -> Self {
        Self {
            api,
            sessions,
            connection,
            guard,
            room,
        }
    }

    /// The guard shared with the UI.
    #[must_use]
    pub const fn guard(&self) -> &SendGuard {
        &self.guard
    }

    /// Persist `content` as `session`'s message.
    ///
    /// On success the message is appended to `timeline` as a local echo and
    /// published on the push channel; it is returned so the caller can
    /// clear its input. Content is forwarded as-is, empty included.
    ///
    /// # Errors
    /// `NoSession` without a session, `InFlight` while a previous send holds
    /// the guard, `Transport` when persistence fails, and `Discarded` when
    /// the session changed before persistence completed.
    pub async fn send(
        &self,
        content: impl Into<String>,
        session: Option<&ActiveSession>,
        timeline: &Timeline,
    ) -> Result<Message, SendError> {
        let Some(active) = session else {
            return Err(SendError::NoSession);
        };
        let Some(_permit) = self.guard.try_acquire() else {
            tracing::debug!("Send rejected, previous submission in flight");
            return Err(SendError::InFlight);
        };

        let request = CreateMessage {
            content: content.into(),
            user_id: active.session.id,
            room_id: self.room,
        };

        if let Err(e) = self.api.create_message(&request).await {
            tracing::error!(epoch = %active.epoch, "Failed to persist message: {e}");
            return Err(e.into());
        }

        if !self.sessions.is_current(active.epoch) || timeline.epoch() != active.epoch {
            tracing::debug!(epoch = %active.epoch, "Discarding send completion for stale session");
            return Err(SendError::Discarded);
        }

        let message = Message::new(active.session.username.clone(), request.content);
        timeline.append_local_echo(message.clone());
        if let Err(e) = self.connection.publish(&message) {
            tracing::warn!(epoch = %active.epoch, "Failed to publish message: {e}");
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    const DELAY: Duration = Duration::from_millis(100);

    struct Fixture {
        backend: MemoryBackend,
        sessions: Arc<SessionStore<MemoryBackend>>,
        connection: Arc<ConnectionManager<MemoryBackend>>,
        pipeline: Arc<SendPipeline<MemoryBackend, MemoryBackend>>,
    }

    fn fixture() -> Fixture {
        let backend = MemoryBackend::new();
        backend.add_user("bob", "right");
        let api = Arc::new(backend.clone());
        let sessions = Arc::new(SessionStore::new(Arc::clone(&api)));
        let connection = Arc::new(ConnectionManager::new(backend.clone()));
        let pipeline = Arc::new(SendPipeline::new(
            api,
            Arc::clone(&sessions),
            Arc::clone(&connection),
            SendGuard::new(DELAY),
            RoomId(1),
        ));
        Fixture {
            backend,
            sessions,
            connection,
            pipeline,
        }
    }

    async fn logged_in(fx: &Fixture) -> (ActiveSession, Arc<Timeline>) {
        let active = fx.sessions.login("bob", "right").await.unwrap();
        let timeline = Arc::new(Timeline::new(active.epoch));
        timeline.append_history(vec![Message::new("alice", "earlier")]);
        fx.connection
            .open(active.epoch, Arc::clone(&timeline))
            .await
            .unwrap();
        (active, timeline)
    }

    fn rendered(timeline: &Timeline) -> Vec<String> {
        timeline.snapshot().iter().map(ToString::to_string).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_echoes_publishes_and_releases_after_delay() {
        let fx = fixture();
        let (active, timeline) = logged_in(&fx).await;
        assert!(!fx.pipeline.guard().is_held());

        let sent = fx.pipeline.send("hello", Some(&active), &timeline).await.unwrap();
        assert_eq!(sent, Message::new("bob", "hello"));
        assert_eq!(rendered(&timeline), vec!["alice: earlier", "bob: hello"]);
        assert_eq!(fx.backend.published(), vec![Message::new("bob", "hello")]);
        assert_eq!(fx.backend.stored_messages(), vec![Message::new("bob", "hello")]);

        assert!(fx.pipeline.guard().is_held());
        tokio::time::sleep(Duration::from_millis(99)).await;
        assert!(fx.pipeline.guard().is_held());
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(!fx.pipeline.guard().is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_send_while_pending_is_rejected() {
        let fx = fixture();
        let (active, timeline) = logged_in(&fx).await;
        fx.backend.hold_creates();

        let first = {
            let pipeline = Arc::clone(&fx.pipeline);
            let active = active.clone();
            let timeline = Arc::clone(&timeline);
            tokio::spawn(async move { pipeline.send("one", Some(&active), &timeline).await })
        };
        while fx.backend.create_calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(fx.pipeline.guard().is_held());

        let second = fx.pipeline.send("two", Some(&active), &timeline).await;
        assert_eq!(second.unwrap_err(), SendError::InFlight);
        assert_eq!(fx.backend.create_calls(), 1);

        fx.backend.release_creates();
        first.await.unwrap().unwrap();
        assert_eq!(rendered(&timeline), vec!["alice: earlier", "bob: one"]);

        // Still held during the release delay
        assert_eq!(
            fx.pipeline.send("three", Some(&active), &timeline).await.unwrap_err(),
            SendError::InFlight
        );
        tokio::time::sleep(DELAY + Duration::from_millis(1)).await;
        fx.pipeline.send("three", Some(&active), &timeline).await.unwrap();
        assert_eq!(fx.backend.create_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_leaves_timeline_and_releases_guard() {
        let fx = fixture();
        let (active, timeline) = logged_in(&fx).await;
        fx.backend.fail_creates(true);

        let err = fx.pipeline.send("hello", Some(&active), &timeline).await.unwrap_err();
        assert!(matches!(err, SendError::Transport(_)));
        assert_eq!(rendered(&timeline), vec!["alice: earlier"]);
        assert!(fx.backend.published().is_empty());

        assert!(fx.pipeline.guard().is_held());
        tokio::time::sleep(DELAY + Duration::from_millis(1)).await;
        assert!(!fx.pipeline.guard().is_held());
    }

    #[tokio::test]
    async fn test_no_session() {
        let fx = fixture();
        let timeline = Timeline::new(chatline_core::SessionEpoch(0));
        let err = fx.pipeline.send("hello", None, &timeline).await.unwrap_err();
        assert_eq!(err, SendError::NoSession);
        assert_eq!(fx.backend.create_calls(), 0);
        assert!(!fx.pipeline.guard().is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_content_is_forwarded() {
        let fx = fixture();
        let (active, timeline) = logged_in(&fx).await;
        let sent = fx.pipeline.send("", Some(&active), &timeline).await.unwrap();
        assert_eq!(sent.content(), "");
        assert_eq!(fx.backend.stored_messages(), vec![Message::new("bob", "")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_after_session_change_is_discarded() {
        let fx = fixture();
        let (active, timeline) = logged_in(&fx).await;
        fx.backend.hold_creates();

        let pending = {
            let pipeline = Arc::clone(&fx.pipeline);
            let active = active.clone();
            let timeline = Arc::clone(&timeline);
            tokio::spawn(async move { pipeline.send("late", Some(&active), &timeline).await })
        };
        while fx.backend.create_calls() == 0 {
            tokio::task::yield_now().await;
        }

        fx.sessions.reset();
        fx.backend.release_creates();
        assert_eq!(pending.await.unwrap().unwrap_err(), SendError::Discarded);
        assert_eq!(rendered(&timeline), vec!["alice: earlier"]);
        assert!(fx.backend.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_still_echoes() {
        let fx = fixture();
        let (active, timeline) = logged_in(&fx).await;
        fx.connection.close();

        let sent = fx.pipeline.send("offline", Some(&active), &timeline).await.unwrap();
        assert_eq!(sent.to_string(), "bob: offline");
        assert_eq!(rendered(&timeline), vec!["alice: earlier", "bob: offline"]);
        assert!(fx.backend.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_send_still_releases_guard() {
        let fx = fixture();
        let (active, timeline) = logged_in(&fx).await;
        fx.backend.hold_creates();

        let pending = {
            let pipeline = Arc::clone(&fx.pipeline);
            let active = active.clone();
            let timeline = Arc::clone(&timeline);
            tokio::spawn(async move { pipeline.send("abandoned", Some(&active), &timeline).await })
        };
        while fx.backend.create_calls() == 0 {
            tokio::task::yield_now().await;
        }
        pending.abort();
        let _ = pending.await;

        tokio::time::sleep(DELAY + Duration::from_millis(1)).await;
        assert!(!fx.pipeline.guard().is_held());
    }

    #[test]
    fn test_guard_outside_runtime_releases_immediately() {
        let guard = SendGuard::new(DELAY);
        let permit = guard.try_acquire().unwrap();
        assert!(guard.try_acquire().is_none());
        drop(permit);
        assert!(!guard.is_held());
    }
}
