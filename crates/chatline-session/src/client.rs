//! The owning context that wires session transitions to history and push.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chatline_core::{
    ActiveSession, AuthError, ChatApi, ClientConfig, Message, PushChannel, Session, SessionEpoch,
    Timeline, TransportError,
};
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    ConnectionManager, ConnectionState, HistoryLoader, SendError, SendGuard, SendPipeline,
    SessionStore,
};

/// Chat client for a single room.
///
/// Every session assignment closes the previous connection, seals the
/// previous timeline, installs a fresh one, then starts the backlog fetch
/// and the push connection for the new session.
pub struct ChatClient<A, P>
where
    A: ChatApi + 'static,
    P: PushChannel + 'static,
{
    config: ClientConfig,
    sessions: Arc<SessionStore<A>>,
    history: Arc<HistoryLoader<A>>,
    connection: Arc<ConnectionManager<P>>,
    sender: SendPipeline<A, P>,
    timeline: RwLock<Arc<Timeline>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<A, P> ChatClient<A, P>
where
    A: ChatApi + 'static,
    P: PushChannel + 'static,
{
    /// Create a logged-out client.
    #[must_use]
    pub fn new(config: ClientConfig, api: A, channel: P) -> Self {
        let api = Arc::new(api);
        let sessions = Arc::new(SessionStore::new(Arc::clone(&api)));
        let history = Arc::new(HistoryLoader::new(Arc::clone(&api)));
        let connection = Arc::new(ConnectionManager::new(channel));
        let sender = SendPipeline::new(
            api,
            Arc::clone(&sessions),
            Arc::clone(&connection),
            SendGuard::new(config.send_release_delay()),
            config.room_id,
        );

        // Placeholder until the first login; nothing appends to it
        let idle = Timeline::new(SessionEpoch(0));
        idle.seal();

        Self {
            config,
            sessions,
            history,
            connection,
            sender,
            timeline: RwLock::new(Arc::new(idle)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log in and start syncing the new session.
    ///
    /// # Errors
    /// Returns the login failure. The current session, if any, is kept.
    pub async fn login(&self, username: &str, password: &str) -> Result<ActiveSession, AuthError> {
        let active = self.sessions.login(username, password).await?;
        self.activate(&active);
        Ok(active)
    }

    /// Register a user without logging in.
    ///
    /// # Errors
    /// Returns error if the server rejects the request or is unreachable.
    pub async fn signup(&self, username: &str, password: &str) -> Result<(), TransportError> {
        self.sessions.signup(username, password).await
    }

    fn activate(&self, active: &ActiveSession) {
        let epoch = active.epoch;
        self.connection.close();
        self.abort_tasks();

        let timeline = Arc::new(Timeline::new(epoch));
        let previous = std::mem::replace(
            &mut *self.timeline.write().unwrap_or_else(PoisonError::into_inner),
            Arc::clone(&timeline),
        );
        previous.seal();

        let history_task = {
            let sessions = Arc::clone(&self.sessions);
            let history = Arc::clone(&self.history);
            let timeline = Arc::clone(&timeline);
            let room = self.config.room_id;
            tokio::spawn(async move {
                let messages = history.load(room).await;
                if sessions.is_current(epoch) {
                    timeline.append_history(messages);
                } else {
                    tracing::debug!(%epoch, "Discarding history for stale session");
                }
            })
        };

        let connect_task = {
            let connection = Arc::clone(&self.connection);
            tokio::spawn(async move {
                // Failures are logged by the manager; the timeline just gets no live events
                let _ = connection.open(epoch, timeline).await;
            })
        };

        self.tasks().extend([history_task, connect_task]);
    }

    fn abort_tasks(&self) {
        for task in self.tasks().drain(..) {
            task.abort();
        }
    }

    /// Clear the session and stop syncing. The timeline keeps its entries.
    pub fn reset(&self) {
        self.sessions.reset();
        self.connection.close();
        self.abort_tasks();
        self.timeline().seal();
    }

    /// Send a message as the current user.
    ///
    /// # Errors
    /// See [`SendPipeline::send`].
    pub async fn send(&self, content: impl Into<String>) -> Result<Message, SendError> {
        let session = self.sessions.current();
        let timeline = self.timeline();
        self.sender.send(content, session.as_ref(), &timeline).await
    }

    /// Whether a send is in flight or inside its release delay.
    #[must_use]
    pub fn send_in_flight(&self) -> bool {
        self.sender.guard().is_held()
    }

    /// Current identity.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.sessions.current_session()
    }

    /// Watch session transitions.
    #[must_use]
    pub fn watch_session(&self) -> watch::Receiver<Option<ActiveSession>> {
        self.sessions.subscribe()
    }

    /// Timeline of the current (or last) session.
    #[must_use]
    pub fn timeline(&self) -> Arc<Timeline> {
        Arc::clone(&self.timeline.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Visible messages of the current timeline.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.timeline().snapshot()
    }

    /// Push connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }
}

impl<A, P> Drop for ChatClient<A, P>
where
    A: ChatApi + 'static,
    P: PushChannel + 'static,
{
    fn drop(&mut self) {
        self.connection.close();
        self.abort_tasks();
    }
}
