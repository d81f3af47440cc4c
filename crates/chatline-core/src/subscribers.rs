//! Handler registry shared by push connection implementations.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{Message, traits::{EventHandler, SubscriptionToken}};

/// Ordered set of event handlers.
///
/// Dispatch holds the registry lock while handlers run, so `unsubscribe`
/// and `clear` wait for an in-progress dispatch and no handler runs after
/// they return.
#[derive(Default)]
pub struct Subscribers {
    handlers: Mutex<Vec<(SubscriptionToken, EventHandler)>>,
}

impl Subscribers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(SubscriptionToken, EventHandler)>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a handler.
    pub fn subscribe(&self, handler: EventHandler) -> SubscriptionToken {
        let token = SubscriptionToken::new();
        self.lock().push((token, handler));
        token
    }

    /// Remove a handler. Unknown tokens are ignored.
    pub fn unsubscribe(&self, token: SubscriptionToken) {
        self.lock().retain(|(t, _)| *t != token);
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver a message to every handler in registration order.
    pub fn dispatch(&self, message: &Message) {
        let handlers = self.lock();
        for (_, handler) in handlers.iter() {
            handler(message.clone());
        }
    }
}
