//! In-process event emitter shared by devices, drivers, discovery strategies
//! and pair sessions.
//!
//! Emission is synchronous: every listener subscribed to the event at the
//! time of the call runs, in subscription order, before `emit` returns. The
//! first listener error stops the emission and is handed back to the caller.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use devicekit_domain::error::HookError;
use devicekit_domain::id::ListenerId;

/// A subscribed event listener.
pub type Listener = Arc<dyn Fn(&serde_json::Value) -> Result<(), HookError> + Send + Sync>;

struct Subscription {
    id: ListenerId,
    event: String,
    once: bool,
    listener: Listener,
}

/// Named-event publish/subscribe primitive.
pub struct EventEmitter {
    name: String,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl EventEmitter {
    /// Create an emitter. `name` tags every log line it writes.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe to `event`.
    pub fn on<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&serde_json::Value) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.subscribe(event.into(), false, Arc::new(listener))
    }

    /// Subscribe to the next occurrence of `event` only.
    pub fn once<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&serde_json::Value) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.subscribe(event.into(), true, Arc::new(listener))
    }

    /// Unsubscribe. Returns `false` if the listener was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut subscriptions = self.lock();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Drop every listener of `event`, or every listener when `None`.
    pub fn remove_all_listeners(&self, event: Option<&str>) {
        let mut subscriptions = self.lock();
        match event {
            Some(event) => subscriptions.retain(|s| s.event != event),
            None => subscriptions.clear(),
        }
    }

    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.lock().iter().filter(|s| s.event == event).count()
    }

    /// Call every listener of `event` with `payload`.
    ///
    /// Returns whether at least one listener was called.
    ///
    /// # Errors
    ///
    /// Returns the first [`HookError`] raised by a listener; listeners after
    /// it are not called.
    pub fn emit(&self, event: &str, payload: &serde_json::Value) -> Result<bool, HookError> {
        let listeners: Vec<Listener> = {
            let mut subscriptions = self.lock();
            let matching = subscriptions
                .iter()
                .filter(|s| s.event == event)
                .map(|s| Arc::clone(&s.listener))
                .collect();
            subscriptions.retain(|s| !(s.once && s.event == event));
            matching
        };

        for listener in &listeners {
            listener(payload)?;
        }
        Ok(!listeners.is_empty())
    }

    /// Write an informational line. Never fails.
    pub fn log(&self, message: impl fmt::Display) {
        tracing::info!(emitter = %self.name, "{message}");
    }

    /// Write an error line. Never fails.
    pub fn error(&self, message: impl fmt::Display) {
        tracing::error!(emitter = %self.name, "{message}");
    }

    fn subscribe(&self, event: String, once: bool, listener: Listener) -> ListenerId {
        let id = ListenerId::new();
        self.lock().push(Subscription {
            id,
            event,
            once,
            listener,
        });
        id
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("name", &self.name)
            .field("listeners", &self.lock().len())
            .finish()
    }
}
