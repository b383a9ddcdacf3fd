//! Pair session: the bidirectional channel between a pairing front-end and
//! a driver.
//!
//! The front-end calls named handlers the driver installed; the driver
//! pushes named messages back, which land in an outbox the front-end reads.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;

use devicekit_domain::error::{DeviceKitError, NotFoundError, ValidationError};
use devicekit_domain::id::PairSessionId;

/// Handler for one front-end event: `payload -> reply`.
pub type PairHandler = Arc<
    dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, DeviceKitError>>
        + Send
        + Sync,
>;

/// A message the driver sent to the front-end.
#[derive(Debug, Clone, PartialEq)]
pub struct PairMessage {
    pub event: String,
    pub payload: serde_json::Value,
}

struct SessionInner {
    id: PairSessionId,
    driver_id: String,
    handlers: Mutex<HashMap<String, PairHandler>>,
    outbox: Mutex<Vec<PairMessage>>,
    closed: AtomicBool,
}

/// One pairing attempt for one driver. Cheap to clone.
#[derive(Clone)]
pub struct PairSession {
    inner: Arc<SessionInner>,
}

impl PairSession {
    #[must_use]
    pub fn new(driver_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: PairSessionId::new(),
                driver_id: driver_id.into(),
                handlers: Mutex::new(HashMap::new()),
                outbox: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> PairSessionId {
        self.inner.id
    }

    #[must_use]
    pub fn driver_id(&self) -> &str {
        &self.inner.driver_id
    }

    /// Install the handler for `event`, replacing any previous one.
    pub fn set_handler<F, Fut>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, DeviceKitError>> + Send + 'static,
    {
        let handler: PairHandler =
            Arc::new(move |payload: serde_json::Value| handler(payload).boxed());
        lock(&self.inner.handlers).insert(event.into(), handler);
    }

    #[must_use]
    pub fn has_handler(&self, event: &str) -> bool {
        lock(&self.inner.handlers).contains_key(event)
    }

    /// Front-end → driver: run the handler of `event`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::SessionClosed`] after [`close`](Self::close),
    /// [`NotFoundError`] (`PairHandler`) when nothing handles `event`, or
    /// whatever the handler returns.
    #[tracing::instrument(skip(self, payload), fields(session = %self.inner.id))]
    pub async fn call(
        &self,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, DeviceKitError> {
        self.ensure_open()?;
        let handler = lock(&self.inner.handlers)
            .get(event)
            .cloned()
            .ok_or_else(|| NotFoundError {
                entity: "PairHandler",
                id: event.to_string(),
            })?;
        handler(payload).await
    }

    /// Driver → front-end: queue a message.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::SessionClosed`] after [`close`](Self::close).
    pub fn emit(
        &self,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<(), DeviceKitError> {
        self.ensure_open()?;
        let event = event.into();
        tracing::debug!(session = %self.inner.id, %event, "pair message");
        lock(&self.inner.outbox).push(PairMessage { event, payload });
        Ok(())
    }

    /// Messages sent to the front-end so far, oldest first.
    #[must_use]
    pub fn outbox(&self) -> Vec<PairMessage> {
        lock(&self.inner.outbox).clone()
    }

    /// End the session and drop its handlers.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            lock(&self.inner.handlers).clear();
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), ValidationError> {
        if self.is_closed() {
            return Err(ValidationError::SessionClosed);
        }
        Ok(())
    }
}

impl fmt::Debug for PairSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairSession")
            .field("id", &self.inner.id)
            .field("driver_id", &self.inner.driver_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
