//! Capability listener table and the debounce state of multiple-capability
//! listeners.
//!
//! A capability id maps to exactly one registration. A multiple-capability
//! registration is shared by all its ids and collects requests into a
//! pending batch; every new request bumps the batch generation so only the
//! timer scheduled by the latest request may flush it (trailing edge).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use devicekit_domain::error::{DeviceKitError, HookError, ValidationError};
use devicekit_domain::value::CapabilityValue;

/// Values or options keyed by capability id.
pub type CapabilityValues = BTreeMap<String, serde_json::Value>;

/// Listener for a single capability: `(value, options) -> result`.
pub type CapabilityListener = Arc<
    dyn Fn(CapabilityValue, serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, HookError>>
        + Send
        + Sync,
>;

/// Listener for several capabilities: `(values, options)`.
pub type MultipleCapabilityListener = Arc<
    dyn Fn(CapabilityValues, CapabilityValues) -> BoxFuture<'static, Result<(), HookError>>
        + Send
        + Sync,
>;

/// What every requester of a batch is told.
pub(crate) type Outcome = Result<serde_json::Value, DeviceKitError>;

#[derive(Clone)]
pub(crate) enum Registration {
    Single(CapabilityListener),
    Multiple(Arc<DebouncedGroup>),
}

/// Requests collected during one quiet window.
pub(crate) struct Batch {
    pub values: CapabilityValues,
    pub options: CapabilityValues,
    waiters: Vec<oneshot::Sender<Outcome>>,
}

impl Batch {
    pub fn resolve(self, outcome: &Outcome) {
        for waiter in self.waiters {
            // The requester may have gone away; nothing to tell then.
            let _ = waiter.send(outcome.clone());
        }
    }
}

#[derive(Default)]
struct Pending {
    generation: u64,
    values: CapabilityValues,
    options: CapabilityValues,
    waiters: Vec<oneshot::Sender<Outcome>>,
    timers: Vec<JoinHandle<()>>,
}

pub(crate) struct DebouncedGroup {
    listener: MultipleCapabilityListener,
    debounce: Duration,
    pending: Mutex<Pending>,
}

impl DebouncedGroup {
    pub fn new(listener: MultipleCapabilityListener, debounce: Duration) -> Self {
        Self {
            listener,
            debounce,
            pending: Mutex::new(Pending::default()),
        }
    }

    pub fn listener(&self) -> MultipleCapabilityListener {
        Arc::clone(&self.listener)
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Merge a request into the pending batch. Later values for the same
    /// capability replace earlier ones.
    ///
    /// Returns the outcome receiver and the generation the caller must
    /// schedule a flush for.
    pub fn enqueue(
        &self,
        capability_id: &str,
        value: CapabilityValue,
        options: serde_json::Value,
    ) -> (oneshot::Receiver<Outcome>, u64) {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.lock();
        pending.generation += 1;
        pending.values.insert(capability_id.to_string(), value);
        pending.options.insert(capability_id.to_string(), options);
        pending.waiters.push(tx);
        (rx, pending.generation)
    }

    /// Keep track of a flush timer so it can be cancelled.
    pub fn track_timer(&self, handle: JoinHandle<()>) {
        let mut pending = self.lock();
        pending.timers.retain(|t| !t.is_finished());
        pending.timers.push(handle);
    }

    /// Take the batch if no request arrived after `generation`.
    pub fn take_if_current(&self, generation: u64) -> Option<Batch> {
        let mut pending = self.lock();
        if pending.generation != generation || pending.waiters.is_empty() {
            return None;
        }
        Some(Batch {
            values: std::mem::take(&mut pending.values),
            options: std::mem::take(&mut pending.options),
            waiters: std::mem::take(&mut pending.waiters),
        })
    }

    /// Drop the pending batch and stop every timer. Waiters see their
    /// channel close.
    pub fn cancel(&self) {
        let mut pending = self.lock();
        pending.generation += 1;
        pending.values.clear();
        pending.options.clear();
        pending.waiters.clear();
        for timer in pending.timers.drain(..) {
            timer.abort();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Capability id → registration.
#[derive(Default)]
pub(crate) struct ListenerTable {
    registrations: Mutex<HashMap<String, Registration>>,
}

impl ListenerTable {
    pub fn get(&self, capability_id: &str) -> Option<Registration> {
        self.lock().get(capability_id).cloned()
    }

    pub fn contains(&self, capability_id: &str) -> bool {
        self.lock().contains_key(capability_id)
    }

    pub fn insert_single(
        &self,
        capability_id: String,
        listener: CapabilityListener,
    ) -> Result<(), ValidationError> {
        let mut registrations = self.lock();
        if registrations.contains_key(&capability_id) {
            return Err(ValidationError::ListenerAlreadyRegistered(capability_id));
        }
        registrations.insert(capability_id, Registration::Single(listener));
        Ok(())
    }

    /// Register `group` for every id, or for none of them.
    pub fn insert_multiple(
        &self,
        capability_ids: &[String],
        group: &Arc<DebouncedGroup>,
    ) -> Result<(), ValidationError> {
        let mut registrations = self.lock();
        if let Some(taken) = capability_ids
            .iter()
            .find(|id| registrations.contains_key(*id))
        {
            return Err(ValidationError::ListenerAlreadyRegistered(taken.clone()));
        }
        for id in capability_ids {
            registrations.insert(id.clone(), Registration::Multiple(Arc::clone(group)));
        }
        Ok(())
    }

    /// Unregister one capability. A multiple listener stays active for its
    /// other capabilities and is cancelled once none remain.
    pub fn remove(&self, capability_id: &str) {
        let mut registrations = self.lock();
        if let Some(Registration::Multiple(group)) = registrations.remove(capability_id) {
            let still_used = registrations.values().any(|r| match r {
                Registration::Multiple(other) => Arc::ptr_eq(other, &group),
                Registration::Single(_) => false,
            });
            if !still_used {
                group.cancel();
            }
        }
    }

    /// Unregister everything and cancel pending batches.
    pub fn clear(&self) {
        let drained: Vec<Registration> = self.lock().drain().map(|(_, r)| r).collect();
        for registration in drained {
            if let Registration::Multiple(group) = registration {
                group.cancel();
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Registration>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
