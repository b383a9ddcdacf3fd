//! Simulated radio shared by every virtual device.
//!
//! Listeners "transmit" accepted commands on the bus. Endpoints can be taken
//! offline, after which transmissions to them fail like a device that stopped
//! answering.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use devicekit_domain::error::HookError;

/// One command sent to an endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Transmission {
    pub endpoint: String,
    pub values: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Default)]
pub struct VirtualBus {
    sent: Mutex<Vec<Transmission>>,
    offline: Mutex<HashSet<String>>,
}

impl VirtualBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, endpoint: &str, online: bool) {
        let mut offline = lock(&self.offline);
        if online {
            offline.remove(endpoint);
        } else {
            offline.insert(endpoint.to_string());
        }
    }

    #[must_use]
    pub fn is_online(&self, endpoint: &str) -> bool {
        !lock(&self.offline).contains(endpoint)
    }

    /// Send `values` to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns a [`HookError`] when the endpoint is offline.
    pub fn transmit(
        &self,
        endpoint: &str,
        values: BTreeMap<String, serde_json::Value>,
    ) -> Result<(), HookError> {
        if !self.is_online(endpoint) {
            tracing::debug!(endpoint, "transmission dropped, endpoint offline");
            return Err(HookError::new(format!("{endpoint} is not responding")));
        }
        tracing::debug!(endpoint, ?values, "transmit");
        lock(&self.sent).push(Transmission {
            endpoint: endpoint.to_string(),
            values,
        });
        Ok(())
    }

    /// Everything sent so far, oldest first.
    #[must_use]
    pub fn transmissions(&self) -> Vec<Transmission> {
        lock(&self.sent).clone()
    }

    #[must_use]
    pub fn transmissions_to(&self, endpoint: &str) -> Vec<Transmission> {
        lock(&self.sent)
            .iter()
            .filter(|t| t.endpoint == endpoint)
            .cloned()
            .collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
