//! Discovery strategy: the manifest-declared source of discovery results
//! for a driver.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use devicekit_domain::discovery::{DiscoveryChange, DiscoveryKind, DiscoveryResult};
use devicekit_domain::error::{DeviceKitError, ValidationError};
use devicekit_domain::manifest::DiscoveryStrategyManifest;

use crate::emitter::EventEmitter;

struct StrategyInner {
    id: String,
    kind: DiscoveryKind,
    config: BTreeMap<String, serde_json::Value>,
    results: Mutex<BTreeMap<String, DiscoveryResult>>,
    emitter: EventEmitter,
}

/// Latest discovery results of one strategy, keyed by endpoint id.
///
/// Emits `result` on its emitter whenever a result is new or differs from
/// the previous one for the same endpoint.
#[derive(Clone)]
pub struct DiscoveryStrategy {
    inner: Arc<StrategyInner>,
}

impl DiscoveryStrategy {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: DiscoveryKind) -> Self {
        Self::with_config(id.into(), kind, BTreeMap::new())
    }

    #[must_use]
    pub fn from_manifest(id: &str, manifest: &DiscoveryStrategyManifest) -> Self {
        Self::with_config(id.to_string(), manifest.kind, manifest.config.clone())
    }

    fn with_config(
        id: String,
        kind: DiscoveryKind,
        config: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            inner: Arc::new(StrategyInner {
                emitter: EventEmitter::new(format!("discovery:{id}")),
                id,
                kind,
                config,
                results: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn kind(&self) -> DiscoveryKind {
        self.inner.kind
    }

    /// Protocol-specific matching rules from the manifest.
    #[must_use]
    pub fn config(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.inner.config
    }

    #[must_use]
    pub fn emitter(&self) -> &EventEmitter {
        &self.inner.emitter
    }

    #[must_use]
    pub fn discovery_results(&self) -> BTreeMap<String, DiscoveryResult> {
        self.lock().clone()
    }

    #[must_use]
    pub fn discovery_result(&self, id: &str) -> Option<DiscoveryResult> {
        self.lock().get(id).cloned()
    }

    /// Keep `result` as the latest sighting of its endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::DiscoveryKindMismatch`] when the payload
    /// belongs to another kind of strategy.
    pub fn record(&self, result: DiscoveryResult) -> Result<DiscoveryChange, DeviceKitError> {
        let actual = result.payload.kind();
        if actual != self.inner.kind {
            return Err(ValidationError::DiscoveryKindMismatch {
                expected: self.inner.kind.to_string(),
                actual: actual.to_string(),
            }
            .into());
        }

        let payload = serde_json::json!({
            "id": result.id,
            "address": result.address,
            "last_seen": result.last_seen.to_rfc3339(),
        });
        let change = {
            let mut results = self.lock();
            let change = DiscoveryChange::classify(results.get(&result.id), &result);
            results.insert(result.id.clone(), result);
            change
        };

        if change != DiscoveryChange::Unchanged
            && let Err(err) = self.inner.emitter.emit("result", &payload)
        {
            tracing::warn!(strategy = %self.inner.id, %err, "discovery listener failed");
        }
        Ok(change)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, DiscoveryResult>> {
        self.inner
            .results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for DiscoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryStrategy")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("results", &self.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use devicekit_domain::discovery::DiscoveryPayload;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn mdns(id: &str, address: &str, secs: i64) -> DiscoveryResult {
        DiscoveryResult {
            id: id.to_string(),
            address: address.to_string(),
            last_seen: chrono::Utc.timestamp_opt(secs, 0).unwrap(),
            payload: DiscoveryPayload::MdnsSd {
                name: "shelly".to_string(),
                host: format!("{id}.local"),
                port: 80,
                txt: BTreeMap::new(),
            },
        }
    }

    #[test]
    fn should_keep_latest_result_per_id() {
        let strategy = DiscoveryStrategy::new("shelly", DiscoveryKind::MdnsSd);
        strategy.record(mdns("a", "10.0.0.2", 1)).unwrap();
        strategy.record(mdns("b", "10.0.0.3", 1)).unwrap();
        strategy.record(mdns("a", "10.0.0.4", 2)).unwrap();

        assert_eq!(strategy.discovery_results().len(), 2);
        assert_eq!(strategy.discovery_result("a").unwrap().address, "10.0.0.4");
        assert!(strategy.discovery_result("c").is_none());
    }

    #[test]
    fn should_reject_result_of_other_kind() {
        let strategy = DiscoveryStrategy::new("mac", DiscoveryKind::Mac);
        let err = strategy.record(mdns("a", "10.0.0.2", 1)).unwrap_err();
        assert_eq!(
            err,
            DeviceKitError::Validation(ValidationError::DiscoveryKindMismatch {
                expected: "mac".to_string(),
                actual: "mdns-sd".to_string(),
            })
        );
    }

    #[test]
    fn should_emit_only_when_result_changes() {
        let strategy = DiscoveryStrategy::new("shelly", DiscoveryKind::MdnsSd);
        let emitted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&emitted);
        strategy.emitter().on("result", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(
            strategy.record(mdns("a", "10.0.0.2", 1)).unwrap(),
            DiscoveryChange::FirstSeen
        );
        assert_eq!(
            strategy.record(mdns("a", "10.0.0.2", 1)).unwrap(),
            DiscoveryChange::Unchanged
        );
        assert_eq!(emitted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn should_carry_manifest_config() {
        let manifest: DiscoveryStrategyManifest = serde_json::from_value(serde_json::json!({
            "type": "mdns-sd",
            "mdns-sd": { "name": "shelly", "protocol": "tcp" }
        }))
        .unwrap();
        let strategy = DiscoveryStrategy::from_manifest("shelly", &manifest);
        assert_eq!(strategy.kind(), DiscoveryKind::MdnsSd);
        assert!(strategy.config().contains_key("mdns-sd"));
    }
}
