//! Device data: the immutable identity blob a device receives at pairing.

use serde::{Deserialize, Serialize};

/// Pairing identity of a device.
///
/// Opaque to the platform apart from the conventional `id` field, which the
/// default discovery matcher compares against discovery result ids.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceData(serde_json::Value);

impl DeviceData {
    #[must_use]
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Shorthand for `{ "id": id }`.
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self(serde_json::json!({ "id": id.into() }))
    }

    /// The `id` field, when it is a string.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(serde_json::Value::as_str)
    }

    #[must_use]
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

impl From<serde_json::Value> for DeviceData {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Structural equality over two device data blobs.
///
/// Drivers use this to resolve a device from its data unless they supply a
/// narrower predicate.
#[must_use]
pub fn is_equal_device_data(a: &DeviceData, b: &DeviceData) -> bool {
    a == b
}
