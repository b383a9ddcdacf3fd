//! Typed identifiers.
//!
//! Ids the host sees (paired devices, pairing sessions) are random UUIDs and
//! serialize as plain strings. Emitter listener handles never leave the
//! process and are sequential.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

macro_rules! uuid_id {
    ($(#[doc = $doc:expr])* $name:ident) => {
        $(#[doc = $doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl Default for $name {
            fn default() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl $name {
            /// Generate a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self::default()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identifier the host assigns to a paired device (its `appId`).
    DeviceAppId
);

uuid_id!(
    /// Identifier of one pairing session.
    PairSessionId
);

/// Handle returned when subscribing to an event emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    /// Next handle, unique within the process.
    #[must_use]
    pub fn new() -> Self {
        Self(NEXT_LISTENER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_generate_unique_app_ids() {
        assert_ne!(DeviceAppId::new(), DeviceAppId::new());
    }

    #[test]
    fn should_parse_displayed_app_id() {
        let id = DeviceAppId::new();
        let parsed: DeviceAppId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<PairSessionId>().is_err());
    }

    #[test]
    fn should_serialize_app_id_as_plain_string() {
        let id = DeviceAppId::new();
        assert_eq!(
            serde_json::to_value(id).unwrap(),
            serde_json::Value::String(id.to_string())
        );
    }

    #[test]
    fn should_hand_out_increasing_listener_ids() {
        let first = ListenerId::new();
        let second = ListenerId::new();
        assert!(second > first);
        assert!(first.to_string().starts_with("listener#"));
    }
}
