//! Discovery results: host-supplied snapshots of discovered endpoints.
//!
//! A result is immutable once created. Devices decide whether a result
//! belongs to them with a local predicate; the driver then uses
//! [`DiscoveryChange::classify`] to pick which discovery hook to run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// UTC timestamp of the last time an endpoint was seen.
pub type Timestamp = DateTime<Utc>;

/// A discovered physical endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    /// Stable endpoint identifier (MAC, mDNS instance name, SSDP USN, …).
    pub id: String,
    /// Network address the endpoint was last seen at.
    pub address: String,
    pub last_seen: Timestamp,
    pub payload: DiscoveryPayload,
}

/// Protocol-specific part of a [`DiscoveryResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveryPayload {
    Mac {
        mac: String,
    },
    MdnsSd {
        name: String,
        host: String,
        port: u16,
        txt: BTreeMap<String, String>,
    },
    Ssdp {
        headers: BTreeMap<String, String>,
    },
}

impl DiscoveryPayload {
    /// The strategy type this payload belongs to.
    #[must_use]
    pub fn kind(&self) -> DiscoveryKind {
        match self {
            Self::Mac { .. } => DiscoveryKind::Mac,
            Self::MdnsSd { .. } => DiscoveryKind::MdnsSd,
            Self::Ssdp { .. } => DiscoveryKind::Ssdp,
        }
    }
}

/// Discovery mechanism declared by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryKind {
    Mac,
    #[serde(rename = "mdns-sd")]
    MdnsSd,
    Ssdp,
}

impl DiscoveryKind {
    /// The manifest spelling of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mac => "mac",
            Self::MdnsSd => "mdns-sd",
            Self::Ssdp => "ssdp",
        }
    }
}

impl std::fmt::Display for DiscoveryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What changed between two sightings of the same endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryChange {
    /// The device has not seen this endpoint before.
    FirstSeen,
    AddressChanged,
    LastSeenChanged,
    Unchanged,
}

impl DiscoveryChange {
    /// Compare a new sighting with the previous one delivered to a device.
    ///
    /// An address change wins over a last-seen change.
    #[must_use]
    pub fn classify(previous: Option<&DiscoveryResult>, current: &DiscoveryResult) -> Self {
        match previous {
            None => Self::FirstSeen,
            Some(prev) if prev.address != current.address => Self::AddressChanged,
            Some(prev) if prev.last_seen != current.last_seen => Self::LastSeenChanged,
            Some(_) => Self::Unchanged,
        }
    }
}
