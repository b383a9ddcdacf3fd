//! Common error types used across the workspace.
//!
//! Each failure family has its own typed error and converts into
//! [`DeviceKitError`] via `#[from]`. Every type here is `Clone` so a single
//! outcome can be handed to several waiters (debounced capability requests).

/// Top-level error for device, driver and host operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceKitError {
    #[error("validation error")]
    Validation(#[from] ValidationError),

    #[error("not found")]
    NotFound(#[from] NotFoundError),

    #[error("rejected by host")]
    Rejected(#[from] RejectedError),

    #[error("hook failed")]
    Hook(#[from] HookError),

    #[error("invalid manifest")]
    Manifest(#[from] ManifestError),

    /// The device was destroyed; further calls are outside its contract.
    #[error("device has been destroyed")]
    Destroyed,
}

/// A domain invariant was violated by the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("device class must not be empty")]
    EmptyClass,

    #[error("capability id must not be empty")]
    EmptyCapabilityId,

    #[error("capability {0} is declared more than once")]
    DuplicateCapability(String),

    #[error("capability {0} is not part of the device")]
    UnknownCapability(String),

    #[error("a listener is already registered for capability {0}")]
    ListenerAlreadyRegistered(String),

    #[error("a multiple capability listener needs at least one capability")]
    NoCapabilities,

    #[error("driver {0} is already registered")]
    DriverAlreadyRegistered(String),

    #[error("a device with data {0} is already paired")]
    DeviceAlreadyPaired(String),

    #[error("device belongs to driver {actual}, not {expected}")]
    WrongDriver { expected: String, actual: String },

    #[error("discovery result of kind {actual} does not match strategy kind {expected}")]
    DiscoveryKindMismatch { expected: String, actual: String },

    #[error("pair session is closed")]
    SessionClosed,

    #[error("invalid pairing payload: {0}")]
    InvalidPayload(String),
}

/// A lookup did not match anything.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} not found: {id}")]
pub struct NotFoundError {
    /// Kind of thing that was looked up (e.g. `"Device"`).
    pub entity: &'static str,
    /// The key used for the lookup.
    pub id: String,
}

/// The host refused to apply an operation (e.g. the device is unreachable).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("host rejected {operation} for device {device}: {reason}")]
pub struct RejectedError {
    pub device: String,
    pub operation: &'static str,
    pub reason: String,
}

/// An application hook signalled a domain failure.
///
/// The message is user-facing: it becomes the unavailability reason when
/// returned from discovery or init hooks, and is surfaced to the requester
/// when returned from a capability listener.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HookError {
    pub message: String,
}

impl HookError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The app manifest could not be parsed or is inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to parse manifest: {0}")]
    Parse(String),

    #[error("driver {0} is declared more than once")]
    DuplicateDriver(String),

    #[error("driver {driver} references unknown discovery strategy {strategy}")]
    UnknownDiscoveryStrategy { driver: String, strategy: String },
}

impl From<serde_json::Error> for ManifestError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
