//! Port definitions: traits the surrounding runtime implements.
//!
//! The host process is the one outside collaborator the device/driver model
//! talks to. Its boundary is defined here so the runtime model and any host
//! implementation (real bridge, simulator, test double) can depend on it
//! without depending on each other.

pub mod host;

pub use host::Host;
