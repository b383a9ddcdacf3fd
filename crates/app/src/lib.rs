//! # devicekit-app
//!
//! Runtime model of the device/driver contract and the **host port**.
//!
//! ## Responsibilities
//! - Define the [`Host`](ports::Host) port: every operation a device
//!   delegates to the host process (persistence, capability broker, …)
//! - Provide the runtime entities application code talks to:
//!   - [`EventEmitter`](emitter::EventEmitter): named-event pub/sub
//!   - [`Device`](device::Device): capability state, settings, store,
//!     availability and hooks of one paired device
//!   - [`Driver`](driver::Driver): pairing, discovery routing and two-phase
//!     device construction for one declared device type
//!   - [`DiscoveryStrategy`](discovery::DiscoveryStrategy) and
//!     [`PairSession`](pairing::PairSession) collaborators
//!   - [`DriverManager`](manager::DriverManager): one per app run
//! - Provide an in-process [`InMemoryHost`](host::InMemoryHost) for tests and
//!   simulation
//!
//! ## Dependency rule
//! Depends on `devicekit-domain` only (plus `tokio` for timers and channels).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod device;
pub mod discovery;
pub mod driver;
pub mod emitter;
pub mod host;
pub mod manager;
pub mod pairing;
pub mod ports;
