//! # devicekit-adapter-virtual
//!
//! Virtual integration: simulated devices behind an in-process radio bus,
//! for tests and demonstration.
//!
//! ## Provided drivers
//!
//! | Driver | Pairing | Device classes |
//! |--------|---------|----------------|
//! | `virtual-light` | list from a fixed inventory | on/off light, `dimmable` light with debounced dim/colour |
//! | `virtual-socket` | custom flow, user enters a serial number | socket with an energy estimate from the `load_w` setting |
//! | `virtual-sensor` | list from MAC discovery results | temperature sensor with calibration offset and heat alarm |
//!
//! Accepted capability changes are sent on the [`VirtualBus`]. Taking an
//! endpoint offline makes its listeners fail, the way an unresponsive
//! device would.
//!
//! ## Dependency rule
//!
//! Depends on `devicekit-app` (runtime, host port) and `devicekit-domain`
//! only.

pub mod bus;
pub mod devices;
pub mod drivers;

use std::sync::Arc;
use std::time::Duration;

use devicekit_app::driver::Driver;
use devicekit_app::manager::DriverManager;
use devicekit_app::ports::Host;
use devicekit_domain::error::DeviceKitError;

pub use bus::{Transmission, VirtualBus};
use drivers::{LightDriver, SensorDriver, SocketDriver};

pub const LIGHT_DRIVER: &str = "virtual-light";
pub const SOCKET_DRIVER: &str = "virtual-socket";
pub const SENSOR_DRIVER: &str = "virtual-sensor";

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Virtual integration wiring the simulated drivers into a
/// [`DriverManager`].
#[derive(Debug, Clone)]
pub struct VirtualIntegration {
    bus: Arc<VirtualBus>,
    debounce: Duration,
}

impl Default for VirtualIntegration {
    fn default() -> Self {
        Self {
            bus: Arc::new(VirtualBus::new()),
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

impl VirtualIntegration {
    /// Window used to coalesce brightness and colour requests of dimmable
    /// lights.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<VirtualBus> {
        &self.bus
    }

    #[must_use]
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Register every virtual driver the manager's manifest declares.
    /// Undeclared ones are skipped.
    ///
    /// # Errors
    ///
    /// Returns the manager's error when a driver is already registered.
    pub fn register<H: Host>(
        &self,
        manager: &mut DriverManager<H>,
    ) -> Result<Vec<Driver<H>>, DeviceKitError> {
        let mut registered = Vec::new();
        for driver_id in [LIGHT_DRIVER, SOCKET_DRIVER, SENSOR_DRIVER] {
            if manager.manifest().driver(driver_id).is_none() {
                tracing::debug!(driver = driver_id, "not declared, skipping");
                continue;
            }
            let driver = match driver_id {
                LIGHT_DRIVER => manager.register(
                    driver_id,
                    LightDriver,
                    drivers::light_classes(&self.bus, self.debounce),
                )?,
                SOCKET_DRIVER => {
                    manager.register(driver_id, SocketDriver, drivers::socket_classes(&self.bus))?
                }
                _ => manager.register(driver_id, SensorDriver, drivers::sensor_classes())?,
            };
            registered.push(driver);
        }
        Ok(registered)
    }
}
