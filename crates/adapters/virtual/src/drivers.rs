//! Driver behaviours of the virtual integration and the device classes
//! each of them builds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use devicekit_app::driver::{DeviceClassRegistry, DeviceProbe, Driver, DriverBehavior, PairFlow};
use devicekit_app::pairing::PairSession;
use devicekit_app::ports::Host;
use devicekit_domain::device::DeviceDescriptor;
use devicekit_domain::device_data::DeviceData;
use devicekit_domain::discovery::DiscoveryPayload;
use devicekit_domain::error::{DeviceKitError, HookError, ValidationError};

use crate::bus::VirtualBus;
use crate::devices::{DimmableLight, VirtualLight, VirtualSensor, VirtualSocket};

/// Class tag of lights with a `dim` capability.
pub const DIMMABLE_CLASS: &str = "dimmable";

/// Serial numbers of virtual sockets start with this.
pub const SOCKET_SERIAL_PREFIX: &str = "SKT-";

/// Lights sitting on the bus, paired or not: `(id, name, capabilities)`.
const LIGHT_INVENTORY: &[(&str, &str, &[&str])] = &[
    ("light-1", "Hallway light", &["onoff"]),
    ("light-2", "Living room lamp", &["onoff", "dim", "light_hue"]),
];

/// Lights are listed from a fixed inventory. Lights with `dim` get the
/// dimmable class.
#[derive(Debug, Clone, Copy, Default)]
pub struct LightDriver;

#[async_trait]
impl<H: Host> DriverBehavior<H> for LightDriver {
    async fn on_pair_list_devices(
        &self,
        driver: &Driver<H>,
    ) -> Result<Vec<DeviceDescriptor>, HookError> {
        let mut found = Vec::new();
        for &(id, name, capabilities) in LIGHT_INVENTORY {
            let data = DeviceData::with_id(id);
            if driver.device(&data).is_some() {
                continue;
            }
            let descriptor = DeviceDescriptor::builder()
                .name(name)
                .data(data)
                .class(driver.manifest().class.as_str())
                .capabilities(capabilities.iter().copied())
                .build()
                .map_err(|err| HookError::new(err.to_string()))?;
            found.push(descriptor);
        }
        Ok(found)
    }

    fn on_map_device_class(&self, probe: &DeviceProbe<'_>) -> Option<String> {
        probe
            .has_capability("dim")
            .then(|| DIMMABLE_CLASS.to_string())
    }
}

#[must_use]
pub fn light_classes<H: Host>(
    bus: &Arc<VirtualBus>,
    debounce: Duration,
) -> DeviceClassRegistry<H> {
    let plain = Arc::clone(bus);
    let dimmable = Arc::clone(bus);
    DeviceClassRegistry::new(move || VirtualLight::new(Arc::clone(&plain))).register(
        DIMMABLE_CLASS,
        move || DimmableLight::new(Arc::clone(&dimmable), debounce),
    )
}

/// Sockets pair by typing the serial number printed on them.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketDriver;

fn socket_descriptor(
    driver_class: &str,
    payload: &serde_json::Value,
) -> Result<DeviceDescriptor, DeviceKitError> {
    let serial = payload
        .get("serial")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|serial| {
            serial.starts_with(SOCKET_SERIAL_PREFIX) && serial.len() > SOCKET_SERIAL_PREFIX.len()
        })
        .ok_or_else(|| {
            ValidationError::InvalidPayload(format!(
                "serial must look like {SOCKET_SERIAL_PREFIX}0001"
            ))
        })?;
    let name = payload
        .get("name")
        .and_then(serde_json::Value::as_str)
        .map_or_else(|| format!("Socket {serial}"), str::to_string);
    DeviceDescriptor::builder()
        .name(name)
        .data(DeviceData::with_id(serial))
        .class(driver_class)
        .capability("onoff")
        .build()
}

#[async_trait]
impl<H: Host> DriverBehavior<H> for SocketDriver {
    async fn on_pair(
        &self,
        driver: &Driver<H>,
        session: &PairSession,
    ) -> Result<PairFlow, HookError> {
        let handler_driver = driver.clone();
        session.set_handler("serial", move |payload: serde_json::Value| {
            let driver = handler_driver.clone();
            async move {
                let descriptor = socket_descriptor(&driver.manifest().class, &payload)?;
                let device = driver.add_device(descriptor).await?;
                Ok::<_, DeviceKitError>(json!({ "app_id": device.app_id().to_string() }))
            }
        });
        session
            .emit(
                "instructions",
                json!({ "text": format!("Enter the serial number, it starts with {SOCKET_SERIAL_PREFIX}") }),
            )
            .map_err(|err| HookError::new(err.to_string()))?;
        Ok(PairFlow::Custom)
    }
}

#[must_use]
pub fn socket_classes<H: Host>(bus: &Arc<VirtualBus>) -> DeviceClassRegistry<H> {
    let bus = Arc::clone(bus);
    DeviceClassRegistry::new(move || VirtualSocket::new(Arc::clone(&bus)))
}

/// Sensors are listed from what MAC discovery has seen so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct SensorDriver;

#[async_trait]
impl<H: Host> DriverBehavior<H> for SensorDriver {
    async fn on_pair_list_devices(
        &self,
        driver: &Driver<H>,
    ) -> Result<Vec<DeviceDescriptor>, HookError> {
        let Some(strategy) = driver.discovery_strategy() else {
            return Ok(Vec::new());
        };
        let manifest = driver.manifest();
        let mut found = Vec::new();
        for result in strategy.discovery_results().into_values() {
            let DiscoveryPayload::Mac { mac } = &result.payload else {
                continue;
            };
            let data = DeviceData::with_id(result.id.as_str());
            if driver.device(&data).is_some() {
                continue;
            }
            let mut builder = DeviceDescriptor::builder()
                .name(format!("Sensor {mac}"))
                .data(data)
                .class(manifest.class.as_str())
                .capabilities(manifest.capabilities.iter().cloned())
                .store_value("address", json!(result.address));
            for (capability, options) in &manifest.capabilities_options {
                builder = builder.capability_options(capability.as_str(), options.clone());
            }
            let descriptor = builder
                .build()
                .map_err(|err| HookError::new(err.to_string()))?;
            found.push(descriptor);
        }
        Ok(found)
    }
}

#[must_use]
pub fn sensor_classes<H: Host>() -> DeviceClassRegistry<H> {
    DeviceClassRegistry::new(|| VirtualSensor)
}
