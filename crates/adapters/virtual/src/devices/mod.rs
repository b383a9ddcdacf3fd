//! Virtual device behaviours: light, dimmable light, socket, temperature
//! sensor.
//!
//! Every device is addressed on the [`VirtualBus`] by the `id` of its
//! pairing data.

mod light;
mod sensor;
mod socket;

pub use light::{DimmableLight, VirtualLight};
pub use sensor::{HEAT_THRESHOLD_SETTING, OFFSET_SETTING, VirtualSensor, report_temperature};
pub use socket::{LOAD_SETTING, VirtualSocket};

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;

use devicekit_app::device::Device;
use devicekit_app::ports::Host;
use devicekit_domain::error::{DeviceKitError, HookError};

use crate::bus::VirtualBus;

/// Bus address of a device.
fn endpoint<H: Host>(device: &Device<H>) -> Result<String, HookError> {
    device
        .data()
        .id()
        .map(str::to_string)
        .ok_or_else(|| HookError::new("device data has no id"))
}

/// Turn a runtime error into a hook error, keeping the underlying cause in
/// the message.
fn hook_error(err: &DeviceKitError) -> HookError {
    match err.source() {
        Some(source) => HookError::new(format!("{err}: {source}")),
        None => HookError::new(err.to_string()),
    }
}

/// Forward `onoff` requests to the bus and start switched off.
async fn init_onoff<H: Host>(device: &Device<H>, bus: &Arc<VirtualBus>) -> Result<(), HookError> {
    let endpoint = endpoint(device)?;
    let bus = Arc::clone(bus);
    device
        .register_capability_listener("onoff", move |value: serde_json::Value, _options| {
            let sent = match value.as_bool() {
                Some(on) => bus.transmit(
                    &endpoint,
                    BTreeMap::from([("onoff".to_string(), serde_json::Value::Bool(on))]),
                ),
                None => Err(HookError::new("onoff expects a boolean")),
            };
            async move { sent.map(|()| serde_json::Value::Null) }
        })
        .map_err(|err| hook_error(&err))?;

    if device.capability_value("onoff").is_none() {
        device
            .set_capability_value("onoff", serde_json::Value::Bool(false))
            .await
            .map_err(|err| hook_error(&err))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use devicekit_domain::error::ValidationError;

    #[test]
    fn should_keep_cause_in_hook_error() {
        let err: DeviceKitError = ValidationError::UnknownCapability("dim".to_string()).into();
        assert_eq!(
            hook_error(&err).message,
            "validation error: capability dim is not part of the device"
        );
        assert_eq!(hook_error(&DeviceKitError::Destroyed).message, "device has been destroyed");
    }
}
