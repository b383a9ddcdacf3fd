use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use devicekit_app::device::{CapabilityValues, Device, DeviceBehavior};
use devicekit_app::ports::Host;
use devicekit_domain::error::HookError;

use super::{endpoint, hook_error, init_onoff};
use crate::bus::VirtualBus;

/// Capabilities a dimmable light sends to the bus as one frame.
const COLOR_CAPABILITIES: [&str; 3] = ["dim", "light_hue", "light_saturation"];

/// A plain on/off light.
#[derive(Debug, Clone)]
pub struct VirtualLight {
    bus: Arc<VirtualBus>,
}

impl VirtualLight {
    #[must_use]
    pub fn new(bus: Arc<VirtualBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl<H: Host> DeviceBehavior<H> for VirtualLight {
    async fn on_init(&self, device: &Device<H>) -> Result<(), HookError> {
        init_onoff(device, &self.bus).await
    }
}

/// A light with brightness and colour. Brightness and colour requests that
/// arrive close together are sent as a single frame.
#[derive(Debug, Clone)]
pub struct DimmableLight {
    bus: Arc<VirtualBus>,
    debounce: Duration,
}

impl DimmableLight {
    #[must_use]
    pub fn new(bus: Arc<VirtualBus>, debounce: Duration) -> Self {
        Self { bus, debounce }
    }
}

fn check_unit_range(values: &CapabilityValues) -> Result<(), HookError> {
    for (capability, value) in values {
        match value.as_f64() {
            Some(level) if (0.0..=1.0).contains(&level) => {}
            _ => {
                return Err(HookError::new(format!(
                    "{capability} must be a number between 0 and 1"
                )));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl<H: Host> DeviceBehavior<H> for DimmableLight {
    async fn on_init(&self, device: &Device<H>) -> Result<(), HookError> {
        init_onoff(device, &self.bus).await?;

        let grouped: Vec<&str> = COLOR_CAPABILITIES
            .into_iter()
            .filter(|id| device.has_capability(id))
            .collect();
        if grouped.is_empty() {
            return Ok(());
        }

        let endpoint = endpoint(device)?;
        let bus = Arc::clone(&self.bus);
        device
            .register_multiple_capability_listener(
                grouped,
                self.debounce,
                move |values: CapabilityValues, _options: CapabilityValues| {
                    let sent = check_unit_range(&values).and_then(|()| bus.transmit(&endpoint, values));
                    async move { sent }
                },
            )
            .map_err(|err| hook_error(&err))
    }
}
