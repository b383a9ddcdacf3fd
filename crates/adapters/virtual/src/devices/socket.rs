use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use devicekit_app::device::{Device, DeviceBehavior};
use devicekit_app::ports::Host;
use devicekit_domain::error::HookError;
use devicekit_domain::settings::SettingsChange;
use devicekit_domain::value::{Energy, SettingValue};

use super::{hook_error, init_onoff};
use crate::bus::VirtualBus;

/// Setting holding the power drawn by whatever is plugged in, in watts.
pub const LOAD_SETTING: &str = "load_w";

/// A switchable socket reporting an energy approximation from its
/// configured load.
#[derive(Debug, Clone)]
pub struct VirtualSocket {
    bus: Arc<VirtualBus>,
}

impl VirtualSocket {
    #[must_use]
    pub fn new(bus: Arc<VirtualBus>) -> Self {
        Self { bus }
    }
}

fn load_watts(value: Option<&SettingValue>) -> Result<f64, HookError> {
    match value {
        None | Some(SettingValue::Null) => Ok(0.0),
        Some(value) => match value.as_f64() {
            Some(watts) if watts >= 0.0 => Ok(watts),
            _ => Err(HookError::new(format!(
                "{LOAD_SETTING} must be a non-negative number"
            ))),
        },
    }
}

fn approximation(watts: f64) -> Energy {
    let mut energy = Energy::new();
    energy.insert(
        "approximation".to_string(),
        json!({ "usageOn": watts, "usageOff": 0 }),
    );
    energy
}

#[async_trait]
impl<H: Host> DeviceBehavior<H> for VirtualSocket {
    async fn on_init(&self, device: &Device<H>) -> Result<(), HookError> {
        init_onoff(device, &self.bus).await?;
        let watts = load_watts(device.setting(LOAD_SETTING).as_ref())?;
        device
            .set_energy(approximation(watts))
            .await
            .map_err(|err| hook_error(&err))
    }

    async fn on_settings(
        &self,
        device: &Device<H>,
        change: &SettingsChange,
    ) -> Result<Option<String>, HookError> {
        if !change.changed_keys.iter().any(|key| key == LOAD_SETTING) {
            return Ok(None);
        }
        let watts = load_watts(change.new_settings.get(LOAD_SETTING))?;
        device
            .set_energy(approximation(watts))
            .await
            .map_err(|err| hook_error(&err))?;
        Ok(Some(format!("Energy estimate updated to {watts} W")))
    }
}
