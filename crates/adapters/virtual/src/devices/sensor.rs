use async_trait::async_trait;
use serde_json::json;

use devicekit_app::device::{Device, DeviceBehavior};
use devicekit_app::ports::Host;
use devicekit_domain::discovery::DiscoveryResult;
use devicekit_domain::error::{DeviceKitError, HookError};
use devicekit_domain::settings::SettingsChange;

use super::hook_error;

/// Calibration added to every reading, in °C.
pub const OFFSET_SETTING: &str = "offset";
/// Reading at or above which `alarm_heat` turns on, in °C.
pub const HEAT_THRESHOLD_SETTING: &str = "heat_threshold";

const MAX_OFFSET: f64 = 10.0;
const DEFAULT_HEAT_THRESHOLD: f64 = 40.0;
const DEFAULT_TEMPERATURE: f64 = 20.0;

/// A temperature sensor found through MAC discovery. It never receives
/// commands; readings are pushed with [`report_temperature`].
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtualSensor;

#[async_trait]
impl<H: Host> DeviceBehavior<H> for VirtualSensor {
    async fn on_init(&self, device: &Device<H>) -> Result<(), HookError> {
        if device.capability_value("measure_temperature").is_some() {
            return Ok(());
        }
        let initial = device
            .store_value("initial_temperature")
            .and_then(|value| value.as_f64())
            .unwrap_or(DEFAULT_TEMPERATURE);
        device
            .set_capability_value("measure_temperature", json!(initial))
            .await
            .map_err(|err| hook_error(&err))
    }

    async fn on_settings(
        &self,
        _device: &Device<H>,
        change: &SettingsChange,
    ) -> Result<Option<String>, HookError> {
        if let Some(offset) = change.new_settings.get(OFFSET_SETTING)
            && !offset.is_null()
        {
            match offset.as_f64() {
                Some(offset) if offset.abs() <= MAX_OFFSET => {}
                _ => {
                    return Err(HookError::new(format!(
                        "{OFFSET_SETTING} must be between -{MAX_OFFSET} and {MAX_OFFSET}"
                    )));
                }
            }
        }
        Ok(None)
    }

    async fn on_discovery_available(
        &self,
        device: &Device<H>,
        result: &DiscoveryResult,
    ) -> Result<(), HookError> {
        device
            .emitter()
            .log(format_args!("in range at {}", result.address));
        device.unset_warning().await.map_err(|err| hook_error(&err))?;
        if !device.available() {
            device.set_available().await.map_err(|err| hook_error(&err))?;
        }
        Ok(())
    }

    async fn on_discovery_address_changed(&self, device: &Device<H>, result: &DiscoveryResult) {
        if let Err(err) = device
            .set_store_value("address", json!(result.address))
            .await
        {
            tracing::warn!(device = %device.app_id(), %err, "failed to remember sensor address");
        }
    }

    async fn on_discovery_last_seen_changed(&self, device: &Device<H>, result: &DiscoveryResult) {
        tracing::trace!(device = %device.app_id(), last_seen = %result.last_seen, "sensor seen");
    }
}

/// Publish a reading from the sensor, corrected by its `offset` setting,
/// and update `alarm_heat` when the device has it.
///
/// # Errors
///
/// Returns the host's rejection, or [`DeviceKitError::Destroyed`].
pub async fn report_temperature<H: Host>(
    device: &Device<H>,
    celsius: f64,
) -> Result<f64, DeviceKitError> {
    let offset = device
        .setting(OFFSET_SETTING)
        .and_then(|value| value.as_f64())
        .unwrap_or(0.0);
    let corrected = celsius + offset;
    device
        .set_capability_value("measure_temperature", json!(corrected))
        .await?;

    if device.has_capability("alarm_heat") {
        let threshold = device
            .setting(HEAT_THRESHOLD_SETTING)
            .and_then(|value| value.as_f64())
            .unwrap_or(DEFAULT_HEAT_THRESHOLD);
        let alarm = corrected >= threshold;
        if device.capability_value("alarm_heat") != Some(json!(alarm)) {
            device
                .set_capability_value("alarm_heat", json!(alarm))
                .await?;
        }
    }
    Ok(corrected)
}
