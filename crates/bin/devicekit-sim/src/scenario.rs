//! Scripted run of the virtual drivers: pair devices, then drive their
//! capabilities the way a user and the radio would.

use chrono::Utc;
use serde_json::json;

use devicekit_adapter_virtual::devices::report_temperature;
use devicekit_adapter_virtual::{LIGHT_DRIVER, SENSOR_DRIVER, SOCKET_DRIVER, VirtualIntegration};
use devicekit_app::driver::Driver;
use devicekit_app::manager::DriverManager;
use devicekit_app::ports::Host;
use devicekit_domain::device::DeviceDescriptor;
use devicekit_domain::discovery::{DiscoveryPayload, DiscoveryResult};
use devicekit_domain::error::{DeviceKitError, ValidationError};

use crate::config::ScenarioConfig;

const SIMULATED_SENSOR_MAC: &str = "00:17:88:01:02:03";

/// What a scenario run did.
#[derive(Debug, Default)]
pub struct Report {
    pub paired: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub transmissions: usize,
}

/// Pair devices on every registered virtual driver and exercise them.
///
/// Capability requests the device refuses are counted, not propagated.
///
/// # Errors
///
/// Returns the first pairing failure.
pub async fn run<H: Host>(
    manager: &DriverManager<H>,
    integration: &VirtualIntegration,
    config: &ScenarioConfig,
) -> Result<Report, DeviceKitError> {
    let mut report = Report::default();

    if let Some(driver) = manager.driver(SENSOR_DRIVER) {
        driver.handle_discovery_result(sighting()).await?;
    }
    for driver_id in [LIGHT_DRIVER, SENSOR_DRIVER] {
        if let Some(driver) = manager.driver(driver_id) {
            report.paired += pair_listed(driver, config.pair_all).await?;
        }
    }
    if let Some(driver) = manager.driver(SOCKET_DRIVER) {
        let session = driver.start_pairing().await?;
        for message in session.outbox() {
            tracing::info!(event = %message.event, payload = %message.payload, "pairing prompt");
        }
        session.call("serial", json!({ "serial": "SKT-0001" })).await?;
        session.close();
        report.paired += 1;
    }

    for driver in manager.drivers() {
        for device in driver.devices() {
            let mut requests = Vec::new();
            if device.has_capability("onoff") {
                requests.push(("onoff", json!(true)));
            }
            if device.has_capability("dim") {
                requests.push(("dim", json!(0.6)));
            }
            for (capability, value) in requests {
                match device
                    .handle_capability_request(capability, value, json!({}))
                    .await
                {
                    Ok(_) => report.accepted += 1,
                    Err(err) => {
                        tracing::warn!(device = %device.name(), capability, %err, "request refused");
                        report.rejected += 1;
                    }
                }
            }
            if device.has_capability("measure_temperature") {
                let reading = report_temperature(&device, 22.5).await?;
                tracing::info!(device = %device.name(), reading, "temperature reported");
            }
        }
    }

    report.transmissions = integration.bus().transmissions().len();
    Ok(report)
}

async fn pair_listed<H: Host>(driver: &Driver<H>, pair_all: bool) -> Result<usize, DeviceKitError> {
    let session = driver.start_pairing().await?;
    let listed = session.call("list_devices", serde_json::Value::Null).await?;
    let listed: Vec<DeviceDescriptor> = serde_json::from_value(listed)
        .map_err(|err| ValidationError::InvalidPayload(err.to_string()))?;

    let take = if pair_all { listed.len() } else { listed.len().min(1) };
    for descriptor in listed.into_iter().take(take) {
        tracing::info!(driver = driver.id(), name = %descriptor.name, "pairing");
        let payload = serde_json::to_value(&descriptor)
            .map_err(|err| ValidationError::InvalidPayload(err.to_string()))?;
        session.call("add_device", payload).await?;
    }
    session.close();
    Ok(take)
}

fn sighting() -> DiscoveryResult {
    DiscoveryResult {
        id: SIMULATED_SENSOR_MAC.to_string(),
        address: "192.168.1.40".to_string(),
        last_seen: Utc::now(),
        payload: DiscoveryPayload::Mac {
            mac: SIMULATED_SENSOR_MAC.to_string(),
        },
    }
}
