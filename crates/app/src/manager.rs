//! Driver manager: one per app run.
//!
//! Holds the app manifest and builds each declared driver when the app
//! registers its behaviour. The manifest is passed in explicitly and each
//! driver receives its own [`DriverManifest`](devicekit_domain::manifest::DriverManifest).

use std::collections::BTreeMap;
use std::sync::Arc;

use devicekit_domain::device::DeviceRecord;
use devicekit_domain::error::{DeviceKitError, NotFoundError, ValidationError};
use devicekit_domain::manifest::AppManifest;

use crate::device::Device;
use crate::discovery::DiscoveryStrategy;
use crate::driver::{DeviceClassRegistry, Driver, DriverBehavior};
use crate::ports::Host;

pub struct DriverManager<H: Host> {
    manifest: AppManifest,
    host: Arc<H>,
    drivers: BTreeMap<String, Driver<H>>,
}

impl<H: Host> DriverManager<H> {
    #[must_use]
    pub fn new(manifest: AppManifest, host: Arc<H>) -> Self {
        Self {
            manifest,
            host,
            drivers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn manifest(&self) -> &AppManifest {
        &self.manifest
    }

    #[must_use]
    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    /// Build the driver the manifest declares as `driver_id`.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] (`Driver`) when the manifest does not
    /// declare it, or [`ValidationError::DriverAlreadyRegistered`].
    #[tracing::instrument(skip(self, behavior, classes))]
    pub fn register(
        &mut self,
        driver_id: &str,
        behavior: impl DriverBehavior<H>,
        classes: DeviceClassRegistry<H>,
    ) -> Result<Driver<H>, DeviceKitError> {
        if self.drivers.contains_key(driver_id) {
            return Err(ValidationError::DriverAlreadyRegistered(driver_id.to_string()).into());
        }
        let manifest = self.manifest.driver(driver_id).ok_or_else(|| NotFoundError {
            entity: "Driver",
            id: driver_id.to_string(),
        })?;

        let mut builder = Driver::builder(manifest.clone(), Arc::clone(&self.host))
            .behavior(behavior)
            .classes(classes);
        if let Some((strategy_id, strategy)) = self.manifest.discovery_for(manifest) {
            builder = builder.discovery_strategy(DiscoveryStrategy::from_manifest(strategy_id, strategy));
        }
        let driver = builder.build()?;
        self.drivers.insert(driver_id.to_string(), driver.clone());
        tracing::info!(driver = driver_id, "driver registered");
        Ok(driver)
    }

    #[must_use]
    pub fn driver(&self, driver_id: &str) -> Option<&Driver<H>> {
        self.drivers.get(driver_id)
    }

    /// Registered drivers, by id.
    pub fn drivers(&self) -> impl Iterator<Item = &Driver<H>> {
        self.drivers.values()
    }

    /// Initialise every registered driver. A failing driver is logged and
    /// does not stop the others.
    pub async fn init_all(&self) {
        for driver in self.drivers.values() {
            if let Err(err) = driver.init().await {
                tracing::warn!(driver = driver.id(), %err, "driver init failed");
            }
        }
    }

    /// Hand each persisted record to its driver. Records that cannot be
    /// restored are logged and skipped.
    pub async fn restore(&self, records: Vec<DeviceRecord>) -> Vec<Device<H>> {
        let mut restored = Vec::with_capacity(records.len());
        for record in records {
            let app_id = record.app_id;
            let Some(driver) = self.drivers.get(&record.driver_id) else {
                tracing::warn!(%app_id, driver = %record.driver_id, "no driver for persisted device");
                continue;
            };
            match driver.restore_device(record).await {
                Ok(device) => restored.push(device),
                Err(err) => tracing::warn!(%app_id, %err, "failed to restore device"),
            }
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DefaultDriver;
    use crate::host::InMemoryHost;
    use devicekit_domain::device::DeviceDescriptor;
    use devicekit_domain::device_data::DeviceData;
    use devicekit_domain::id::DeviceAppId;

    const MANIFEST: &str = r#"{
        "id": "com.example.home",
        "drivers": [
            { "id": "bulb", "name": "Bulb", "class": "light", "capabilities": ["onoff"], "discovery": "bulbs" },
            { "id": "socket", "name": "Socket", "class": "socket", "capabilities": ["onoff"] }
        ],
        "discovery": {
            "bulbs": { "type": "mac", "mac": { "manufacturer": [0, 23, 136] } }
        }
    }"#;

    fn manager() -> DriverManager<InMemoryHost> {
        DriverManager::new(
            AppManifest::from_json(MANIFEST).unwrap(),
            Arc::new(InMemoryHost::new()),
        )
    }

    fn record(driver_id: &str) -> DeviceRecord {
        DeviceRecord {
            app_id: DeviceAppId::new(),
            driver_id: driver_id.to_string(),
            descriptor: DeviceDescriptor::builder()
                .name("Device")
                .data(DeviceData::with_id(driver_id))
                .class("light")
                .capability("onoff")
                .build()
                .unwrap(),
            state: BTreeMap::new(),
        }
    }

    #[test]
    fn should_wire_declared_discovery_strategy() {
        let mut manager = manager();
        let bulb = manager
            .register("bulb", DefaultDriver, DeviceClassRegistry::default())
            .unwrap();
        let socket = manager
            .register("socket", DefaultDriver, DeviceClassRegistry::default())
            .unwrap();

        assert_eq!(bulb.discovery_strategy().unwrap().id(), "bulbs");
        assert!(socket.discovery_strategy().is_none());
        assert_eq!(manager.drivers().count(), 2);
    }

    #[test]
    fn should_reject_undeclared_or_repeated_driver() {
        let mut manager = manager();
        assert!(matches!(
            manager.register("thermostat", DefaultDriver, DeviceClassRegistry::default()),
            Err(DeviceKitError::NotFound(_))
        ));
        manager
            .register("bulb", DefaultDriver, DeviceClassRegistry::default())
            .unwrap();
        assert!(matches!(
            manager.register("bulb", DefaultDriver, DeviceClassRegistry::default()),
            Err(DeviceKitError::Validation(ValidationError::DriverAlreadyRegistered(_)))
        ));
    }

    #[tokio::test]
    async fn should_route_records_to_their_driver() {
        let mut manager = manager();
        manager
            .register("bulb", DefaultDriver, DeviceClassRegistry::default())
            .unwrap();
        manager
            .register("socket", DefaultDriver, DeviceClassRegistry::default())
            .unwrap();
        manager.init_all().await;

        let restored = manager
            .restore(vec![record("bulb"), record("socket"), record("heater")])
            .await;

        assert_eq!(restored.len(), 2);
        assert_eq!(manager.driver("bulb").unwrap().devices().len(), 1);
        assert_eq!(manager.driver("socket").unwrap().devices().len(), 1);
    }
}
