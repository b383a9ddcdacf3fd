//! In-process host backed by plain maps.
//!
//! Applies every write to a [`DeviceRecord`] per device, keeps a log of the
//! calls it received and can be told that a device is unreachable, in which
//! case every write for it is rejected.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use devicekit_domain::availability::Availability;
use devicekit_domain::device::DeviceRecord;
use devicekit_domain::error::{DeviceKitError, NotFoundError, RejectedError};
use devicekit_domain::id::DeviceAppId;
use devicekit_domain::image::{CameraImage, Image};
use devicekit_domain::value::{CapabilityValue, Energy, Settings};

use crate::ports::Host;

/// One call received by the host, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCall {
    pub app_id: DeviceAppId,
    pub operation: &'static str,
}

/// Everything the host knows about one device.
#[derive(Debug, Clone)]
pub struct HostedDevice {
    pub record: DeviceRecord,
    pub availability: Availability,
    pub warning: Option<String>,
    pub album_art: Option<Image>,
    pub camera_images: BTreeMap<String, CameraImage>,
}

/// [`Host`] implementation that keeps everything in memory.
#[derive(Default)]
pub struct InMemoryHost {
    devices: Mutex<HashMap<DeviceAppId, HostedDevice>>,
    unreachable: Mutex<HashSet<DeviceAppId>>,
    calls: Mutex<Vec<HostCall>>,
    latency: Duration,
}

impl InMemoryHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every acknowledgement by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Mark a device reachable or not. Writes for unreachable devices are
    /// rejected.
    pub fn set_reachable(&self, app_id: DeviceAppId, reachable: bool) {
        let mut unreachable = lock(&self.unreachable);
        if reachable {
            unreachable.remove(&app_id);
        } else {
            unreachable.insert(app_id);
        }
    }

    #[must_use]
    pub fn device(&self, app_id: DeviceAppId) -> Option<HostedDevice> {
        lock(&self.devices).get(&app_id).cloned()
    }

    #[must_use]
    pub fn record(&self, app_id: DeviceAppId) -> Option<DeviceRecord> {
        self.device(app_id).map(|d| d.record)
    }

    /// Every persisted device, as it would be handed back on the next app
    /// start.
    #[must_use]
    pub fn records(&self) -> Vec<DeviceRecord> {
        lock(&self.devices)
            .values()
            .map(|d| d.record.clone())
            .collect()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<HostCall> {
        lock(&self.calls).clone()
    }

    /// Calls received for one device.
    #[must_use]
    pub fn calls_for(&self, app_id: DeviceAppId) -> Vec<&'static str> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.app_id == app_id)
            .map(|c| c.operation)
            .collect()
    }

    async fn apply<T, F>(
        &self,
        app_id: DeviceAppId,
        operation: &'static str,
        f: F,
    ) -> Result<T, DeviceKitError>
    where
        F: FnOnce(&mut HostedDevice) -> T + Send,
    {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        lock(&self.calls).push(HostCall { app_id, operation });

        if lock(&self.unreachable).contains(&app_id) {
            tracing::debug!(%app_id, operation, "rejecting call for unreachable device");
            return Err(RejectedError {
                device: app_id.to_string(),
                operation,
                reason: "device unreachable".to_string(),
            }
            .into());
        }

        let mut devices = lock(&self.devices);
        let device = devices.get_mut(&app_id).ok_or_else(|| NotFoundError {
            entity: "Device",
            id: app_id.to_string(),
        })?;
        Ok(f(device))
    }
}

impl Host for InMemoryHost {
    async fn register_device(&self, record: &DeviceRecord) -> Result<(), DeviceKitError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        lock(&self.calls).push(HostCall {
            app_id: record.app_id,
            operation: "register_device",
        });
        lock(&self.devices).insert(
            record.app_id,
            HostedDevice {
                record: record.clone(),
                availability: Availability::Available,
                warning: None,
                album_art: None,
                camera_images: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn unregister_device(&self, app_id: DeviceAppId) -> Result<(), DeviceKitError> {
        self.apply(app_id, "unregister_device", |_| ()).await?;
        lock(&self.devices).remove(&app_id);
        Ok(())
    }

    async fn set_capability_value(
        &self,
        app_id: DeviceAppId,
        capability_id: &str,
        value: &CapabilityValue,
    ) -> Result<(), DeviceKitError> {
        self.apply(app_id, "set_capability_value", |d| {
            // A value racing a removal must not bring the capability back.
            if d.record.descriptor.has_capability(capability_id) {
                d.record
                    .state
                    .insert(capability_id.to_string(), value.clone());
            }
        })
        .await
    }

    async fn add_capability(
        &self,
        app_id: DeviceAppId,
        capability_id: &str,
    ) -> Result<(), DeviceKitError> {
        self.apply(app_id, "add_capability", |d| {
            let capabilities = &mut d.record.descriptor.capabilities;
            if !capabilities.iter().any(|c| c == capability_id) {
                capabilities.push(capability_id.to_string());
            }
        })
        .await
    }

    async fn remove_capability(
        &self,
        app_id: DeviceAppId,
        capability_id: &str,
    ) -> Result<(), DeviceKitError> {
        self.apply(app_id, "remove_capability", |d| {
            d.record
                .descriptor
                .capabilities
                .retain(|c| c != capability_id);
            d.record.descriptor.capabilities_options.remove(capability_id);
            d.record.state.remove(capability_id);
        })
        .await
    }

    async fn set_capability_options(
        &self,
        app_id: DeviceAppId,
        capability_id: &str,
        options: &serde_json::Value,
    ) -> Result<(), DeviceKitError> {
        self.apply(app_id, "set_capability_options", |d| {
            if d.record.descriptor.has_capability(capability_id) {
                d.record
                    .descriptor
                    .capabilities_options
                    .insert(capability_id.to_string(), options.clone());
            }
        })
        .await
    }

    async fn set_name(&self, app_id: DeviceAppId, name: &str) -> Result<(), DeviceKitError> {
        self.apply(app_id, "set_name", |d| {
            d.record.descriptor.name = name.to_string();
        })
        .await
    }

    async fn set_settings(
        &self,
        app_id: DeviceAppId,
        settings: &Settings,
    ) -> Result<(), DeviceKitError> {
        self.apply(app_id, "set_settings", |d| {
            d.record.descriptor.settings = settings.clone();
        })
        .await
    }

    async fn set_store_value(
        &self,
        app_id: DeviceAppId,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), DeviceKitError> {
        self.apply(app_id, "set_store_value", |d| {
            d.record
                .descriptor
                .store
                .insert(key.to_string(), value.clone());
        })
        .await
    }

    async fn unset_store_value(&self, app_id: DeviceAppId, key: &str) -> Result<(), DeviceKitError> {
        self.apply(app_id, "unset_store_value", |d| {
            d.record.descriptor.store.remove(key);
        })
        .await
    }

    async fn set_class(&self, app_id: DeviceAppId, class: &str) -> Result<(), DeviceKitError> {
        self.apply(app_id, "set_class", |d| {
            d.record.descriptor.class = class.to_string();
        })
        .await
    }

    async fn set_energy(&self, app_id: DeviceAppId, energy: &Energy) -> Result<(), DeviceKitError> {
        self.apply(app_id, "set_energy", |d| {
            d.record.descriptor.energy = energy.clone();
        })
        .await
    }

    async fn set_availability(
        &self,
        app_id: DeviceAppId,
        availability: &Availability,
    ) -> Result<(), DeviceKitError> {
        self.apply(app_id, "set_availability", |d| {
            d.availability = availability.clone();
        })
        .await
    }

    async fn set_warning(
        &self,
        app_id: DeviceAppId,
        warning: Option<&str>,
    ) -> Result<(), DeviceKitError> {
        self.apply(app_id, "set_warning", |d| {
            d.warning = warning.map(str::to_string);
        })
        .await
    }

    async fn set_album_art(&self, app_id: DeviceAppId, image: &Image) -> Result<(), DeviceKitError> {
        self.apply(app_id, "set_album_art", |d| {
            d.album_art = Some(image.clone());
        })
        .await
    }

    async fn set_camera_image(
        &self,
        app_id: DeviceAppId,
        camera: &CameraImage,
    ) -> Result<(), DeviceKitError> {
        self.apply(app_id, "set_camera_image", |d| {
            d.camera_images.insert(camera.id.clone(), camera.clone());
        })
        .await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
