//! Driver hooks and the read-only probe used to pick a device class.

use std::collections::BTreeMap;

use async_trait::async_trait;

use devicekit_domain::device::DeviceDescriptor;
use devicekit_domain::device_data::{self, DeviceData};
use devicekit_domain::error::HookError;
use devicekit_domain::value::{SettingValue, Settings};

use crate::driver::Driver;
use crate::pairing::PairSession;
use crate::ports::Host;

/// Which pairing flow a driver wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairFlow {
    /// The driver installed its own handlers on the session.
    Custom,
    /// Use the list-then-add flow backed by
    /// [`DriverBehavior::on_pair_list_devices`].
    Default,
}

/// Application-specific driver behaviour. Every hook has a default.
#[async_trait]
pub trait DriverBehavior<H: Host>: Send + Sync + 'static {
    async fn on_init(&self, _driver: &Driver<H>) -> Result<(), HookError> {
        Ok(())
    }

    /// A pairing session started. Install handlers on `session` and return
    /// [`PairFlow::Custom`] to run a custom flow.
    async fn on_pair(
        &self,
        _driver: &Driver<H>,
        _session: &PairSession,
    ) -> Result<PairFlow, HookError> {
        Ok(PairFlow::Default)
    }

    /// Devices the user can pick from in the default pairing flow.
    async fn on_pair_list_devices(
        &self,
        _driver: &Driver<H>,
    ) -> Result<Vec<DeviceDescriptor>, HookError> {
        Ok(Vec::new())
    }

    /// Pick the device class tag for a device about to be built. `None`
    /// selects the registry's default class.
    ///
    /// The probe only lives for this call, so the decision is synchronous.
    fn on_map_device_class(&self, _probe: &DeviceProbe<'_>) -> Option<String> {
        None
    }

    /// Whether two pairing identities denote the same physical device.
    fn is_equal_device_data(&self, a: &DeviceData, b: &DeviceData) -> bool {
        device_data::is_equal_device_data(a, b)
    }
}

/// Behaviour with every hook left at its default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDriver;

impl<H: Host> DriverBehavior<H> for DefaultDriver {}

/// Read-only view of a device that is not built yet.
#[derive(Debug, Clone, Copy)]
pub struct DeviceProbe<'a> {
    driver_id: &'a str,
    descriptor: &'a DeviceDescriptor,
}

impl<'a> DeviceProbe<'a> {
    pub(crate) fn new(driver_id: &'a str, descriptor: &'a DeviceDescriptor) -> Self {
        Self {
            driver_id,
            descriptor,
        }
    }

    #[must_use]
    pub fn driver_id(&self) -> &'a str {
        self.driver_id
    }

    #[must_use]
    pub fn name(&self) -> &'a str {
        &self.descriptor.name
    }

    #[must_use]
    pub fn class(&self) -> &'a str {
        &self.descriptor.class
    }

    #[must_use]
    pub fn data(&self) -> &'a DeviceData {
        &self.descriptor.data
    }

    #[must_use]
    pub fn capabilities(&self) -> &'a [String] {
        &self.descriptor.capabilities
    }

    #[must_use]
    pub fn has_capability(&self, capability_id: &str) -> bool {
        self.descriptor.has_capability(capability_id)
    }

    #[must_use]
    pub fn settings(&self) -> &'a Settings {
        &self.descriptor.settings
    }

    #[must_use]
    pub fn setting(&self, key: &str) -> Option<&'a SettingValue> {
        self.descriptor.settings.get(key)
    }

    #[must_use]
    pub fn store(&self) -> &'a BTreeMap<String, serde_json::Value> {
        &self.descriptor.store
    }
}
