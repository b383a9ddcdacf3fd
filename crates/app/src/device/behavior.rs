//! Device hooks: the overridable half of the device contract.

use async_trait::async_trait;

use devicekit_domain::discovery::DiscoveryResult;
use devicekit_domain::error::HookError;
use devicekit_domain::settings::SettingsChange;

use crate::device::Device;
use crate::ports::Host;

/// Application-specific device behaviour.
///
/// Every hook has a default, so an implementation only overrides what it
/// needs. Lifecycle, settings and discovery hooks of one device run one at a
/// time; capability listeners are not part of that queue.
#[async_trait]
pub trait DeviceBehavior<H: Host>: Send + Sync + 'static {
    /// Runs once the device is loaded. Until it returns, [`Device::ready`]
    /// stays pending. An error marks the device unavailable with the
    /// error's message.
    async fn on_init(&self, _device: &Device<H>) -> Result<(), HookError> {
        Ok(())
    }

    /// Runs right after the user paired the device.
    async fn on_added(&self, _device: &Device<H>) {}

    /// Runs when the user deleted the device, before it is destroyed.
    async fn on_deleted(&self, _device: &Device<H>) {}

    async fn on_renamed(&self, _device: &Device<H>, _name: &str) {}

    /// Runs for settings changes made by the user, never for
    /// [`Device::set_settings`]. The returned message is shown to the user;
    /// an error rejects the change.
    async fn on_settings(
        &self,
        _device: &Device<H>,
        _change: &SettingsChange,
    ) -> Result<Option<String>, HookError> {
        Ok(None)
    }

    /// Whether `result` describes this device. Must not have side effects.
    fn on_discovery_result(&self, device: &Device<H>, result: &DiscoveryResult) -> bool {
        device.data().id() == Some(result.id.as_str())
    }

    /// First sighting of the device. An error marks it unavailable with the
    /// error's message.
    async fn on_discovery_available(
        &self,
        _device: &Device<H>,
        _result: &DiscoveryResult,
    ) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_discovery_address_changed(&self, _device: &Device<H>, _result: &DiscoveryResult) {}

    async fn on_discovery_last_seen_changed(
        &self,
        _device: &Device<H>,
        _result: &DiscoveryResult,
    ) {
    }
}

/// Behaviour with every hook left at its default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDevice;

impl<H: Host> DeviceBehavior<H> for DefaultDevice {}
