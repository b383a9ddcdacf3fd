//! Host port: the operations a device delegates to the host process.
//!
//! Every method resolves once the host has acknowledged (or refused) the
//! request. A refusal is a [`RejectedError`](devicekit_domain::error::RejectedError)
//! wrapped in [`DeviceKitError::Rejected`]; there is no retry at this layer.
//! Calls issued sequentially for the same device must be applied in order.

use std::future::Future;

use devicekit_domain::availability::Availability;
use devicekit_domain::device::DeviceRecord;
use devicekit_domain::error::DeviceKitError;
use devicekit_domain::id::DeviceAppId;
use devicekit_domain::image::{CameraImage, Image};
use devicekit_domain::value::{CapabilityValue, Energy, Settings};

/// The host process that owns persistence and the physical side of devices.
pub trait Host: Send + Sync + 'static {
    /// Persist a newly paired device.
    fn register_device(
        &self,
        record: &DeviceRecord,
    ) -> impl Future<Output = Result<(), DeviceKitError>> + Send;

    /// Forget a deleted device.
    fn unregister_device(
        &self,
        app_id: DeviceAppId,
    ) -> impl Future<Output = Result<(), DeviceKitError>> + Send;

    /// Apply a capability value. Acceptance does not mean the physical
    /// device changed state.
    fn set_capability_value(
        &self,
        app_id: DeviceAppId,
        capability_id: &str,
        value: &CapabilityValue,
    ) -> impl Future<Output = Result<(), DeviceKitError>> + Send;

    fn add_capability(
        &self,
        app_id: DeviceAppId,
        capability_id: &str,
    ) -> impl Future<Output = Result<(), DeviceKitError>> + Send;

    fn remove_capability(
        &self,
        app_id: DeviceAppId,
        capability_id: &str,
    ) -> impl Future<Output = Result<(), DeviceKitError>> + Send;

    fn set_capability_options(
        &self,
        app_id: DeviceAppId,
        capability_id: &str,
        options: &serde_json::Value,
    ) -> impl Future<Output = Result<(), DeviceKitError>> + Send;

    /// Persist the name the user gave the device.
    fn set_name(
        &self,
        app_id: DeviceAppId,
        name: &str,
    ) -> impl Future<Output = Result<(), DeviceKitError>> + Send;

    /// Persist the complete (already merged) settings of a device.
    fn set_settings(
        &self,
        app_id: DeviceAppId,
        settings: &Settings,
    ) -> impl Future<Output = Result<(), DeviceKitError>> + Send;

    fn set_store_value(
        &self,
        app_id: DeviceAppId,
        key: &str,
        value: &serde_json::Value,
    ) -> impl Future<Output = Result<(), DeviceKitError>> + Send;

    fn unset_store_value(
        &self,
        app_id: DeviceAppId,
        key: &str,
    ) -> impl Future<Output = Result<(), DeviceKitError>> + Send;

    fn set_class(
        &self,
        app_id: DeviceAppId,
        class: &str,
    ) -> impl Future<Output = Result<(), DeviceKitError>> + Send;

    fn set_energy(
        &self,
        app_id: DeviceAppId,
        energy: &Energy,
    ) -> impl Future<Output = Result<(), DeviceKitError>> + Send;

    fn set_availability(
        &self,
        app_id: DeviceAppId,
        availability: &Availability,
    ) -> impl Future<Output = Result<(), DeviceKitError>> + Send;

    /// Show (`Some`) or clear (`None`) a warning next to the device.
    fn set_warning(
        &self,
        app_id: DeviceAppId,
        warning: Option<&str>,
    ) -> impl Future<Output = Result<(), DeviceKitError>> + Send;

    fn set_album_art(
        &self,
        app_id: DeviceAppId,
        image: &Image,
    ) -> impl Future<Output = Result<(), DeviceKitError>> + Send;

    fn set_camera_image(
        &self,
        app_id: DeviceAppId,
        camera: &CameraImage,
    ) -> impl Future<Output = Result<(), DeviceKitError>> + Send;
}
