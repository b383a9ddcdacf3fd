//! Device runtime: the in-process façade for one paired device.
//!
//! A [`Device`] keeps a local mirror of what the host persisted (capability
//! values, settings, store, availability, …). Every write goes to the
//! [`Host`] first and only lands in the mirror once the host acknowledged it,
//! so reads never disagree with the host about accepted values.

pub mod behavior;
mod listeners;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;

use devicekit_domain::availability::Availability;
use devicekit_domain::device::{DeviceDescriptor, DeviceRecord};
use devicekit_domain::device_data::DeviceData;
use devicekit_domain::discovery::{DiscoveryChange, DiscoveryResult};
use devicekit_domain::error::{DeviceKitError, HookError, NotFoundError, ValidationError};
use devicekit_domain::id::DeviceAppId;
use devicekit_domain::image::{CameraImage, Image};
use devicekit_domain::settings::SettingsChange;
use devicekit_domain::value::{CapabilityValue, Energy, SettingValue, Settings, Store};

use crate::emitter::EventEmitter;
use crate::ports::Host;

pub use behavior::{DefaultDevice, DeviceBehavior};
pub use listeners::{CapabilityListener, CapabilityValues, MultipleCapabilityListener};

use listeners::{DebouncedGroup, ListenerTable, Outcome, Registration};

/// Local copy of everything the host acknowledged for a device.
#[derive(Debug, Clone)]
struct Mirror {
    name: String,
    class: String,
    capabilities: Vec<String>,
    capabilities_options: BTreeMap<String, serde_json::Value>,
    state: BTreeMap<String, CapabilityValue>,
    settings: Settings,
    store: Store,
    energy: Energy,
    availability: Availability,
    warning: Option<String>,
    album_art: Option<Image>,
    camera_images: BTreeMap<String, CameraImage>,
    last_discovery: Option<DiscoveryResult>,
}

struct DeviceInner<H> {
    app_id: DeviceAppId,
    driver_id: String,
    data: DeviceData,
    host: Arc<H>,
    behavior: Arc<dyn DeviceBehavior<H>>,
    emitter: EventEmitter,
    mirror: Mutex<Mirror>,
    listeners: ListenerTable,
    hooks: tokio::sync::Mutex<()>,
    ready: watch::Sender<bool>,
    destroyed: AtomicBool,
}

/// Handle to one paired device. Cloning is cheap and every clone refers to
/// the same device.
pub struct Device<H: Host> {
    inner: Arc<DeviceInner<H>>,
}

impl<H: Host> Clone for Device<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: Host> fmt::Debug for Device<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("app_id", &self.inner.app_id)
            .field("driver_id", &self.inner.driver_id)
            .field("name", &self.mirror().name)
            .finish_non_exhaustive()
    }
}

impl<H: Host> Device<H> {
    /// Build the runtime side of a persisted device. Capability values for
    /// ids outside the capability set are dropped.
    pub(crate) fn new(
        record: DeviceRecord,
        host: Arc<H>,
        behavior: Arc<dyn DeviceBehavior<H>>,
    ) -> Self {
        let DeviceRecord {
            app_id,
            driver_id,
            descriptor,
            state,
        } = record;
        let state = state
            .into_iter()
            .filter(|(id, _)| descriptor.has_capability(id))
            .collect();
        let (ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(DeviceInner {
                app_id,
                driver_id,
                emitter: EventEmitter::new(format!("device:{}", descriptor.name)),
                data: descriptor.data,
                host,
                behavior,
                mirror: Mutex::new(Mirror {
                    name: descriptor.name,
                    class: descriptor.class,
                    capabilities: descriptor.capabilities,
                    capabilities_options: descriptor.capabilities_options,
                    state,
                    settings: descriptor.settings,
                    store: descriptor.store,
                    energy: descriptor.energy,
                    availability: Availability::Available,
                    warning: None,
                    album_art: None,
                    camera_images: BTreeMap::new(),
                    last_discovery: None,
                }),
                listeners: ListenerTable::default(),
                hooks: tokio::sync::Mutex::new(()),
                ready,
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn app_id(&self) -> DeviceAppId {
        self.inner.app_id
    }

    /// Id of the driver owning this device.
    #[must_use]
    pub fn driver_id(&self) -> &str {
        &self.inner.driver_id
    }

    /// The pairing identity. Never changes.
    #[must_use]
    pub fn data(&self) -> &DeviceData {
        &self.inner.data
    }

    #[must_use]
    pub fn emitter(&self) -> &EventEmitter {
        &self.inner.emitter
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.mirror().name.clone()
    }

    #[must_use]
    pub fn class(&self) -> String {
        self.mirror().class.clone()
    }

    /// Whether [`destroy`](Self::destroy) was called.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Snapshot of the device in the shape the host persists.
    #[must_use]
    pub fn record(&self) -> DeviceRecord {
        let mirror = self.mirror();
        DeviceRecord {
            app_id: self.inner.app_id,
            driver_id: self.inner.driver_id.clone(),
            descriptor: DeviceDescriptor {
                name: mirror.name.clone(),
                data: self.inner.data.clone(),
                class: mirror.class.clone(),
                capabilities: mirror.capabilities.clone(),
                capabilities_options: mirror.capabilities_options.clone(),
                settings: mirror.settings.clone(),
                store: mirror.store.clone(),
                energy: mirror.energy.clone(),
            },
            state: mirror.state.clone(),
        }
    }

    /// Wait until `on_init` has completed. Returns immediately afterwards.
    pub async fn ready(&self) {
        let mut ready = self.inner.ready.subscribe();
        // The sender lives in `self.inner`, so the channel cannot close here.
        let _ = ready.wait_for(|ready| *ready).await;
    }

    /// Current capability values.
    #[must_use]
    pub fn state(&self) -> BTreeMap<String, CapabilityValue> {
        self.mirror().state.clone()
    }

    #[must_use]
    pub fn capabilities(&self) -> Vec<String> {
        self.mirror().capabilities.clone()
    }

    #[must_use]
    pub fn has_capability(&self, capability_id: &str) -> bool {
        self.mirror().capabilities.iter().any(|c| c == capability_id)
    }

    /// Last accepted value, or `None` if the capability never got one.
    #[must_use]
    pub fn capability_value(&self, capability_id: &str) -> Option<CapabilityValue> {
        self.mirror().state.get(capability_id).cloned()
    }

    /// Options of a capability; an empty object when none were set and
    /// `None` when the device lacks the capability.
    #[must_use]
    pub fn capability_options(&self, capability_id: &str) -> Option<serde_json::Value> {
        let mirror = self.mirror();
        if !mirror.capabilities.iter().any(|c| c == capability_id) {
            return None;
        }
        Some(
            mirror
                .capabilities_options
                .get(capability_id)
                .cloned()
                .unwrap_or_else(|| serde_json::json!({})),
        )
    }

    /// Add a capability. Adding one the device already has does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceKitError::Rejected`] when the host refuses the change.
    #[tracing::instrument(skip(self), fields(device = %self.inner.app_id))]
    pub async fn add_capability(&self, capability_id: &str) -> Result<(), DeviceKitError> {
        self.ensure_alive()?;
        if capability_id.is_empty() {
            return Err(ValidationError::EmptyCapabilityId.into());
        }
        if self.has_capability(capability_id) {
            return Ok(());
        }
        self.inner
            .host
            .add_capability(self.inner.app_id, capability_id)
            .await?;
        let mut mirror = self.mirror();
        if !mirror.capabilities.iter().any(|c| c == capability_id) {
            mirror.capabilities.push(capability_id.to_string());
        }
        Ok(())
    }

    /// Remove a capability together with its value, options and listener.
    /// Removing one the device does not have does nothing.
    ///
    /// Automations referencing the capability stop working.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceKitError::Rejected`] when the host refuses the change.
    #[tracing::instrument(skip(self), fields(device = %self.inner.app_id))]
    pub async fn remove_capability(&self, capability_id: &str) -> Result<(), DeviceKitError> {
        self.ensure_alive()?;
        if !self.has_capability(capability_id) {
            return Ok(());
        }
        self.inner
            .host
            .remove_capability(self.inner.app_id, capability_id)
            .await?;
        {
            let mut mirror = self.mirror();
            mirror.capabilities.retain(|c| c != capability_id);
            mirror.capabilities_options.remove(capability_id);
            mirror.state.remove(capability_id);
        }
        self.inner.listeners.remove(capability_id);
        tracing::warn!(
            capability = capability_id,
            "capability removed, automations using it are broken"
        );
        Ok(())
    }

    /// Ask the host to apply a value and mirror it once acknowledged.
    ///
    /// Acceptance does not mean the physical device changed state.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownCapability`] when the device lacks
    /// the capability (also when it was removed before the host answered),
    /// or [`DeviceKitError::Rejected`] when the host refuses.
    #[tracing::instrument(skip(self, value), fields(device = %self.inner.app_id))]
    pub async fn set_capability_value(
        &self,
        capability_id: &str,
        value: CapabilityValue,
    ) -> Result<(), DeviceKitError> {
        self.ensure_alive()?;
        self.ensure_capability(capability_id)?;
        self.inner
            .host
            .set_capability_value(self.inner.app_id, capability_id, &value)
            .await?;
        {
            // The capability may have been removed while the host was busy.
            let mut mirror = self.mirror();
            if !mirror.capabilities.iter().any(|c| c == capability_id) {
                return Err(ValidationError::UnknownCapability(capability_id.to_string()).into());
            }
            mirror.state.insert(capability_id.to_string(), value.clone());
        }
        self.notify(
            "capability",
            &serde_json::json!({ "capability": capability_id, "value": value }),
        );
        Ok(())
    }

    /// Replace the options of a capability.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownCapability`] when the device lacks
    /// the capability, or [`DeviceKitError::Rejected`] when the host refuses.
    #[tracing::instrument(skip(self, options), fields(device = %self.inner.app_id))]
    pub async fn set_capability_options(
        &self,
        capability_id: &str,
        options: serde_json::Value,
    ) -> Result<(), DeviceKitError> {
        self.ensure_alive()?;
        self.ensure_capability(capability_id)?;
        self.inner
            .host
            .set_capability_options(self.inner.app_id, capability_id, &options)
            .await?;
        let mut mirror = self.mirror();
        if !mirror.capabilities.iter().any(|c| c == capability_id) {
            return Err(ValidationError::UnknownCapability(capability_id.to_string()).into());
        }
        mirror
            .capabilities_options
            .insert(capability_id.to_string(), options);
        Ok(())
    }

    /// Handle change requests for one capability.
    ///
    /// The listener receives `(value, options)`. Returning `Ok` accepts the
    /// change: the value is applied through the host and the listener's
    /// result is handed to the requester. Returning `Err` rejects it.
    ///
    /// # Errors
    ///
    /// Fails when the device lacks the capability or a listener is already
    /// registered for it.
    pub fn register_capability_listener<F, Fut>(
        &self,
        capability_id: impl Into<String>,
        listener: F,
    ) -> Result<(), DeviceKitError>
    where
        F: Fn(CapabilityValue, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, HookError>> + Send + 'static,
    {
        self.ensure_alive()?;
        let capability_id = capability_id.into();
        self.ensure_capability(&capability_id)?;
        let listener: CapabilityListener =
            Arc::new(move |value: CapabilityValue, options: serde_json::Value| {
                listener(value, options).boxed()
            });
        self.inner
            .listeners
            .insert_single(capability_id, listener)?;
        Ok(())
    }

    /// Handle change requests for several capabilities at once.
    ///
    /// Requests are collected until `debounce` passes without a new one;
    /// the listener then runs once with every requested value and option,
    /// keyed by capability id. On success the values are applied through
    /// the host. Every requester of the batch gets the same outcome.
    ///
    /// # Errors
    ///
    /// Fails when `capability_ids` is empty, names a capability the device
    /// lacks, or one of them already has a listener. Nothing is registered
    /// in that case.
    pub fn register_multiple_capability_listener<I, S, F, Fut>(
        &self,
        capability_ids: I,
        debounce: Duration,
        listener: F,
    ) -> Result<(), DeviceKitError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(CapabilityValues, CapabilityValues) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.ensure_alive()?;
        let capability_ids: Vec<String> = capability_ids.into_iter().map(Into::into).collect();
        if capability_ids.is_empty() {
            return Err(ValidationError::NoCapabilities.into());
        }
        for id in &capability_ids {
            self.ensure_capability(id)?;
        }
        let listener: MultipleCapabilityListener =
            Arc::new(move |values: CapabilityValues, options: CapabilityValues| {
                listener(values, options).boxed()
            });
        let group = Arc::new(DebouncedGroup::new(listener, debounce));
        self.inner
            .listeners
            .insert_multiple(&capability_ids, &group)?;
        Ok(())
    }

    /// Run the listener of a capability as if the host had requested the
    /// change.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] (`CapabilityListener`) when no listener is
    /// registered, the listener's [`HookError`], or the host's rejection of
    /// the accepted value.
    pub async fn trigger_capability_listener(
        &self,
        capability_id: &str,
        value: CapabilityValue,
        options: serde_json::Value,
    ) -> Result<serde_json::Value, DeviceKitError> {
        self.dispatch_capability_request(capability_id, value, options)
            .await
    }

    /// Entry point for a change request coming from the host (user or
    /// automation).
    ///
    /// # Errors
    ///
    /// Same as [`trigger_capability_listener`](Self::trigger_capability_listener).
    #[tracing::instrument(skip(self, value, options), fields(device = %self.inner.app_id))]
    pub async fn handle_capability_request(
        &self,
        capability_id: &str,
        value: CapabilityValue,
        options: serde_json::Value,
    ) -> Result<serde_json::Value, DeviceKitError> {
        tracing::debug!("capability change requested by host");
        self.dispatch_capability_request(capability_id, value, options)
            .await
    }

    async fn dispatch_capability_request(
        &self,
        capability_id: &str,
        value: CapabilityValue,
        options: serde_json::Value,
    ) -> Result<serde_json::Value, DeviceKitError> {
        self.ensure_alive()?;
        let registration =
            self.inner
                .listeners
                .get(capability_id)
                .ok_or_else(|| NotFoundError {
                    entity: "CapabilityListener",
                    id: capability_id.to_string(),
                })?;

        match registration {
            Registration::Single(listener) => {
                let result = listener(value.clone(), options).await?;
                self.set_capability_value(capability_id, value).await?;
                Ok(result)
            }
            Registration::Multiple(group) => {
                let (outcome, generation) = group.enqueue(capability_id, value, options);
                self.schedule_flush(&group, generation);
                // A dropped sender means the batch was cancelled by destroy.
                outcome.await.unwrap_or(Err(DeviceKitError::Destroyed))
            }
        }
    }

    fn schedule_flush(&self, group: &Arc<DebouncedGroup>, generation: u64) {
        let device = self.clone();
        let timer_group = Arc::clone(group);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timer_group.debounce()).await;
            if let Some(mut batch) = timer_group.take_if_current(generation) {
                let values = std::mem::take(&mut batch.values);
                let options = std::mem::take(&mut batch.options);
                tracing::debug!(
                    device = %device.inner.app_id,
                    capabilities = values.len(),
                    "flushing debounced capability batch"
                );
                let outcome = device
                    .run_batch(timer_group.listener(), values, options)
                    .await;
                batch.resolve(&outcome);
            }
        });
        group.track_timer(handle);
    }

    async fn run_batch(
        &self,
        listener: MultipleCapabilityListener,
        values: CapabilityValues,
        options: CapabilityValues,
    ) -> Outcome {
        listener(values.clone(), options).await?;
        for (capability_id, value) in values {
            self.set_capability_value(&capability_id, value).await?;
        }
        Ok(serde_json::Value::Null)
    }

    #[must_use]
    pub fn settings(&self) -> Settings {
        self.mirror().settings.clone()
    }

    /// A single setting, or `None` when absent.
    #[must_use]
    pub fn setting(&self, key: &str) -> Option<SettingValue> {
        self.mirror().settings.get(key).cloned()
    }

    /// Merge `partial` into the persisted settings.
    ///
    /// Programmatic changes never reach [`DeviceBehavior::on_settings`].
    ///
    /// # Errors
    ///
    /// Returns [`DeviceKitError::Rejected`] when the host refuses the change.
    #[tracing::instrument(skip(self, partial), fields(device = %self.inner.app_id))]
    pub async fn set_settings(&self, partial: Settings) -> Result<(), DeviceKitError> {
        self.ensure_alive()?;
        let mut merged = self.settings();
        merged.extend(partial.clone());
        self.inner
            .host
            .set_settings(self.inner.app_id, &merged)
            .await?;
        self.mirror().settings.extend(partial);
        Ok(())
    }

    /// Entry point for a settings change made by the user.
    ///
    /// Runs [`DeviceBehavior::on_settings`] with the computed change and
    /// persists the new settings through the host only if the hook accepts
    /// them. Returns the hook's message for the user.
    ///
    /// # Errors
    ///
    /// Returns the hook's [`HookError`] or the host's rejection; the
    /// settings are unchanged then.
    #[tracing::instrument(skip(self, partial), fields(device = %self.inner.app_id))]
    pub async fn handle_settings_change(
        &self,
        partial: Settings,
    ) -> Result<Option<String>, DeviceKitError> {
        self.ensure_alive()?;
        let _turn = self.inner.hooks.lock().await;
        let change = SettingsChange::compute(&self.settings(), &partial);
        if change.is_empty() {
            return Ok(None);
        }

        let message = self.inner.behavior.on_settings(self, &change).await?;
        self.inner
            .host
            .set_settings(self.inner.app_id, &change.new_settings)
            .await?;
        self.mirror().settings.clone_from(&change.new_settings);
        self.notify(
            "settings",
            &serde_json::json!({ "changed_keys": change.changed_keys }),
        );
        Ok(message)
    }

    #[must_use]
    pub fn store(&self) -> Store {
        self.mirror().store.clone()
    }

    #[must_use]
    pub fn store_keys(&self) -> Vec<String> {
        self.mirror().store.keys().cloned().collect()
    }

    /// A single store entry, or `None` when absent.
    #[must_use]
    pub fn store_value(&self, key: &str) -> Option<serde_json::Value> {
        self.mirror().store.get(key).cloned()
    }

    /// Persist a store entry.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceKitError::Rejected`] when the host refuses the write.
    #[tracing::instrument(skip(self, value), fields(device = %self.inner.app_id))]
    pub async fn set_store_value(
        &self,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), DeviceKitError> {
        self.ensure_alive()?;
        self.inner
            .host
            .set_store_value(self.inner.app_id, key, &value)
            .await?;
        self.mirror().store.insert(key.to_string(), value);
        Ok(())
    }

    /// Remove a store entry. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceKitError::Rejected`] when the host refuses the write.
    #[tracing::instrument(skip(self), fields(device = %self.inner.app_id))]
    pub async fn unset_store_value(&self, key: &str) -> Result<(), DeviceKitError> {
        self.ensure_alive()?;
        self.inner
            .host
            .unset_store_value(self.inner.app_id, key)
            .await?;
        self.mirror().store.remove(key);
        Ok(())
    }

    #[must_use]
    pub fn available(&self) -> bool {
        self.mirror().availability.is_available()
    }

    #[must_use]
    pub fn availability(&self) -> Availability {
        self.mirror().availability.clone()
    }

    /// # Errors
    ///
    /// Returns [`DeviceKitError::Rejected`] when the host refuses the change.
    pub async fn set_available(&self) -> Result<(), DeviceKitError> {
        self.apply_availability(Availability::Available).await?;
        self.notify("available", &serde_json::Value::Null);
        Ok(())
    }

    /// Mark the device unavailable. `message` replaces any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceKitError::Rejected`] when the host refuses the change.
    pub async fn set_unavailable(&self, message: Option<String>) -> Result<(), DeviceKitError> {
        let payload = serde_json::json!({ "message": message });
        self.apply_availability(Availability::unavailable(message))
            .await?;
        self.notify("unavailable", &payload);
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(device = %self.inner.app_id))]
    async fn apply_availability(&self, availability: Availability) -> Result<(), DeviceKitError> {
        self.ensure_alive()?;
        self.inner
            .host
            .set_availability(self.inner.app_id, &availability)
            .await?;
        self.mirror().availability = availability;
        Ok(())
    }

    #[must_use]
    pub fn warning(&self) -> Option<String> {
        self.mirror().warning.clone()
    }

    /// Show a warning next to the device, or clear it with `None`.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceKitError::Rejected`] when the host refuses the change.
    #[tracing::instrument(skip(self), fields(device = %self.inner.app_id))]
    pub async fn set_warning(&self, message: Option<String>) -> Result<(), DeviceKitError> {
        self.ensure_alive()?;
        self.inner
            .host
            .set_warning(self.inner.app_id, message.as_deref())
            .await?;
        self.mirror().warning = message;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`DeviceKitError::Rejected`] when the host refuses the change.
    pub async fn unset_warning(&self) -> Result<(), DeviceKitError> {
        self.set_warning(None).await
    }

    /// Change the device class. Automations keyed on the old class stop
    /// working.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyClass`] for an empty class or
    /// [`DeviceKitError::Rejected`] when the host refuses the change.
    #[tracing::instrument(skip(self), fields(device = %self.inner.app_id))]
    pub async fn set_class(&self, class: &str) -> Result<(), DeviceKitError> {
        self.ensure_alive()?;
        if class.is_empty() {
            return Err(ValidationError::EmptyClass.into());
        }
        self.inner.host.set_class(self.inner.app_id, class).await?;
        let previous = std::mem::replace(&mut self.mirror().class, class.to_string());
        if previous != class {
            tracing::warn!(%previous, "device class changed, automations using it are broken");
        }
        Ok(())
    }

    #[must_use]
    pub fn energy(&self) -> Energy {
        self.mirror().energy.clone()
    }

    /// # Errors
    ///
    /// Returns [`DeviceKitError::Rejected`] when the host refuses the change.
    #[tracing::instrument(skip(self, energy), fields(device = %self.inner.app_id))]
    pub async fn set_energy(&self, energy: Energy) -> Result<(), DeviceKitError> {
        self.ensure_alive()?;
        self.inner
            .host
            .set_energy(self.inner.app_id, &energy)
            .await?;
        self.mirror().energy = energy;
        Ok(())
    }

    #[must_use]
    pub fn album_art(&self) -> Option<Image> {
        self.mirror().album_art.clone()
    }

    /// # Errors
    ///
    /// Returns [`DeviceKitError::Rejected`] when the host refuses the image.
    #[tracing::instrument(skip(self, image), fields(device = %self.inner.app_id, image = %image.id))]
    pub async fn set_album_art_image(&self, image: Image) -> Result<(), DeviceKitError> {
        self.ensure_alive()?;
        self.inner
            .host
            .set_album_art(self.inner.app_id, &image)
            .await?;
        self.mirror().album_art = Some(image);
        Ok(())
    }

    #[must_use]
    pub fn camera_image(&self, id: &str) -> Option<CameraImage> {
        self.mirror().camera_images.get(id).cloned()
    }

    /// Attach an image to the camera slot `id`, replacing what it held.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceKitError::Rejected`] when the host refuses the image.
    #[tracing::instrument(skip(self, title, image), fields(device = %self.inner.app_id))]
    pub async fn set_camera_image(
        &self,
        id: &str,
        title: impl Into<String>,
        image: Image,
    ) -> Result<(), DeviceKitError> {
        self.ensure_alive()?;
        let camera = CameraImage {
            id: id.to_string(),
            title: title.into(),
            image,
        };
        self.inner
            .host
            .set_camera_image(self.inner.app_id, &camera)
            .await?;
        self.mirror().camera_images.insert(camera.id.clone(), camera);
        Ok(())
    }

    /// Tear the device down: drop every capability listener, cancel pending
    /// debounced batches and emit `destroy`.
    ///
    /// Terminal. Afterwards host-bound operations fail with
    /// [`DeviceKitError::Destroyed`]; what accessors return is unspecified.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.listeners.clear();
        self.notify("destroy", &serde_json::Value::Null);
        self.inner.emitter.remove_all_listeners(None);
        self.inner.ready.send_replace(true);
        tracing::debug!(device = %self.inner.app_id, "device destroyed");
    }

    /// Run `on_init` and release [`ready`](Self::ready) waiters. A failing
    /// hook leaves the device unavailable with the hook's message.
    pub(crate) async fn init(&self) {
        {
            let _turn = self.inner.hooks.lock().await;
            if let Err(err) = self.inner.behavior.on_init(self).await {
                tracing::warn!(device = %self.inner.app_id, %err, "device init failed");
                self.mark_unavailable(err.message).await;
            }
        }
        self.inner.ready.send_replace(true);
    }

    pub(crate) async fn handle_added(&self) {
        let _turn = self.inner.hooks.lock().await;
        self.inner.behavior.on_added(self).await;
    }

    pub(crate) async fn handle_deleted(&self) {
        let _turn = self.inner.hooks.lock().await;
        self.inner.behavior.on_deleted(self).await;
    }

    /// Entry point for a rename made by the user. The hook runs once the
    /// host persisted the new name.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceKitError::Rejected`] when the host refuses the name.
    #[tracing::instrument(skip(self), fields(device = %self.inner.app_id))]
    pub async fn handle_renamed(&self, name: &str) -> Result<(), DeviceKitError> {
        self.ensure_alive()?;
        let _turn = self.inner.hooks.lock().await;
        self.inner.host.set_name(self.inner.app_id, name).await?;
        self.mirror().name = name.to_string();
        self.inner.behavior.on_renamed(self, name).await;
        Ok(())
    }

    /// Whether a discovery result belongs to this device.
    pub(crate) fn matches_discovery(&self, result: &DiscoveryResult) -> bool {
        !self.is_destroyed() && self.inner.behavior.on_discovery_result(self, result)
    }

    /// Run the discovery hook matching what changed since the last sighting.
    pub(crate) async fn handle_discovery_result(&self, result: &DiscoveryResult) {
        let _turn = self.inner.hooks.lock().await;
        let previous = self.mirror().last_discovery.replace(result.clone());
        let behavior = &self.inner.behavior;
        match DiscoveryChange::classify(previous.as_ref(), result) {
            DiscoveryChange::FirstSeen => {
                if let Err(err) = behavior.on_discovery_available(self, result).await {
                    tracing::warn!(device = %self.inner.app_id, %err, "discovered device not usable");
                    // Retry the first-contact hook on the next sighting.
                    self.mirror().last_discovery = None;
                    self.mark_unavailable(err.message).await;
                }
            }
            DiscoveryChange::AddressChanged => {
                behavior.on_discovery_address_changed(self, result).await;
            }
            DiscoveryChange::LastSeenChanged => {
                behavior.on_discovery_last_seen_changed(self, result).await;
            }
            DiscoveryChange::Unchanged => {}
        }
    }

    async fn mark_unavailable(&self, message: String) {
        if let Err(err) = self.set_unavailable(Some(message)).await {
            tracing::warn!(device = %self.inner.app_id, %err, "failed to mark device unavailable");
        }
    }

    fn ensure_alive(&self) -> Result<(), DeviceKitError> {
        if self.is_destroyed() {
            return Err(DeviceKitError::Destroyed);
        }
        Ok(())
    }

    fn ensure_capability(&self, capability_id: &str) -> Result<(), ValidationError> {
        if self.has_capability(capability_id) {
            Ok(())
        } else {
            Err(ValidationError::UnknownCapability(capability_id.to_string()))
        }
    }

    fn notify(&self, event: &str, payload: &serde_json::Value) {
        if let Err(err) = self.inner.emitter.emit(event, payload) {
            tracing::warn!(device = %self.inner.app_id, event, %err, "event listener failed");
        }
    }

    fn mirror(&self) -> MutexGuard<'_, Mirror> {
        self.inner
            .mirror
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InMemoryHost;
    use async_trait::async_trait;
    use serde_json::{Value, json};

    async fn paired_with(
        capabilities: &[&str],
        behavior: Arc<dyn DeviceBehavior<InMemoryHost>>,
    ) -> (Arc<InMemoryHost>, Device<InMemoryHost>) {
        paired_on(Arc::new(InMemoryHost::new()), capabilities, behavior).await
    }

    async fn paired_on(
        host: Arc<InMemoryHost>,
        capabilities: &[&str],
        behavior: Arc<dyn DeviceBehavior<InMemoryHost>>,
    ) -> (Arc<InMemoryHost>, Device<InMemoryHost>) {
        let record = DeviceRecord {
            app_id: DeviceAppId::new(),
            driver_id: "light".to_string(),
            descriptor: DeviceDescriptor::builder()
                .name("Lamp")
                .data(DeviceData::with_id("lamp-1"))
                .class("light")
                .capabilities(capabilities.iter().copied())
                .setting("transition", 300_i64)
                .build()
                .unwrap(),
            state: BTreeMap::new(),
        };
        host.register_device(&record).await.unwrap();
        let device = Device::new(record, Arc::clone(&host), behavior);
        device.init().await;
        (host, device)
    }

    async fn paired(capabilities: &[&str]) -> (Arc<InMemoryHost>, Device<InMemoryHost>) {
        paired_with(capabilities, Arc::new(DefaultDevice)).await
    }

    #[derive(Default)]
    struct Spy {
        settings_changes: Mutex<Vec<SettingsChange>>,
        reject_settings: bool,
        fail_init: bool,
        fail_discovery: bool,
        discovery_calls: Mutex<Vec<&'static str>>,
        renames: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DeviceBehavior<InMemoryHost> for Spy {
        async fn on_init(&self, _device: &Device<InMemoryHost>) -> Result<(), HookError> {
            if self.fail_init {
                return Err(HookError::new("bridge offline"));
            }
            Ok(())
        }

        async fn on_renamed(&self, _device: &Device<InMemoryHost>, name: &str) {
            self.renames.lock().unwrap().push(name.to_string());
        }

        async fn on_settings(
            &self,
            _device: &Device<InMemoryHost>,
            change: &SettingsChange,
        ) -> Result<Option<String>, HookError> {
            self.settings_changes.lock().unwrap().push(change.clone());
            if self.reject_settings {
                return Err(HookError::new("transition too long"));
            }
            Ok(Some("Settings saved".to_string()))
        }

        async fn on_discovery_available(
            &self,
            _device: &Device<InMemoryHost>,
            _result: &DiscoveryResult,
        ) -> Result<(), HookError> {
            self.discovery_calls.lock().unwrap().push("available");
            if self.fail_discovery {
                return Err(HookError::new("unsupported firmware"));
            }
            Ok(())
        }

        async fn on_discovery_address_changed(
            &self,
            _device: &Device<InMemoryHost>,
            _result: &DiscoveryResult,
        ) {
            self.discovery_calls.lock().unwrap().push("address");
        }

        async fn on_discovery_last_seen_changed(
            &self,
            _device: &Device<InMemoryHost>,
            _result: &DiscoveryResult,
        ) {
            self.discovery_calls.lock().unwrap().push("last_seen");
        }
    }

    fn sighting(address: &str, secs: i64) -> DiscoveryResult {
        use chrono::TimeZone;
        DiscoveryResult {
            id: "lamp-1".to_string(),
            address: address.to_string(),
            last_seen: chrono::Utc.timestamp_opt(secs, 0).unwrap(),
            payload: devicekit_domain::discovery::DiscoveryPayload::Mac {
                mac: "aa:bb:cc:dd:ee:ff".to_string(),
            },
        }
    }

    fn settings(pairs: &[(&str, SettingValue)]) -> Settings {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn should_list_capability_when_added_and_not_when_removed() {
        let (host, device) = paired(&["onoff"]).await;

        device.add_capability("dim").await.unwrap();
        assert!(device.has_capability("dim"));
        assert!(device.capabilities().contains(&"dim".to_string()));

        device.remove_capability("dim").await.unwrap();
        assert!(!device.has_capability("dim"));
        assert_eq!(device.capabilities(), vec!["onoff"]);
        assert!(
            !host
                .record(device.app_id())
                .unwrap()
                .descriptor
                .has_capability("dim")
        );
    }

    #[tokio::test]
    async fn should_skip_host_when_capability_already_present() {
        let (host, device) = paired(&["onoff"]).await;
        device.add_capability("onoff").await.unwrap();
        device.remove_capability("dim").await.unwrap();
        assert_eq!(host.calls_for(device.app_id()), vec!["register_device"]);
    }

    #[tokio::test]
    async fn should_return_none_when_capability_has_no_value() {
        let (_host, device) = paired(&["onoff", "dim"]).await;
        assert_eq!(device.capability_value("dim"), None);
        assert_eq!(device.capability_value("unknown"), None);
    }

    #[tokio::test]
    async fn should_echo_last_accepted_value() {
        let (_host, device) = paired(&["dim"]).await;
        device.set_capability_value("dim", json!(0.3)).await.unwrap();
        device.set_capability_value("dim", json!(0.8)).await.unwrap();
        assert_eq!(device.capability_value("dim"), Some(json!(0.8)));
    }

    #[tokio::test]
    async fn should_fail_fast_when_setting_unknown_capability() {
        let (host, device) = paired(&["onoff"]).await;
        let err = device
            .set_capability_value("dim", json!(0.5))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DeviceKitError::Validation(ValidationError::UnknownCapability("dim".to_string()))
        );
        assert_eq!(host.calls_for(device.app_id()), vec!["register_device"]);
    }

    #[tokio::test]
    async fn should_keep_mirror_when_host_rejects_value() {
        let (host, device) = paired(&["onoff"]).await;
        device.set_capability_value("onoff", json!(false)).await.unwrap();
        host.set_reachable(device.app_id(), false);

        let err = device
            .set_capability_value("onoff", json!(true))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceKitError::Rejected(_)));
        assert_eq!(device.capability_value("onoff"), Some(json!(false)));
    }

    #[tokio::test]
    async fn should_drop_state_when_restored_with_unknown_capability_value() {
        let host = Arc::new(InMemoryHost::new());
        let record = DeviceRecord {
            app_id: DeviceAppId::new(),
            driver_id: "light".to_string(),
            descriptor: DeviceDescriptor::builder()
                .name("Lamp")
                .class("light")
                .capability("onoff")
                .build()
                .unwrap(),
            state: BTreeMap::from([
                ("onoff".to_string(), json!(true)),
                ("dim".to_string(), json!(0.4)),
            ]),
        };
        let device = Device::new(record, host, Arc::new(DefaultDevice));
        assert_eq!(device.state().len(), 1);
        assert_eq!(device.capability_value("onoff"), Some(json!(true)));
    }

    #[tokio::test]
    async fn should_return_empty_options_for_capability_without_options() {
        let (_host, device) = paired(&["dim"]).await;
        assert_eq!(device.capability_options("dim"), Some(json!({})));
        assert_eq!(device.capability_options("onoff"), None);

        device
            .set_capability_options("dim", json!({"decimals": 2}))
            .await
            .unwrap();
        assert_eq!(device.capability_options("dim"), Some(json!({"decimals": 2})));
    }

    #[tokio::test]
    async fn should_not_call_on_settings_when_settings_set_programmatically() {
        let spy = Arc::new(Spy::default());
        let (host, device) = paired_with(&["onoff"], spy.clone()).await;

        device
            .set_settings(settings(&[("a", SettingValue::Int(1))]))
            .await
            .unwrap();

        assert!(spy.settings_changes.lock().unwrap().is_empty());
        assert_eq!(device.setting("a"), Some(SettingValue::Int(1)));
        assert_eq!(device.setting("transition"), Some(SettingValue::Int(300)));
        let persisted = host.record(device.app_id()).unwrap().descriptor.settings;
        assert_eq!(persisted.len(), 2);
    }

    #[tokio::test]
    async fn should_call_on_settings_with_changed_keys_when_host_changes_settings() {
        let spy = Arc::new(Spy::default());
        let (_host, device) = paired_with(&["onoff"], spy.clone()).await;

        let message = device
            .handle_settings_change(settings(&[
                ("a", SettingValue::Int(1)),
                ("transition", SettingValue::Int(300)),
            ]))
            .await
            .unwrap();

        assert_eq!(message.as_deref(), Some("Settings saved"));
        let changes = spy.settings_changes.lock().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].changed_keys, vec!["a".to_string()]);
        assert_eq!(changes[0].old_settings.get("a"), None);
        assert_eq!(device.setting("a"), Some(SettingValue::Int(1)));
    }

    #[tokio::test]
    async fn should_keep_settings_when_on_settings_rejects() {
        let spy = Arc::new(Spy {
            reject_settings: true,
            ..Spy::default()
        });
        let (_host, device) = paired_with(&["onoff"], spy).await;

        let err = device
            .handle_settings_change(settings(&[("transition", SettingValue::Int(9000))]))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceKitError::Hook(ref e) if e.message == "transition too long"));
        assert_eq!(device.setting("transition"), Some(SettingValue::Int(300)));
    }

    #[tokio::test]
    async fn should_persist_and_remove_store_values() {
        let (host, device) = paired(&["onoff"]).await;
        device.set_store_value("token", json!("abc")).await.unwrap();
        device.set_store_value("retries", json!(3)).await.unwrap();
        assert_eq!(device.store_keys(), vec!["retries", "token"]);
        assert_eq!(device.store_value("token"), Some(json!("abc")));

        device.unset_store_value("token").await.unwrap();
        device.unset_store_value("missing").await.unwrap();
        assert_eq!(device.store_value("token"), None);
        let persisted = host.record(device.app_id()).unwrap().descriptor.store;
        assert_eq!(persisted.len(), 1);
    }

    #[tokio::test]
    async fn should_apply_value_when_single_listener_accepts() {
        let (_host, device) = paired(&["onoff"]).await;
        device
            .register_capability_listener("onoff", |value: Value, _options: Value| async move {
                Ok(json!({ "echo": value }))
            })
            .unwrap();

        let result = device
            .handle_capability_request("onoff", json!(true), json!({}))
            .await
            .unwrap();
        assert_eq!(result, json!({ "echo": true }));
        assert_eq!(device.capability_value("onoff"), Some(json!(true)));
    }

    #[tokio::test]
    async fn should_surface_listener_error_and_keep_state() {
        let (_host, device) = paired(&["onoff"]).await;
        device
            .register_capability_listener("onoff", |_value: Value, _options: Value| async {
                Err(HookError::new("device did not respond"))
            })
            .unwrap();

        let err = device
            .trigger_capability_listener("onoff", json!(true), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceKitError::Hook(ref e) if e.message == "device did not respond"));
        assert_eq!(device.capability_value("onoff"), None);
    }

    #[tokio::test]
    async fn should_reject_second_listener_for_same_capability() {
        let (_host, device) = paired(&["onoff", "dim"]).await;
        device
            .register_capability_listener("onoff", |v: Value, _o: Value| async move { Ok(v) })
            .unwrap();
        let err = device
            .register_multiple_capability_listener(
                ["dim", "onoff"],
                Duration::from_millis(10),
                |_v: CapabilityValues, _o: CapabilityValues| async { Ok(()) },
            )
            .unwrap_err();
        assert_eq!(
            err,
            DeviceKitError::Validation(ValidationError::ListenerAlreadyRegistered(
                "onoff".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn should_fail_when_no_listener_registered() {
        let (_host, device) = paired(&["onoff"]).await;
        let err = device
            .trigger_capability_listener("onoff", json!(true), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeviceKitError::NotFound(NotFoundError { entity: "CapabilityListener", .. })
        ));
    }

    #[tokio::test]
    async fn should_refuse_listener_for_missing_capability() {
        let (_host, device) = paired(&["onoff"]).await;
        let result = device
            .register_capability_listener("dim", |v: Value, _o: Value| async move { Ok(v) });
        assert!(matches!(
            result,
            Err(DeviceKitError::Validation(ValidationError::UnknownCapability(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn should_coalesce_requests_within_debounce_window() {
        let (_host, device) = paired(&["dim", "light_hue"]).await;
        let calls: Arc<Mutex<Vec<CapabilityValues>>> = Arc::default();
        let sink = Arc::clone(&calls);
        device
            .register_multiple_capability_listener(
                ["dim", "light_hue"],
                Duration::from_millis(500),
                move |values: CapabilityValues, _options: CapabilityValues| {
                    sink.lock().unwrap().push(values);
                    async { Ok(()) }
                },
            )
            .unwrap();

        let start = tokio::time::Instant::now();
        let first = {
            let device = device.clone();
            tokio::spawn(async move {
                device
                    .handle_capability_request("dim", json!(0.5), json!({}))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = {
            let device = device.clone();
            tokio::spawn(async move {
                device
                    .handle_capability_request("light_hue", json!(0.25), json!({"duration": 300}))
                    .await
            })
        };

        assert_eq!(first.await.unwrap(), Ok(Value::Null));
        assert_eq!(second.await.unwrap(), Ok(Value::Null));
        assert!(start.elapsed() >= Duration::from_millis(600));

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].get("dim"), Some(&json!(0.5)));
        assert_eq!(calls[0].get("light_hue"), Some(&json!(0.25)));
        assert_eq!(device.capability_value("light_hue"), Some(json!(0.25)));
    }

    #[tokio::test(start_paused = true)]
    async fn should_fire_separately_when_requests_are_further_apart_than_debounce() {
        let (_host, device) = paired(&["dim", "light_hue"]).await;
        let calls: Arc<Mutex<Vec<CapabilityValues>>> = Arc::default();
        let sink = Arc::clone(&calls);
        device
            .register_multiple_capability_listener(
                ["dim", "light_hue"],
                Duration::from_millis(200),
                move |values: CapabilityValues, _options: CapabilityValues| {
                    sink.lock().unwrap().push(values);
                    async { Ok(()) }
                },
            )
            .unwrap();

        device
            .trigger_capability_listener("dim", json!(0.1), json!({}))
            .await
            .unwrap();
        device
            .trigger_capability_listener("dim", json!(0.9), json!({}))
            .await
            .unwrap();

        assert_eq!(calls.lock().unwrap().len(), 2);
        assert_eq!(device.capability_value("dim"), Some(json!(0.9)));
    }

    #[tokio::test(start_paused = true)]
    async fn should_give_every_requester_the_listener_error() {
        let (_host, device) = paired(&["dim", "light_hue"]).await;
        device
            .register_multiple_capability_listener(
                ["dim", "light_hue"],
                Duration::from_millis(50),
                |_values: CapabilityValues, _options: CapabilityValues| async {
                    Err(HookError::new("bridge busy"))
                },
            )
            .unwrap();

        let (a, b) = tokio::join!(
            device.trigger_capability_listener("dim", json!(0.4), json!({})),
            device.trigger_capability_listener("light_hue", json!(0.6), json!({})),
        );
        for outcome in [a, b] {
            assert!(matches!(outcome, Err(DeviceKitError::Hook(ref e)) if e.message == "bridge busy"));
        }
        assert!(device.state().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_cancel_pending_batch_when_destroyed() {
        let (_host, device) = paired(&["dim"]).await;
        let calls: Arc<Mutex<usize>> = Arc::default();
        let sink = Arc::clone(&calls);
        device
            .register_multiple_capability_listener(
                ["dim"],
                Duration::from_millis(500),
                move |_values: CapabilityValues, _options: CapabilityValues| {
                    *sink.lock().unwrap() += 1;
                    async { Ok(()) }
                },
            )
            .unwrap();

        let pending = {
            let device = device.clone();
            tokio::spawn(async move {
                device
                    .trigger_capability_listener("dim", json!(0.5), json!({}))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        device.destroy();

        assert_eq!(pending.await.unwrap(), Err(DeviceKitError::Destroyed));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn should_drop_listener_when_capability_removed() {
        let (_host, device) = paired(&["onoff"]).await;
        device
            .register_capability_listener("onoff", |v: Value, _o: Value| async move { Ok(v) })
            .unwrap();
        device.remove_capability("onoff").await.unwrap();
        device.add_capability("onoff").await.unwrap();

        let err = device
            .trigger_capability_listener("onoff", json!(true), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceKitError::NotFound(_)));
    }

    #[tokio::test]
    async fn should_override_unavailable_message() {
        let (host, device) = paired(&["onoff"]).await;
        device
            .set_unavailable(Some("out of range".to_string()))
            .await
            .unwrap();
        device
            .set_unavailable(Some("battery empty".to_string()))
            .await
            .unwrap();
        assert!(!device.available());
        assert_eq!(device.availability().message(), Some("battery empty"));
        assert_eq!(
            host.device(device.app_id()).unwrap().availability,
            Availability::unavailable(Some("battery empty".to_string()))
        );

        device.set_available().await.unwrap();
        assert!(device.available());
    }

    #[tokio::test]
    async fn should_set_and_clear_warning() {
        let (host, device) = paired(&["onoff"]).await;
        device
            .set_warning(Some("firmware update available".to_string()))
            .await
            .unwrap();
        assert_eq!(device.warning().as_deref(), Some("firmware update available"));
        device.unset_warning().await.unwrap();
        assert_eq!(device.warning(), None);
        assert_eq!(host.device(device.app_id()).unwrap().warning, None);
    }

    #[tokio::test]
    async fn should_update_class_and_energy() {
        let (host, device) = paired(&["onoff"]).await;
        device.set_class("socket").await.unwrap();
        let mut energy = Energy::new();
        energy.insert("cumulative".to_string(), json!(true));
        device.set_energy(energy.clone()).await.unwrap();

        assert_eq!(device.class(), "socket");
        assert_eq!(device.energy(), energy);
        let record = host.record(device.app_id()).unwrap();
        assert_eq!(record.descriptor.class, "socket");
        assert!(matches!(
            device.set_class("").await,
            Err(DeviceKitError::Validation(ValidationError::EmptyClass))
        ));
    }

    #[tokio::test]
    async fn should_attach_images() {
        let (host, device) = paired(&["onoff"]).await;
        device
            .set_album_art_image(Image::from_url("art", "https://example.test/cover.jpg"))
            .await
            .unwrap();
        device
            .set_camera_image("front", "Front door", Image::from_path("snap", "/tmp/front.jpg"))
            .await
            .unwrap();

        assert_eq!(device.album_art().unwrap().id, "art");
        assert_eq!(device.camera_image("front").unwrap().title, "Front door");
        assert!(device.camera_image("back").is_none());
        assert!(host.device(device.app_id()).unwrap().album_art.is_some());
    }

    #[tokio::test]
    async fn should_emit_capability_event_after_accepted_value() {
        let (_host, device) = paired(&["onoff"]).await;
        let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
        let sink = Arc::clone(&seen);
        device.emitter().on("capability", move |payload| {
            sink.lock().unwrap().push(payload.clone());
            Ok(())
        });

        device.set_capability_value("onoff", json!(true)).await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![json!({"capability": "onoff", "value": true})]
        );
    }

    #[tokio::test]
    async fn should_resolve_ready_after_init_even_when_it_fails() {
        let spy = Arc::new(Spy {
            fail_init: true,
            ..Spy::default()
        });
        let (_host, device) = paired_with(&["onoff"], spy).await;
        device.ready().await;
        device.ready().await;
        assert!(!device.available());
        assert_eq!(device.availability().message(), Some("bridge offline"));
    }

    #[tokio::test]
    async fn should_run_discovery_hooks_by_change_kind() {
        let spy = Arc::new(Spy::default());
        let (_host, device) = paired_with(&["onoff"], spy.clone()).await;
        let first = sighting("10.0.0.2", 1);
        assert!(device.matches_discovery(&first));

        device.handle_discovery_result(&first).await;
        device.handle_discovery_result(&first).await;
        device.handle_discovery_result(&sighting("10.0.0.2", 5)).await;
        device.handle_discovery_result(&sighting("10.0.0.9", 6)).await;

        assert_eq!(
            *spy.discovery_calls.lock().unwrap(),
            vec!["available", "last_seen", "address"]
        );
    }

    #[tokio::test]
    async fn should_mark_unavailable_when_discovery_available_fails() {
        let spy = Arc::new(Spy {
            fail_discovery: true,
            ..Spy::default()
        });
        let (_host, device) = paired_with(&["onoff"], spy.clone()).await;

        device.handle_discovery_result(&sighting("10.0.0.2", 1)).await;
        assert!(!device.available());
        assert_eq!(device.availability().message(), Some("unsupported firmware"));

        device.handle_discovery_result(&sighting("10.0.0.2", 2)).await;
        assert_eq!(
            *spy.discovery_calls.lock().unwrap(),
            vec!["available", "available"]
        );
    }

    #[tokio::test]
    async fn should_update_name_and_call_hook_when_renamed() {
        let spy = Arc::new(Spy::default());
        let (_host, device) = paired_with(&["onoff"], spy.clone()).await;
        device.handle_renamed("Desk lamp").await.unwrap();
        assert_eq!(device.name(), "Desk lamp");
        assert_eq!(*spy.renames.lock().unwrap(), vec!["Desk lamp"]);
    }

    #[tokio::test]
    async fn should_persist_user_settings_and_name_through_host() {
        let spy = Arc::new(Spy::default());
        let (host, device) = paired_with(&["onoff"], spy).await;

        device
            .handle_settings_change(settings(&[("transition", SettingValue::Int(900))]))
            .await
            .unwrap();
        device.handle_renamed("Kitchen").await.unwrap();

        let record = host.record(device.app_id()).unwrap();
        assert_eq!(
            record.descriptor.settings.get("transition"),
            Some(&SettingValue::Int(900))
        );
        assert_eq!(record.descriptor.name, "Kitchen");
        assert_eq!(
            host.calls_for(device.app_id())[1..],
            ["set_settings", "set_name"]
        );
    }

    #[tokio::test]
    async fn should_keep_settings_and_name_when_host_rejects() {
        let spy = Arc::new(Spy::default());
        let (host, device) = paired_with(&["onoff"], spy.clone()).await;
        host.set_reachable(device.app_id(), false);

        let err = device
            .handle_settings_change(settings(&[("transition", SettingValue::Int(900))]))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceKitError::Rejected(_)));
        assert!(matches!(
            device.handle_renamed("Kitchen").await,
            Err(DeviceKitError::Rejected(_))
        ));

        assert_eq!(device.setting("transition"), Some(SettingValue::Int(300)));
        assert_eq!(device.name(), "Lamp");
        assert!(spy.renames.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_keep_state_within_capabilities_when_removed_during_write() {
        let host = Arc::new(InMemoryHost::new().with_latency(Duration::from_millis(10)));
        let (host, device) = paired_on(host, &["onoff", "dim"], Arc::new(DefaultDevice)).await;

        let (set, options, removed) = tokio::join!(
            device.set_capability_value("dim", json!(0.5)),
            device.set_capability_options("dim", json!({"decimals": 2})),
            device.remove_capability("dim"),
        );
        removed.unwrap();
        for outcome in [set, options] {
            assert!(matches!(
                outcome,
                Ok(()) | Err(DeviceKitError::Validation(ValidationError::UnknownCapability(_)))
            ));
        }

        assert_eq!(device.capabilities(), vec!["onoff"]);
        assert!(device.state().is_empty());
        assert_eq!(device.capability_options("dim"), None);
        let record = host.record(device.app_id()).unwrap();
        assert!(!record.state.contains_key("dim"));
        assert!(!record.descriptor.capabilities_options.contains_key("dim"));
    }

    #[tokio::test(start_paused = true)]
    async fn should_refuse_value_when_capability_removed_before_host_answered() {
        let host = Arc::new(InMemoryHost::new().with_latency(Duration::from_millis(10)));
        let (_host, device) = paired_on(host, &["onoff", "dim"], Arc::new(DefaultDevice)).await;

        let removal = {
            let device = device.clone();
            tokio::spawn(async move { device.remove_capability("dim").await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let set = device.set_capability_value("dim", json!(0.5)).await;
        removal.await.unwrap().unwrap();

        assert_eq!(
            set,
            Err(DeviceKitError::Validation(ValidationError::UnknownCapability(
                "dim".to_string()
            )))
        );
        assert!(device.state().is_empty());
    }

    /// After `destroy` accessors are out of contract. This only pins what
    /// the API documents: host-bound calls fail and the device reports
    /// itself destroyed.
    #[tokio::test]
    async fn should_report_destroyed_after_destroy() {
        let (_host, device) = paired(&["onoff"]).await;
        let destroyed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&destroyed);
        device.emitter().on("destroy", move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        device.destroy();
        device.destroy();

        assert!(destroyed.load(Ordering::SeqCst));
        assert!(device.is_destroyed());
        assert_eq!(
            device.set_capability_value("onoff", json!(true)).await,
            Err(DeviceKitError::Destroyed)
        );
        assert_eq!(device.emitter().listener_count("destroy"), 0);
    }

    #[tokio::test]
    async fn should_add_set_and_remove_capability_end_to_end() {
        let (_host, device) = paired(&["onoff"]).await;

        device.set_capability_value("onoff", json!(true)).await.unwrap();
        assert_eq!(device.capability_value("onoff"), Some(json!(true)));

        device.remove_capability("onoff").await.unwrap();
        assert!(!device.has_capability("onoff"));
        assert_eq!(device.capability_value("onoff"), None);
    }
}
