//! Driver runtime: owns every device of one declared type.
//!
//! A driver pairs new devices, restores persisted ones on app start,
//! deletes them on request and routes discovery results to the devices
//! they belong to. Devices are built in two phases: the driver behaviour
//! maps a read-only [`DeviceProbe`] to a class tag, then the
//! [`DeviceClassRegistry`] builds the behaviour registered under that tag.

pub mod behavior;
pub mod classes;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use devicekit_domain::device::{DeviceDescriptor, DeviceRecord};
use devicekit_domain::device_data::DeviceData;
use devicekit_domain::discovery::DiscoveryResult;
use devicekit_domain::error::{DeviceKitError, NotFoundError, ValidationError};
use devicekit_domain::id::DeviceAppId;
use devicekit_domain::manifest::DriverManifest;

use crate::device::{Device, DeviceBehavior};
use crate::discovery::DiscoveryStrategy;
use crate::emitter::EventEmitter;
use crate::pairing::PairSession;
use crate::ports::Host;

pub use behavior::{DefaultDriver, DeviceProbe, DriverBehavior, PairFlow};
pub use classes::{DeviceClassRegistry, DeviceFactory};

struct DriverInner<H: Host> {
    manifest: DriverManifest,
    host: Arc<H>,
    behavior: Arc<dyn DriverBehavior<H>>,
    classes: DeviceClassRegistry<H>,
    discovery: Option<DiscoveryStrategy>,
    devices: Mutex<Vec<Device<H>>>,
    /// Identities being paired, held until the device is live or pairing
    /// failed.
    pairing: Mutex<Vec<DeviceData>>,
    emitter: EventEmitter,
    ready: watch::Sender<bool>,
}

/// Handle to one driver. Cloning is cheap and every clone refers to the
/// same driver.
pub struct Driver<H: Host> {
    inner: Arc<DriverInner<H>>,
}

impl<H: Host> Clone for Driver<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: Host> fmt::Debug for Driver<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("id", &self.inner.manifest.id)
            .field("devices", &self.lock_devices().len())
            .field("discovery", &self.inner.discovery)
            .finish_non_exhaustive()
    }
}

impl<H: Host> Driver<H> {
    /// Create a builder for the driver declared by `manifest`.
    #[must_use]
    pub fn builder(manifest: DriverManifest, host: Arc<H>) -> DriverBuilder<H> {
        DriverBuilder {
            manifest,
            host,
            behavior: Arc::new(DefaultDriver),
            classes: DeviceClassRegistry::default(),
            discovery: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.manifest.id
    }

    #[must_use]
    pub fn manifest(&self) -> &DriverManifest {
        &self.inner.manifest
    }

    #[must_use]
    pub fn emitter(&self) -> &EventEmitter {
        &self.inner.emitter
    }

    /// The strategy declared in the manifest, if any.
    #[must_use]
    pub fn discovery_strategy(&self) -> Option<&DiscoveryStrategy> {
        self.inner.discovery.as_ref()
    }

    /// Wait until [`init`](Self::init) has completed.
    pub async fn ready(&self) {
        let mut ready = self.inner.ready.subscribe();
        let _ = ready.wait_for(|ready| *ready).await;
    }

    /// Run `on_init` and release [`ready`](Self::ready) waiters, whatever
    /// the hook returned.
    ///
    /// # Errors
    ///
    /// Returns the hook's [`HookError`](devicekit_domain::error::HookError).
    #[tracing::instrument(skip(self), fields(driver = %self.id()))]
    pub async fn init(&self) -> Result<(), DeviceKitError> {
        let result = self.inner.behavior.on_init(self).await;
        self.inner.ready.send_replace(true);
        if let Err(err) = &result {
            self.inner.emitter.error(format_args!("init failed: {err}"));
        }
        result.map_err(Into::into)
    }

    /// Live devices, in pairing order.
    #[must_use]
    pub fn devices(&self) -> Vec<Device<H>> {
        self.lock_devices().clone()
    }

    /// The device whose pairing identity equals `data`, as decided by
    /// [`DriverBehavior::is_equal_device_data`].
    #[must_use]
    pub fn device(&self, data: &DeviceData) -> Option<Device<H>> {
        self.lock_devices()
            .iter()
            .find(|d| self.inner.behavior.is_equal_device_data(d.data(), data))
            .cloned()
    }

    #[must_use]
    pub fn device_by_id(&self, app_id: DeviceAppId) -> Option<Device<H>> {
        self.lock_devices()
            .iter()
            .find(|d| d.app_id() == app_id)
            .cloned()
    }

    /// Open a pairing session.
    ///
    /// Unless `on_pair` installs a custom flow, the session answers
    /// `list_devices` with [`list_pairable_devices`](Self::list_pairable_devices)
    /// and `add_device` (payload: a [`DeviceDescriptor`]) with
    /// [`add_device`](Self::add_device), replying `{ "app_id": … }`.
    ///
    /// # Errors
    ///
    /// Returns the `on_pair` hook's error.
    #[tracing::instrument(skip(self), fields(driver = %self.id()))]
    pub async fn start_pairing(&self) -> Result<PairSession, DeviceKitError> {
        let session = PairSession::new(self.id());
        let flow = self.inner.behavior.on_pair(self, &session).await?;
        tracing::debug!(session = %session.id(), ?flow, "pairing started");
        if flow == PairFlow::Default {
            let driver = self.clone();
            session.set_handler("list_devices", move |_payload| {
                let driver = driver.clone();
                async move {
                    let devices = driver.list_pairable_devices().await?;
                    let devices = serde_json::to_value(devices)
                        .map_err(|err| ValidationError::InvalidPayload(err.to_string()))?;
                    Ok::<_, DeviceKitError>(devices)
                }
            });
            let driver = self.clone();
            session.set_handler("add_device", move |payload| {
                let driver = driver.clone();
                async move {
                    let descriptor: DeviceDescriptor = serde_json::from_value(payload)
                        .map_err(|err| ValidationError::InvalidPayload(err.to_string()))?;
                    let device = driver.add_device(descriptor).await?;
                    Ok::<_, DeviceKitError>(
                        serde_json::json!({ "app_id": device.app_id().to_string() }),
                    )
                }
            });
        }
        Ok(session)
    }

    /// Devices the user can pick from in the default pairing flow.
    ///
    /// # Errors
    ///
    /// Returns the `on_pair_list_devices` hook's error.
    pub async fn list_pairable_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceKitError> {
        Ok(self.inner.behavior.on_pair_list_devices(self).await?)
    }

    /// Complete pairing: persist the device through the host, build it,
    /// then run `on_init` and `on_added`.
    ///
    /// Settings declared in the driver manifest are used as defaults under
    /// the descriptor's own settings. Emits `device_added`.
    ///
    /// # Errors
    ///
    /// Fails when the descriptor is invalid, a device with equal data is
    /// already paired, the class tag is unknown or the host refuses.
    #[tracing::instrument(skip(self, descriptor), fields(driver = %self.id(), device_name = %descriptor.name))]
    pub async fn add_device(
        &self,
        mut descriptor: DeviceDescriptor,
    ) -> Result<Device<H>, DeviceKitError> {
        descriptor.validate()?;
        let _reservation = self.reserve(&descriptor.data)?;
        let mut settings = self.inner.manifest.default_settings();
        settings.append(&mut descriptor.settings);
        descriptor.settings = settings;

        let behavior = self.construct(&descriptor)?;
        let record = DeviceRecord {
            app_id: DeviceAppId::new(),
            driver_id: self.id().to_string(),
            descriptor,
            state: std::collections::BTreeMap::new(),
        };
        self.inner.host.register_device(&record).await?;

        let device = Device::new(record, Arc::clone(&self.inner.host), behavior);
        self.lock_devices().push(device.clone());
        device.init().await;
        device.handle_added().await;
        tracing::info!(device = %device.app_id(), "device added");
        self.notify("device_added", device.app_id());
        Ok(device)
    }

    /// Rebuild a device the host persisted in an earlier run. Runs
    /// `on_init` but not `on_added`.
    ///
    /// # Errors
    ///
    /// Fails when the record belongs to another driver, the device is
    /// already live, or its class tag is unknown.
    #[tracing::instrument(skip(self, record), fields(driver = %self.id(), device = %record.app_id))]
    pub async fn restore_device(&self, record: DeviceRecord) -> Result<Device<H>, DeviceKitError> {
        if record.driver_id != self.id() {
            return Err(ValidationError::WrongDriver {
                expected: self.id().to_string(),
                actual: record.driver_id,
            }
            .into());
        }
        if self.device_by_id(record.app_id).is_some() {
            return Err(ValidationError::DeviceAlreadyPaired(record.app_id.to_string()).into());
        }
        let behavior = self.construct(&record.descriptor)?;
        let device = Device::new(record, Arc::clone(&self.inner.host), behavior);
        self.lock_devices().push(device.clone());
        device.init().await;
        Ok(device)
    }

    /// Run `on_deleted`, make the host forget the device, then destroy it.
    /// Emits `device_deleted`.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] (`Device`) for an unknown id, or the
    /// host's rejection of the removal. A rejected device stays live.
    #[tracing::instrument(skip(self), fields(driver = %self.id()))]
    pub async fn delete_device(&self, app_id: DeviceAppId) -> Result<(), DeviceKitError> {
        let device = self.device_by_id(app_id).ok_or_else(|| NotFoundError {
            entity: "Device",
            id: app_id.to_string(),
        })?;
        device.handle_deleted().await;
        self.inner.host.unregister_device(app_id).await?;
        self.lock_devices().retain(|d| d.app_id() != app_id);
        device.destroy();
        self.notify("device_deleted", app_id);
        Ok(())
    }

    /// Record a result in the discovery strategy and hand it to every
    /// device claiming it. Returns how many devices claimed it.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] (`DiscoveryStrategy`) when the driver
    /// declares none, or a kind mismatch from the strategy.
    #[tracing::instrument(skip(self, result), fields(driver = %self.id(), endpoint = %result.id))]
    pub async fn handle_discovery_result(
        &self,
        result: DiscoveryResult,
    ) -> Result<usize, DeviceKitError> {
        let strategy = self.inner.discovery.as_ref().ok_or_else(|| NotFoundError {
            entity: "DiscoveryStrategy",
            id: self.id().to_string(),
        })?;
        strategy.record(result.clone())?;

        let matching: Vec<Device<H>> = self
            .devices()
            .into_iter()
            .filter(|d| d.matches_discovery(&result))
            .collect();
        for device in &matching {
            device.handle_discovery_result(&result).await;
        }
        tracing::debug!(matched = matching.len(), "discovery result routed");
        Ok(matching.len())
    }

    /// Claim a pairing identity. Fails when a live device or a pairing in
    /// flight already holds an equal one.
    fn reserve(&self, data: &DeviceData) -> Result<Reservation<'_, H>, DeviceKitError> {
        let mut pairing = self.lock_pairing();
        let behavior = &self.inner.behavior;
        let taken = pairing
            .iter()
            .any(|pending| behavior.is_equal_device_data(pending, data))
            || self
                .lock_devices()
                .iter()
                .any(|d| behavior.is_equal_device_data(d.data(), data));
        if taken {
            return Err(ValidationError::DeviceAlreadyPaired(data.as_value().to_string()).into());
        }
        pairing.push(data.clone());
        Ok(Reservation {
            driver: self,
            data: data.clone(),
        })
    }

    fn construct(
        &self,
        descriptor: &DeviceDescriptor,
    ) -> Result<Arc<dyn DeviceBehavior<H>>, DeviceKitError> {
        let probe = DeviceProbe::new(self.id(), descriptor);
        let tag = self.inner.behavior.on_map_device_class(&probe);
        tracing::debug!(driver = %self.id(), tag = ?tag, "mapped device class");
        Ok(self.inner.classes.resolve(tag.as_deref())?)
    }

    fn notify(&self, event: &str, app_id: DeviceAppId) {
        let payload = serde_json::json!({ "app_id": app_id.to_string() });
        if let Err(err) = self.inner.emitter.emit(event, &payload) {
            tracing::warn!(driver = %self.id(), event, %err, "event listener failed");
        }
    }

    fn lock_devices(&self) -> MutexGuard<'_, Vec<Device<H>>> {
        self.inner
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pairing(&self) -> MutexGuard<'_, Vec<DeviceData>> {
        self.inner
            .pairing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Pairing identity held by an [`add_device`](Driver::add_device) call in
/// flight. Released on drop, whichever way the call ended.
struct Reservation<'a, H: Host> {
    driver: &'a Driver<H>,
    data: DeviceData,
}

impl<H: Host> Drop for Reservation<'_, H> {
    fn drop(&mut self) {
        let mut pairing = self.driver.lock_pairing();
        if let Some(index) = pairing.iter().position(|pending| *pending == self.data) {
            pairing.remove(index);
        }
    }
}

/// Step-by-step builder for [`Driver`].
pub struct DriverBuilder<H: Host> {
    manifest: DriverManifest,
    host: Arc<H>,
    behavior: Arc<dyn DriverBehavior<H>>,
    classes: DeviceClassRegistry<H>,
    discovery: Option<DiscoveryStrategy>,
}

impl<H: Host> DriverBuilder<H> {
    #[must_use]
    pub fn behavior(mut self, behavior: impl DriverBehavior<H>) -> Self {
        self.behavior = Arc::new(behavior);
        self
    }

    #[must_use]
    pub fn classes(mut self, classes: DeviceClassRegistry<H>) -> Self {
        self.classes = classes;
        self
    }

    #[must_use]
    pub fn discovery_strategy(mut self, strategy: DiscoveryStrategy) -> Self {
        self.discovery = Some(strategy);
        self
    }

    /// Consume the builder and return a [`Driver`].
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] (`DiscoveryStrategy`) when the manifest
    /// declares a strategy that was not supplied or a different one was.
    pub fn build(self) -> Result<Driver<H>, DeviceKitError> {
        let supplied = self.discovery.as_ref().map(DiscoveryStrategy::id);
        if supplied != self.manifest.discovery.as_deref() {
            return Err(NotFoundError {
                entity: "DiscoveryStrategy",
                id: self
                    .manifest
                    .discovery
                    .clone()
                    .or_else(|| supplied.map(str::to_string))
                    .unwrap_or_default(),
            }
            .into());
        }
        let (ready, _) = watch::channel(false);
        Ok(Driver {
            inner: Arc::new(DriverInner {
                emitter: EventEmitter::new(format!("driver:{}", self.manifest.id)),
                manifest: self.manifest,
                host: self.host,
                behavior: self.behavior,
                classes: self.classes,
                discovery: self.discovery,
                devices: Mutex::new(Vec::new()),
                pairing: Mutex::new(Vec::new()),
                ready,
            }),
        })
    }
}
