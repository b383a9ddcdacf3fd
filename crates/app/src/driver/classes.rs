//! Device class registry: type tag → device behaviour factory.
//!
//! Second phase of device construction. The driver first asks
//! [`DriverBehavior::on_map_device_class`](super::DriverBehavior::on_map_device_class)
//! for a tag, then builds the behaviour registered under it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use devicekit_domain::error::NotFoundError;

use crate::device::{DefaultDevice, DeviceBehavior};
use crate::ports::Host;

/// Builds a fresh behaviour for one device.
pub type DeviceFactory<H> = Arc<dyn Fn() -> Arc<dyn DeviceBehavior<H>> + Send + Sync>;

pub struct DeviceClassRegistry<H: Host> {
    default: DeviceFactory<H>,
    tagged: BTreeMap<String, DeviceFactory<H>>,
}

impl<H: Host> Default for DeviceClassRegistry<H> {
    fn default() -> Self {
        Self::new(|| DefaultDevice)
    }
}

impl<H: Host> DeviceClassRegistry<H> {
    /// Registry whose default class is built by `factory`.
    #[must_use]
    pub fn new<F, B>(factory: F) -> Self
    where
        F: Fn() -> B + Send + Sync + 'static,
        B: DeviceBehavior<H>,
    {
        Self {
            default: erase(factory),
            tagged: BTreeMap::new(),
        }
    }

    /// Add (or replace) the class built for `tag`.
    #[must_use]
    pub fn register<F, B>(mut self, tag: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> B + Send + Sync + 'static,
        B: DeviceBehavior<H>,
    {
        self.tagged.insert(tag.into(), erase(factory));
        self
    }

    #[must_use]
    pub fn tags(&self) -> Vec<&str> {
        self.tagged.keys().map(String::as_str).collect()
    }

    /// Build the behaviour for `tag`, or the default one for `None`.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] (`DeviceClass`) for an unregistered tag.
    pub fn resolve(&self, tag: Option<&str>) -> Result<Arc<dyn DeviceBehavior<H>>, NotFoundError> {
        let factory = match tag {
            None => &self.default,
            Some(tag) => self.tagged.get(tag).ok_or_else(|| NotFoundError {
                entity: "DeviceClass",
                id: tag.to_string(),
            })?,
        };
        Ok(factory())
    }
}

impl<H: Host> fmt::Debug for DeviceClassRegistry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceClassRegistry")
            .field("tags", &self.tags())
            .finish_non_exhaustive()
    }
}

fn erase<H, F, B>(factory: F) -> DeviceFactory<H>
where
    H: Host,
    F: Fn() -> B + Send + Sync + 'static,
    B: DeviceBehavior<H>,
{
    Arc::new(move || Arc::new(factory()) as Arc<dyn DeviceBehavior<H>>)
}
