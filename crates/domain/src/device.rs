//! Device descriptor: the shape of a device as offered during pairing and
//! as persisted by the host between app runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::device_data::DeviceData;
use crate::error::{DeviceKitError, ValidationError};
use crate::id::DeviceAppId;
use crate::value::{Energy, Settings, Store};

/// A pairable device: everything the host needs to create it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub data: DeviceData,
    /// Device type tag (e.g. `light`, `socket`, `sensor`).
    pub class: String,
    /// Ordered, unique capability ids.
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub capabilities_options: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub store: Store,
    #[serde(default)]
    pub energy: Energy,
}

impl DeviceDescriptor {
    /// Create a builder for constructing a [`DeviceDescriptor`].
    #[must_use]
    pub fn builder() -> DeviceDescriptorBuilder {
        DeviceDescriptorBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceKitError::Validation`] when:
    /// - `name` is empty ([`ValidationError::EmptyName`])
    /// - `class` is empty ([`ValidationError::EmptyClass`])
    /// - a capability id is empty or repeated
    /// - options are given for a capability the device does not have
    pub fn validate(&self) -> Result<(), DeviceKitError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if self.class.is_empty() {
            return Err(ValidationError::EmptyClass.into());
        }
        for (index, capability) in self.capabilities.iter().enumerate() {
            if capability.is_empty() {
                return Err(ValidationError::EmptyCapabilityId.into());
            }
            if self.capabilities[..index].contains(capability) {
                return Err(ValidationError::DuplicateCapability(capability.clone()).into());
            }
        }
        if let Some(unknown) = self
            .capabilities_options
            .keys()
            .find(|id| !self.capabilities.contains(id))
        {
            return Err(ValidationError::UnknownCapability(unknown.clone()).into());
        }
        Ok(())
    }

    #[must_use]
    pub fn has_capability(&self, capability_id: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability_id)
    }
}

/// Step-by-step builder for [`DeviceDescriptor`].
#[derive(Debug, Default)]
pub struct DeviceDescriptorBuilder {
    name: Option<String>,
    data: Option<DeviceData>,
    class: Option<String>,
    capabilities: Vec<String>,
    capabilities_options: BTreeMap<String, serde_json::Value>,
    settings: Settings,
    store: Store,
    energy: Energy,
}

impl DeviceDescriptorBuilder {
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn data(mut self, data: impl Into<DeviceData>) -> Self {
        self.data = Some(data.into());
        self
    }

    #[must_use]
    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    #[must_use]
    pub fn capability(mut self, capability_id: impl Into<String>) -> Self {
        self.capabilities.push(capability_id.into());
        self
    }

    #[must_use]
    pub fn capabilities<I, S>(mut self, capability_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities
            .extend(capability_ids.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn capability_options(
        mut self,
        capability_id: impl Into<String>,
        options: serde_json::Value,
    ) -> Self {
        self.capabilities_options
            .insert(capability_id.into(), options);
        self
    }

    #[must_use]
    pub fn setting(
        mut self,
        key: impl Into<String>,
        value: impl Into<crate::value::SettingValue>,
    ) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn store_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.store.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn energy(mut self, energy: Energy) -> Self {
        self.energy = energy;
        self
    }

    /// Consume the builder, validate, and return a [`DeviceDescriptor`].
    ///
    /// # Errors
    ///
    /// Returns [`DeviceKitError::Validation`] if required fields are missing
    /// or invariants fail.
    pub fn build(self) -> Result<DeviceDescriptor, DeviceKitError> {
        let descriptor = DeviceDescriptor {
            name: self.name.unwrap_or_default(),
            data: self.data.unwrap_or_default(),
            class: self.class.unwrap_or_default(),
            capabilities: self.capabilities,
            capabilities_options: self.capabilities_options,
            settings: self.settings,
            store: self.store,
            energy: self.energy,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// Host-persisted snapshot of a paired device, used to restore it on app
/// start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub app_id: DeviceAppId,
    pub driver_id: String,
    #[serde(flatten)]
    pub descriptor: DeviceDescriptor,
    /// Last capability values acknowledged by the host.
    #[serde(default)]
    pub state: BTreeMap<String, serde_json::Value>,
}
