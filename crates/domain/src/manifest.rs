//! App manifest: the static declarative descriptor of an app's drivers.
//!
//! Loaded once from JSON and handed explicitly to each driver; never
//! generated at runtime.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::discovery::DiscoveryKind;
use crate::error::ManifestError;
use crate::value::{Energy, SettingValue, Settings};

/// Top-level app manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppManifest {
    pub id: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub drivers: Vec<DriverManifest>,
    /// Discovery strategies, keyed by strategy id.
    #[serde(default)]
    pub discovery: BTreeMap<String, DiscoveryStrategyManifest>,
}

/// One declared driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverManifest {
    pub id: String,
    pub name: String,
    /// Default device class for devices of this driver.
    pub class: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, rename = "capabilitiesOptions")]
    pub capabilities_options: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub settings: Vec<SettingDefinition>,
    /// Id of the discovery strategy this driver uses, if any.
    #[serde(default)]
    pub discovery: Option<String>,
    #[serde(default)]
    pub energy: Energy,
}

/// A setting declared by a driver, with its default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingDefinition {
    pub id: String,
    #[serde(default)]
    pub value: SettingValue,
}

/// A declared discovery strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryStrategyManifest {
    #[serde(rename = "type")]
    pub kind: DiscoveryKind,
    /// Protocol-specific matching rules, passed through untouched.
    #[serde(flatten)]
    pub config: BTreeMap<String, serde_json::Value>,
}

impl AppManifest {
    /// Parse and validate a manifest from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Parse`] on malformed JSON, or a validation
    /// variant when driver ids repeat or reference unknown strategies.
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        let manifest: Self = serde_json::from_str(json)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check manifest consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::DuplicateDriver`] or
    /// [`ManifestError::UnknownDiscoveryStrategy`].
    pub fn validate(&self) -> Result<(), ManifestError> {
        let mut seen = HashSet::new();
        for driver in &self.drivers {
            if !seen.insert(driver.id.as_str()) {
                return Err(ManifestError::DuplicateDriver(driver.id.clone()));
            }
            if let Some(strategy) = &driver.discovery
                && !self.discovery.contains_key(strategy)
            {
                return Err(ManifestError::UnknownDiscoveryStrategy {
                    driver: driver.id.clone(),
                    strategy: strategy.clone(),
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn driver(&self, id: &str) -> Option<&DriverManifest> {
        self.drivers.iter().find(|d| d.id == id)
    }

    /// The strategy a driver declares, with its id.
    #[must_use]
    pub fn discovery_for(
        &self,
        driver: &DriverManifest,
    ) -> Option<(&str, &DiscoveryStrategyManifest)> {
        let id = driver.discovery.as_deref()?;
        self.discovery.get_key_value(id).map(|(k, v)| (k.as_str(), v))
    }
}

impl DriverManifest {
    /// Default settings for a freshly paired device.
    #[must_use]
    pub fn default_settings(&self) -> Settings {
        self.settings
            .iter()
            .map(|s| (s.id.clone(), s.value.clone()))
            .collect()
    }
}
