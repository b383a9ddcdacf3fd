//! Settings change: the payload of a host-initiated settings update.

use serde::{Deserialize, Serialize};

use crate::value::Settings;

/// Old and new settings plus the keys whose value actually changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsChange {
    pub old_settings: Settings,
    pub new_settings: Settings,
    pub changed_keys: Vec<String>,
}

impl SettingsChange {
    /// Merge `partial` over `current` and record which keys changed.
    ///
    /// Keys present in `partial` with the value they already had are not
    /// reported. `changed_keys` follows key order.
    #[must_use]
    pub fn compute(current: &Settings, partial: &Settings) -> Self {
        let mut new_settings = current.clone();
        let mut changed_keys = Vec::new();
        for (key, value) in partial {
            if current.get(key) != Some(value) {
                changed_keys.push(key.clone());
            }
            new_settings.insert(key.clone(), value.clone());
        }
        Self {
            old_settings: current.clone(),
            new_settings,
            changed_keys,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed_keys.is_empty()
    }
}
