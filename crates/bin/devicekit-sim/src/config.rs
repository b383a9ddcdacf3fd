//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `devicekit.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// App manifest location.
    pub app: AppConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// In-memory host settings.
    pub host: HostConfig,
    /// What the simulation does once drivers are up.
    pub scenario: ScenarioConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Path to the app manifest JSON.
    pub manifest: String,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Simulated round-trip time of every host operation.
    pub latency_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Debounce window of dimmable lights.
    pub debounce_ms: u64,
    /// Pair every listed device instead of only the first one per driver.
    pub pair_all: bool,
}

impl Config {
    /// Load configuration from `devicekit.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or the
    /// result does not validate.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("devicekit.toml")?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("DEVICEKIT_MANIFEST") {
            self.app.manifest = val;
        }
        if let Some(val) = var("DEVICEKIT_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
        if let Some(latency) = var("DEVICEKIT_HOST_LATENCY_MS").and_then(|val| val.parse().ok()) {
            self.host.latency_ms = latency;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.app.manifest.trim().is_empty() {
            return Err(ConfigError::Validation(
                "manifest path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn host_latency(&self) -> Duration {
        Duration::from_millis(self.host.latency_ms)
    }

    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.scenario.debounce_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            manifest: "app.json".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "devicekit_sim=info,devicekit_app=info,devicekit_adapter_virtual=info"
                .to_string(),
        }
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            pair_all: true,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert_eq!(config.app.manifest, "app.json");
        assert_eq!(config.host_latency(), Duration::ZERO);
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert!(config.scenario.pair_all);
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.app.manifest, "app.json");
    }

    #[test]
    fn should_parse_full_toml() {
        let toml = "
            [app]
            manifest = 'demo/app.json'

            [logging]
            filter = 'debug'

            [host]
            latency_ms = 25

            [scenario]
            debounce_ms = 100
            pair_all = false
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.app.manifest, "demo/app.json");
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.host_latency(), Duration::from_millis(25));
        assert_eq!(config.debounce(), Duration::from_millis(100));
        assert!(!config.scenario.pair_all);
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert_eq!(config.app.manifest, "app.json");
    }

    #[test]
    fn should_prefer_environment_over_file_values() {
        let mut config: Config = toml::from_str("[host]\nlatency_ms = 5").unwrap();
        config.apply_overrides(env(&[
            ("DEVICEKIT_MANIFEST", "/etc/devicekit/app.json"),
            ("DEVICEKIT_LOG", "warn"),
            ("DEVICEKIT_HOST_LATENCY_MS", "40"),
        ]));
        assert_eq!(config.app.manifest, "/etc/devicekit/app.json");
        assert_eq!(config.logging.filter, "warn");
        assert_eq!(config.host.latency_ms, 40);
    }

    #[test]
    fn should_let_rust_log_win_over_devicekit_log() {
        let mut config = Config::default();
        config.apply_overrides(env(&[("DEVICEKIT_LOG", "warn"), ("RUST_LOG", "trace")]));
        assert_eq!(config.logging.filter, "trace");
    }

    #[test]
    fn should_ignore_unparsable_latency_override() {
        let mut config = Config::default();
        config.apply_overrides(env(&[("DEVICEKIT_HOST_LATENCY_MS", "soon")]));
        assert_eq!(config.host.latency_ms, 0);
    }

    #[test]
    fn should_reject_empty_manifest_path() {
        let mut config = Config::default();
        config.app.manifest = "  ".to_string();
        assert!(config.validate().is_err());
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn should_report_parse_error_for_invalid_toml() {
        let result: Result<Config, _> = toml::from_str("invalid {{{");
        assert!(result.is_err());
    }
}
