use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::controller::ControllerConfig;
use crate::quota::config::{DeviceConfig, TrackerConfig, validate_devices};
use crate::store::get_default_store_path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub controller: ControllerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Managed devices; synchronised into the store when the daemon starts
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Store file; platform default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn resolve_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => get_default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Load configuration from a YAML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse YAML config file: {}", path.display()))?;

    validate_config(&config)?;

    Ok(config)
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    config
        .controller
        .validate()
        .context("Invalid controller settings")?;

    config.tracker.validate()?;

    if !LOG_LEVELS.contains(&config.logging.level.to_lowercase().as_str()) {
        anyhow::bail!(
            "Invalid log level '{}': expected one of {}",
            config.logging.level,
            LOG_LEVELS.join(", ")
        );
    }

    validate_devices(&config.devices)?;

    Ok(())
}

/// Example configuration written by `netquota init`
pub const EXAMPLE_CONFIG: &str = include_str!("../example-config.yaml");

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Helper to create a temporary YAML config file for testing
    fn create_temp_yaml_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const MINIMAL: &str = r#"
controller:
  url: https://192.168.1.1
  username: admin
  password: secret
"#;

    #[test]
    fn example_config_is_valid() {
        let config: Config = serde_yaml::from_str(EXAMPLE_CONFIG).unwrap();
        validate_config(&config).unwrap();
        assert!(!config.devices.is_empty());
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let file = create_temp_yaml_config(MINIMAL);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.controller.site, "default");
        assert!(!config.controller.is_udm);
        assert_eq!(config.tracker.poll_interval_secs, 30);
        assert_eq!(config.tracker.activity_min_bytes, 1024);
        assert_eq!(config.logging.level, "info");
        assert!(config.store.path.is_none());
        assert!(config.devices.is_empty());
    }

    #[test]
    fn store_path_override_is_used() {
        let store = StoreConfig {
            path: Some(PathBuf::from("/tmp/quota.json")),
        };
        assert_eq!(store.resolve_path().unwrap(), PathBuf::from("/tmp/quota.json"));
    }

    #[test]
    fn invalid_log_level_fails_validation() {
        let yaml = format!("{}\nlogging:\n  level: loud\n", MINIMAL);
        let file = create_temp_yaml_config(&yaml);
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn zero_poll_interval_fails_validation() {
        let yaml = format!("{}\ntracker:\n  poll_interval_secs: 0\n", MINIMAL);
        let file = create_temp_yaml_config(&yaml);
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn invalid_device_mac_fails_validation() {
        let yaml = format!(
            "{}\ndevices:\n  - mac: not-a-mac\n    schedules: []\n",
            MINIMAL
        );
        let file = create_temp_yaml_config(&yaml);
        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid MAC address"));
    }

    #[test]
    fn missing_controller_fails_to_parse() {
        let file = create_temp_yaml_config("devices: []\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Path::new("/nonexistent/netquota.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/netquota.yaml"));
    }
}
