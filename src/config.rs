//! Configuration management for genstart
//!
//! This module handles loading, validation, and management of the process-level
//! application configuration from YAML files. Generator behavior itself (start/stop
//! thresholds, timers, schedules) is not stored here — it lives on the D-Bus
//! Settings service and is owned by the settings mirror.

use crate::error::{GenstartError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_true() -> bool {
    true
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// D-Bus service name suffix, e.g. "com.victronenergy.generator.<suffix>"
    pub service_name: String,

    /// Require D-Bus to be available; fail fast on startup if unavailable
    #[serde(default = "default_true")]
    pub require_dbus: bool,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Controller tick interval in milliseconds (the engine evaluates once per tick)
    pub poll_interval_ms: u64,

    /// Timezone used for quiet-hours and test-run scheduling when the system
    /// clock's local offset is unavailable
    pub timezone: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file (directory component is used for rotation)
    pub file: String,

    /// Max log file size in MB (kept for config-file compatibility; rotation
    /// is daily rather than size-based)
    pub max_file_size_mb: u32,

    /// Number of backup files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/var/log/genstart/genstart.log".to_string(),
            max_file_size_mb: 10,
            backup_count: 7,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "generator.startstop0".to_string(),
            require_dbus: true,
            logging: LoggingConfig::default(),
            poll_interval_ms: 1000,
            timezone: "UTC".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration with validation, trying the default search paths and
    /// falling back to built-in defaults if none exist
    pub fn load() -> Result<Self> {
        let default_paths = [
            "genstart_config.yaml",
            "/data/genstart_config.yaml",
            "/etc/genstart/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                let config = Self::from_file(path)?;
                config.validate()?;
                return Ok(config);
            }
        }

        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.service_name.is_empty() {
            return Err(GenstartError::validation(
                "service_name",
                "must not be empty",
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(GenstartError::validation(
                "poll_interval_ms",
                "must be greater than 0",
            ));
        }

        if self.logging.level.is_empty() {
            return Err(GenstartError::validation(
                "logging.level",
                "must not be empty",
            ));
        }

        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| GenstartError::validation("timezone", "must be a valid IANA timezone"))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "generator.startstop0");
        assert_eq!(config.poll_interval_ms, 1000);
        assert!(config.require_dbus);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.service_name = String::new();
        assert!(config.validate().is_err());

        config = Config::default();
        config.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.timezone = "Not/AZone".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.service_name, deserialized.service_name);
        assert_eq!(config.poll_interval_ms, deserialized.poll_interval_ms);
    }
}
