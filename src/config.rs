//! Runtime configuration for the relay bridge.
//!
//! Loaded from TOML; every section and field is optional and falls back to
//! [`Config::default`].
//!
//! ```toml
//! [device]
//! address = "127.0.0.1:5555"
//! connect_timeout_ms = 2000
//! reconnect_secs = 5
//!
//! [relay]
//! enabled = true
//! address = "127.0.0.1:921"
//! heartbeat_secs = 2
//! response_timeout_ms = 5000
//!
//! [logging]
//! level = "info"
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
}

/// Launch monitor stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// `host:port` of the GC2 stream (simulator or USB bridge)
    pub address: String,
    pub connect_timeout_ms: u64,
    /// Delay between reconnect attempts; 0 disables reconnecting
    pub reconnect_secs: u64,
}

/// Simulator relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub enabled: bool,
    pub address: String,
    pub heartbeat_secs: u64,
    pub response_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides it
    pub level: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: crate::transport::DEFAULT_ADDR.to_string(),
            connect_timeout_ms: 2000,
            reconnect_secs: 5,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: crate::relay::client::DEFAULT_ADDR.to_string(),
            heartbeat_secs: 2,
            response_timeout_ms: 5000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

const LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

impl Config {
    /// Load and validate a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.address.trim().is_empty() {
            return Err(invalid("device.address", "must not be empty"));
        }
        if self.device.connect_timeout_ms == 0 {
            return Err(invalid("device.connect_timeout_ms", "must be positive"));
        }
        if self.relay.enabled {
            if self.relay.address.trim().is_empty() {
                return Err(invalid("relay.address", "must not be empty"));
            }
            if self.relay.heartbeat_secs == 0 {
                return Err(invalid("relay.heartbeat_secs", "must be positive"));
            }
            if self.relay.response_timeout_ms == 0 {
                return Err(invalid("relay.response_timeout_ms", "must be positive"));
            }
        }
        let level = self.logging.level.to_ascii_lowercase();
        if !LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::Invalid {
                field: "logging.level",
                reason: format!("unknown level {:?}", self.logging.level),
            });
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

impl DeviceConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `None` when reconnecting is disabled.
    pub fn reconnect_interval(&self) -> Option<Duration> {
        (self.reconnect_secs > 0).then(|| Duration::from_secs(self.reconnect_secs))
    }
}

impl RelayConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}
