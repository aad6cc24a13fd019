//! Router and application configuration.
//!
//! # Example TOML
//!
//! ```toml
//! [router]
//! device = "vcan0"
//! device_type = "virtual"
//! check_bus_ok_interval_ms = 1000
//! stats_interval_ms = 1000
//! baud_rate = 500000
//!
//! [[watches]]
//! name = "engine"
//! id = 0x100
//! mask = 0x700
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::{Result, RouterError};
use crate::core::traits::BaudRate;

/// Kind of transport to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// In-process bus from the virtual registry.
    #[default]
    Virtual,
    /// Linux SocketCAN interface.
    #[serde(rename = "socketcan", alias = "socket_can", alias = "can")]
    SocketCan,
}

impl DeviceType {
    /// Config name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Virtual => "virtual",
            Self::SocketCan => "socketcan",
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Router task configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Device identifier (interface or registry name).
    pub device: String,

    /// Transport kind.
    #[serde(default)]
    pub device_type: DeviceType,

    /// Bus health check interval in milliseconds.
    #[serde(default = "default_check_bus_ok_interval_ms")]
    pub check_bus_ok_interval_ms: u64,

    /// Statistics emission interval in milliseconds.
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,

    /// Bus bit rate, applied through the extended-status capability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<BaudRate>,

    /// Fallback tick period of the runner in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Capacity of each output, statistics, status and alarm channel.
    #[serde(default = "default_buffer_size")]
    pub output_buffer_size: usize,

    /// Capacity of the inbound write queue.
    #[serde(default = "default_buffer_size")]
    pub write_queue_size: usize,
}

/// Largest accepted interval setting, one day.
pub const MAX_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

fn default_check_bus_ok_interval_ms() -> u64 {
    1000
}

fn default_stats_interval_ms() -> u64 {
    1000
}

fn default_tick_interval_ms() -> u64 {
    10
}

fn default_buffer_size() -> usize {
    1024
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            device: "vcan0".to_string(),
            device_type: DeviceType::default(),
            check_bus_ok_interval_ms: default_check_bus_ok_interval_ms(),
            stats_interval_ms: default_stats_interval_ms(),
            baud_rate: None,
            tick_interval_ms: default_tick_interval_ms(),
            output_buffer_size: default_buffer_size(),
            write_queue_size: default_buffer_size(),
        }
    }
}

impl RouterConfig {
    /// Create a configuration for `device` with default settings.
    pub fn new(device: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            device: device.into(),
            device_type,
            ..Default::default()
        }
    }

    /// Set the bus check interval.
    pub fn with_check_bus_ok_interval_ms(mut self, ms: u64) -> Self {
        self.check_bus_ok_interval_ms = ms;
        self
    }

    /// Set the statistics interval.
    pub fn with_stats_interval_ms(mut self, ms: u64) -> Self {
        self.stats_interval_ms = ms;
        self
    }

    /// Set the baud rate.
    pub fn with_baud_rate(mut self, rate: BaudRate) -> Self {
        self.baud_rate = Some(rate);
        self
    }

    /// Set the runner tick period.
    pub fn with_tick_interval_ms(mut self, ms: u64) -> Self {
        self.tick_interval_ms = ms;
        self
    }

    /// Set the output channel capacity.
    pub fn with_output_buffer_size(mut self, size: usize) -> Self {
        self.output_buffer_size = size;
        self
    }

    /// Check the configuration for obvious mistakes.
    pub fn validate(&self) -> Result<()> {
        if self.device.trim().is_empty() {
            return Err(RouterError::config("device name must not be empty"));
        }
        for (key, value) in [
            ("check_bus_ok_interval_ms", self.check_bus_ok_interval_ms),
            ("stats_interval_ms", self.stats_interval_ms),
            ("tick_interval_ms", self.tick_interval_ms),
        ] {
            if value == 0 || value > MAX_INTERVAL_MS {
                return Err(RouterError::config(format!(
                    "{} must be in 1..={}, got {}",
                    key, MAX_INTERVAL_MS, value
                )));
            }
        }
        if self.output_buffer_size == 0 || self.write_queue_size == 0 {
            return Err(RouterError::config("buffer sizes must be > 0"));
        }
        Ok(())
    }
}

/// A subscription declared in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Output channel name.
    pub name: String,
    /// Target identifier.
    pub id: u32,
    /// Identifier mask.
    #[serde(default = "default_mask")]
    pub mask: u32,
}

fn default_mask() -> u32 {
    crate::core::message::MAX_EXTENDED_ID
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Router settings.
    pub router: RouterConfig,

    /// Initial subscriptions.
    #[serde(default)]
    pub watches: Vec<WatchConfig>,
}

impl AppConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RouterError::config(format!("Invalid configuration: {}", e)))?;
        config.router.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RouterError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Annotated example configuration.
    pub fn example_toml() -> &'static str {
        EXAMPLE_TOML
    }
}

const EXAMPLE_TOML: &str = r#"# canroute configuration

[router]
# Interface name (socketcan) or registry name (virtual)
device = "vcan0"
# "virtual" or "socketcan"
device_type = "virtual"
check_bus_ok_interval_ms = 1000
stats_interval_ms = 1000
# Only applied by adapters with extended status support
# baud_rate = 500000
tick_interval_ms = 10
output_buffer_size = 1024
write_queue_size = 1024

# Every id in 0x100..=0x1FF
[[watches]]
name = "engine"
id = 0x100
mask = 0x700

# Exactly 0x1A0
[[watches]]
name = "brakes"
id = 0x1A0
mask = 0x7FF
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: RouterConfig = toml::from_str(r#"device = "can0""#).unwrap();
        assert_eq!(config.device_type, DeviceType::Virtual);
        assert_eq!(config.check_bus_ok_interval_ms, 1000);
        assert_eq!(config.stats_interval_ms, 1000);
        assert_eq!(config.tick_interval_ms, 10);
        assert!(config.baud_rate.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_parses() {
        let config = AppConfig::from_toml_str(AppConfig::example_toml()).unwrap();
        assert_eq!(config.router.device, "vcan0");
        assert_eq!(config.watches.len(), 2);
        assert_eq!(
            config.watches[0],
            WatchConfig {
                name: "engine".into(),
                id: 0x100,
                mask: 0x700
            }
        );
    }

    #[test]
    fn test_device_type_names() {
        let config: RouterConfig =
            toml::from_str("device = \"can0\"\ndevice_type = \"socketcan\"").unwrap();
        assert_eq!(config.device_type, DeviceType::SocketCan);
        let config: RouterConfig =
            toml::from_str("device = \"can0\"\ndevice_type = \"can\"").unwrap();
        assert_eq!(config.device_type, DeviceType::SocketCan);
    }

    #[test]
    fn test_watch_mask_defaults_to_exact() {
        let config = AppConfig::from_toml_str(
            "[router]\ndevice = \"v\"\n[[watches]]\nname = \"x\"\nid = 0x42\n",
        )
        .unwrap();
        assert_eq!(config.watches[0].mask, 0x1FFF_FFFF);
    }

    #[test]
    fn test_baud_rate_validation() {
        let ok = AppConfig::from_toml_str("[router]\ndevice = \"v\"\nbaud_rate = 250000\n");
        assert_eq!(
            ok.unwrap().router.baud_rate.map(|r| r.bits_per_second()),
            Some(250_000)
        );

        let bad = AppConfig::from_toml_str("[router]\ndevice = \"v\"\nbaud_rate = 123456\n");
        assert!(matches!(bad, Err(RouterError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(RouterConfig::new("", DeviceType::Virtual).validate().is_err());
        assert!(RouterConfig::new("v", DeviceType::Virtual)
            .with_stats_interval_ms(0)
            .validate()
            .is_err());
        assert!(RouterConfig::new("v", DeviceType::Virtual)
            .with_check_bus_ok_interval_ms(0)
            .validate()
            .is_err());
        assert!(RouterConfig::new("v", DeviceType::Virtual)
            .with_output_buffer_size(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_bounds_intervals() {
        let day = RouterConfig::new("v", DeviceType::Virtual).with_stats_interval_ms(MAX_INTERVAL_MS);
        assert!(day.validate().is_ok());

        for huge in [MAX_INTERVAL_MS + 1, 1 << 63, u64::MAX] {
            let configs = [
                RouterConfig::new("v", DeviceType::Virtual).with_stats_interval_ms(huge),
                RouterConfig::new("v", DeviceType::Virtual).with_check_bus_ok_interval_ms(huge),
                RouterConfig::new("v", DeviceType::Virtual).with_tick_interval_ms(huge),
            ];
            for config in configs {
                assert!(matches!(config.validate(), Err(RouterError::Config(_))));
            }
        }
    }
}
