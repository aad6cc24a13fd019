//! Device metadata registry.
//!
//! Self-describing transport types and the configuration keys they accept,
//! used by `canroute list-devices` and for generating example configs.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::gateway::config::DeviceType;

/// Value type of a configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Integer,
}

/// One configuration key of a device type.
#[derive(Debug, Clone, Serialize)]
pub struct ParameterMetadata {
    /// Key under `[router]`.
    pub name: &'static str,
    /// What the key controls.
    pub description: &'static str,
    /// Whether the key must be present.
    pub required: bool,
    /// Value used when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Value type.
    pub param_type: ParameterType,
}

impl ParameterMetadata {
    const fn required(name: &'static str, description: &'static str, param_type: ParameterType) -> Self {
        Self {
            name,
            description,
            required: true,
            default_value: None,
            param_type,
        }
    }

    fn optional(
        name: &'static str,
        description: &'static str,
        param_type: ParameterType,
        default_value: Value,
    ) -> Self {
        Self {
            name,
            description,
            required: false,
            default_value: Some(default_value),
            param_type,
        }
    }
}

/// Description of a transport type.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceMetadata {
    /// Device type.
    pub device_type: DeviceType,
    /// Human-readable name.
    pub display_name: &'static str,
    /// Short description.
    pub description: &'static str,
    /// Whether this build can open the device.
    pub available: bool,
    /// Whether the transport reports status snapshots and accepts a baud rate.
    pub extended_status: bool,
    /// Example `[router]` table.
    pub example_config: Value,
    /// Accepted keys.
    pub parameters: Vec<ParameterMetadata>,
}

/// Registry of known device types.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceMetadata>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device type.
    pub fn register(&mut self, device: DeviceMetadata) {
        self.devices.push(device);
    }

    /// All registered device types.
    pub fn devices(&self) -> &[DeviceMetadata] {
        &self.devices
    }

    /// Look up a device type.
    pub fn get(&self, device_type: DeviceType) -> Option<&DeviceMetadata> {
        self.devices.iter().find(|d| d.device_type == device_type)
    }

    /// Device types this build can open.
    pub fn available(&self) -> impl Iterator<Item = &DeviceMetadata> {
        self.devices.iter().filter(|d| d.available)
    }
}

fn common_parameters() -> Vec<ParameterMetadata> {
    vec![
        ParameterMetadata::optional(
            "check_bus_ok_interval_ms",
            "Bus health check interval",
            ParameterType::Integer,
            json!(1000),
        ),
        ParameterMetadata::optional(
            "stats_interval_ms",
            "Statistics emission interval",
            ParameterType::Integer,
            json!(1000),
        ),
        ParameterMetadata::optional(
            "tick_interval_ms",
            "Runner tick period",
            ParameterType::Integer,
            json!(10),
        ),
        ParameterMetadata::optional(
            "output_buffer_size",
            "Capacity of each output channel",
            ParameterType::Integer,
            json!(1024),
        ),
        ParameterMetadata::optional(
            "write_queue_size",
            "Capacity of the inbound write queue",
            ParameterType::Integer,
            json!(1024),
        ),
    ]
}

fn build_registry() -> DeviceRegistry {
    let mut registry = DeviceRegistry::new();

    let mut virtual_params = vec![
        ParameterMetadata::required("device", "Name of the in-process bus", ParameterType::String),
        ParameterMetadata::optional(
            "baud_rate",
            "Bus bit rate (recorded only)",
            ParameterType::Integer,
            Value::Null,
        ),
    ];
    virtual_params.extend(common_parameters());
    registry.register(DeviceMetadata {
        device_type: DeviceType::Virtual,
        display_name: "Virtual bus",
        description: "In-process CAN bus for testing and simulation",
        available: true,
        extended_status: true,
        example_config: json!({ "device": "vcan0", "device_type": "virtual" }),
        parameters: virtual_params,
    });

    let mut socketcan_params = vec![ParameterMetadata::required(
        "device",
        "Network interface name, e.g. can0",
        ParameterType::String,
    )];
    socketcan_params.extend(common_parameters());
    registry.register(DeviceMetadata {
        device_type: DeviceType::SocketCan,
        display_name: "SocketCAN",
        description: "Linux SocketCAN network interface",
        available: cfg!(all(feature = "can", target_os = "linux")),
        extended_status: false,
        example_config: json!({ "device": "can0", "device_type": "socketcan" }),
        parameters: socketcan_params,
    });

    registry
}

static DEVICE_REGISTRY: Lazy<DeviceRegistry> = Lazy::new(build_registry);

/// Get the global device registry.
pub fn device_registry() -> &'static DeviceRegistry {
    &DEVICE_REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_always_available() {
        let registry = device_registry();
        let virt = registry.get(DeviceType::Virtual).unwrap();
        assert!(virt.available);
        assert!(registry.available().any(|d| d.device_type == DeviceType::Virtual));
    }

    #[test]
    fn test_device_is_required_everywhere() {
        for device in device_registry().devices() {
            let key = device.parameters.iter().find(|p| p.name == "device").unwrap();
            assert!(key.required, "{:?}", device.device_type);
        }
    }

    #[test]
    fn test_example_configs_deserialize() {
        for device in device_registry().devices() {
            let config: crate::gateway::config::RouterConfig =
                serde_json::from_value(device.example_config.clone()).unwrap();
            assert_eq!(config.device_type, device.device_type);
        }
    }
}
