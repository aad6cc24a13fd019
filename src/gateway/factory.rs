//! Transport factory.
//!
//! Opens a [`CanTransport`] from a [`RouterConfig`].

use crate::core::error::{Result, RouterError};
use crate::core::traits::CanTransport;
use crate::transport::VirtualBus;

use super::config::{DeviceType, RouterConfig};

/// Open the transport described by `config`.
pub fn open_device(config: &RouterConfig) -> Result<Box<dyn CanTransport>> {
    match config.device_type {
        DeviceType::Virtual => open_virtual(config),
        DeviceType::SocketCan => open_socketcan(config),
    }
}

fn open_virtual(config: &RouterConfig) -> Result<Box<dyn CanTransport>> {
    let bus = VirtualBus::named(&config.device);
    bus.open();
    Ok(Box::new(bus))
}

#[cfg(all(feature = "can", target_os = "linux"))]
fn open_socketcan(config: &RouterConfig) -> Result<Box<dyn CanTransport>> {
    use crate::transport::SocketCanTransport;

    let transport = SocketCanTransport::open(&config.device)
        .map_err(|e| RouterError::Connection(e.to_string()))?;
    Ok(Box::new(transport))
}

#[cfg(not(all(feature = "can", target_os = "linux")))]
fn open_socketcan(config: &RouterConfig) -> Result<Box<dyn CanTransport>> {
    Err(RouterError::config(format!(
        "Unsupported device type: {} ({}). Check if the `can` feature is enabled.",
        config.device_type, config.device
    )))
}
