//! Router task, its configuration and the async runner that drives it.

pub mod config;
pub mod factory;
pub mod runtime;
pub mod task;

pub use config::{AppConfig, DeviceType, RouterConfig, WatchConfig};
pub use factory::open_device;
pub use runtime::TaskRunner;
pub use task::{RouterTask, RESERVED_NAMES};
