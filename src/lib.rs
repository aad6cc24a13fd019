//! # canroute
//!
//! A CAN bus router: identifier/mask subscriptions fan frames out to named
//! channels, while a health monitor watches the bus and emits statistics.
//!
//! ## Features
//!
//! - **Identifier/mask routing**: overlapping subscriptions, each with its own
//!   output channel, resolved through a lazily built per-identifier cache
//! - **Bus health**: periodic bus checks, statistics and status-flag alarms
//! - **Pluggable transports**: virtual in-process bus, Linux SocketCAN
//! - **Feature Gated**: hardware transports compile only when enabled
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use canroute::prelude::*;
//!
//! let bus = VirtualBus::named("vcan0");
//! let mut task = RouterTask::new(RouterConfig::new("vcan0", DeviceType::Virtual))?;
//! task.watch("engine", 0x100, 0x700);
//! let mut engine = task.subscribe("engine").unwrap();
//!
//! task.configure()?;
//! task.start()?;
//! bus.inject(CanMessage::new(0x123, &[0xDE, 0xAD])?);
//! task.update()?;
//! assert_eq!(engine.try_recv()?.can_id, 0x123);
//! ```
//!
//! ## Transports
//!
//! | Transport | Feature | Status snapshots |
//! |-----------|---------|------------------|
//! | Virtual   | -       | optional         |
//! | SocketCAN | `can`   | no               |

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod core;
pub mod gateway;
pub mod monitor;
pub mod routing;
pub mod transport;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::core::{
        error::{Result, RouterError, TransportError},
        logging::{AlarmCode, AlarmEvent, AlarmLevel},
        message::CanMessage,
        traits::*,
    };
    pub use crate::gateway::{AppConfig, DeviceType, RouterConfig, RouterTask, TaskRunner};
    pub use crate::monitor::{Statistics, StatusFlags, StatusSnapshot};
    pub use crate::routing::MessageReceiver;
    pub use crate::transport::VirtualBus;
}

// Re-export core types at crate root for convenience
pub use crate::core::error::{Result, RouterError, TransportError};
pub use crate::core::message::CanMessage;
pub use crate::core::traits::{CanTransport, ExtendedStatus, TaskState};
pub use crate::gateway::{RouterConfig, RouterTask, TaskRunner};
