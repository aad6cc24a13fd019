//! Core types shared by every part of the router.

pub mod error;
pub mod logging;
pub mod message;
pub mod metadata;
pub mod traits;

pub use error::{Result, RouterError, TransportError};
pub use logging::{AlarmCode, AlarmEvent, AlarmLevel};
pub use message::CanMessage;
pub use traits::*;
