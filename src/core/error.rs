//! Error types for the CAN router.
//!
//! Two layers of errors exist:
//!
//! - [`TransportError`]: faults reported by a concrete bus adapter.
//! - [`RouterError`]: everything the router surfaces to its caller, including
//!   wrapped transport faults and session-fatal bus conditions.

use thiserror::Error;

use crate::monitor::fault::StatusFlags;

/// Faults reported by a [`CanTransport`](crate::core::traits::CanTransport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// Read or write did not complete in time.
    ///
    /// With a zero read timeout this typically means a partial or garbled
    /// frame was seen on the wire. It is the only recoverable transport fault.
    #[error("Transport timeout: {0}")]
    Timeout(String),

    /// The transport has been closed.
    #[error("Transport closed")]
    Closed,

    /// Operating system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Adapter-specific failure.
    #[error("Device error: {0}")]
    Device(String),
}

impl TransportError {
    /// Whether the dispatch loop may skip the current slot and carry on.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Errors surfaced by the router.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Invalid or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The transport could not be opened or reset.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A message violates CAN frame limits.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Operation not allowed in the current lifecycle state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Non-recoverable transport fault during a tick.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The periodic bus health query returned a negative result.
    #[error("CAN bus reported error")]
    BusCheckFailed,

    /// The status snapshot contains at least one bus-error flag.
    #[error("CAN bus error: {0}")]
    BusError(StatusFlags),
}

impl RouterError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid message error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidMessage(msg.into())
    }

    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Whether this error ends the current session.
    ///
    /// Session-fatal errors originate inside a tick; the lifecycle shell is
    /// expected to stop the task and move it into an error state.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::BusCheckFailed | Self::BusError(_)
        )
    }
}

/// Result type for router operations.
pub type Result<T, E = RouterError> = std::result::Result<T, E>;
