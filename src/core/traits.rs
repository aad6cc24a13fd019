//! Core traits for CAN transports.
//!
//! # Capability Hierarchy
//!
//! ```text
//! CanTransport         // write, read, pending count, bus health, lifecycle
//! └── ExtendedStatus   // optional: status snapshot, baud rate
//! ```
//!
//! The extended capability is discovered through
//! [`CanTransport::extended_status`] instead of downcasting to a concrete
//! adapter type.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::core::error::{Result, RouterError, TransportError};
use crate::core::message::CanMessage;
use crate::monitor::fault::StatusSnapshot;

/// Lifecycle state of a router task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// No transport is open.
    #[default]
    PreOperational,

    /// Transport open, not processing ticks.
    Stopped,

    /// Ticks are being processed.
    Running,

    /// A session-fatal error occurred.
    Exception,
}

impl TaskState {
    /// Check if the task is processing ticks.
    #[inline]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Check if `configure` may be called.
    #[inline]
    pub const fn can_configure(&self) -> bool {
        matches!(self, Self::PreOperational | Self::Exception)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PreOperational => "PreOperational",
            Self::Stopped => "Stopped",
            Self::Running => "Running",
            Self::Exception => "Exception",
        };
        write!(f, "{}", s)
    }
}

/// Classified result of a single transport read.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A message was read.
    Message(CanMessage),

    /// Transient fault; skip this slot.
    Recoverable(TransportError),

    /// Any other fault; the tick fails.
    Fatal(TransportError),
}

impl From<std::result::Result<CanMessage, TransportError>> for ReadOutcome {
    fn from(result: std::result::Result<CanMessage, TransportError>) -> Self {
        match result {
            Ok(msg) => Self::Message(msg),
            Err(e) if e.is_recoverable() => Self::Recoverable(e),
            Err(e) => Self::Fatal(e),
        }
    }
}

/// How a transport signals that frames are waiting.
#[derive(Debug, Clone)]
pub enum Readiness {
    /// In-process notifier, woken by the producer.
    Notify(Arc<Notify>),

    /// File descriptor that becomes readable.
    #[cfg(unix)]
    Fd(std::os::unix::io::RawFd),
}

/// CAN bus bit rate accepted by adapters with the extended capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct BaudRate(u32);

impl BaudRate {
    /// Bit rates supported by common adapters.
    pub const SUPPORTED: [u32; 9] = [
        10_000, 20_000, 50_000, 100_000, 125_000, 250_000, 500_000, 800_000, 1_000_000,
    ];

    /// Create a baud rate, rejecting non-standard values.
    pub fn new(bits_per_second: u32) -> Result<Self> {
        if Self::SUPPORTED.contains(&bits_per_second) {
            Ok(Self(bits_per_second))
        } else {
            Err(RouterError::config(format!(
                "unsupported baud rate {} (expected one of {:?})",
                bits_per_second,
                Self::SUPPORTED
            )))
        }
    }

    /// Bits per second.
    #[inline]
    pub fn bits_per_second(&self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = RouterError;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<BaudRate> for u32 {
    fn from(rate: BaudRate) -> Self {
        rate.0
    }
}

/// Abstract CAN bus adapter.
///
/// All calls must be non-blocking once [`set_read_timeout`](Self::set_read_timeout)
/// has been called with a zero duration; the router relies on this to bound
/// tick latency.
pub trait CanTransport: Send {
    /// Device identifier (interface name, registry key, ...).
    fn device(&self) -> &str;

    /// Queue a message for transmission.
    fn write(&mut self, msg: &CanMessage) -> Result<(), TransportError>;

    /// Read the next pending message.
    fn read(&mut self) -> Result<CanMessage, TransportError>;

    /// Number of messages that can be read right now.
    fn pending_messages(&mut self) -> usize;

    /// Query the controller for bus health.
    fn check_bus_ok(&mut self) -> bool;

    /// Cumulative error count reported by the adapter.
    fn error_count(&mut self) -> u64;

    /// Set the read timeout. The router always sets zero.
    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), TransportError>;

    /// Reset the controller.
    fn reset(&mut self) -> Result<(), TransportError>;

    /// Discard any buffered frames.
    fn clear(&mut self) -> Result<(), TransportError>;

    /// Close the adapter. Further I/O fails with [`TransportError::Closed`].
    fn close(&mut self) -> Result<(), TransportError>;

    /// Readiness source for event-driven wake-up.
    fn readiness(&self) -> Option<Readiness> {
        None
    }

    /// Extended status capability, if the adapter supports it.
    fn extended_status(&mut self) -> Option<&mut dyn ExtendedStatus> {
        None
    }
}

/// Optional capability: status snapshots and bit-rate configuration.
pub trait ExtendedStatus {
    /// Sample the controller status flags.
    fn status(&mut self) -> Result<StatusSnapshot, TransportError>;

    /// Configure the bus bit rate.
    fn set_baud_rate(&mut self, rate: BaudRate) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state() {
        assert!(TaskState::Running.is_running());
        assert!(!TaskState::Stopped.is_running());
        assert!(TaskState::PreOperational.can_configure());
        assert!(TaskState::Exception.can_configure());
        assert!(!TaskState::Running.can_configure());
        assert_eq!(TaskState::default(), TaskState::PreOperational);
    }

    #[test]
    fn test_read_outcome_classification() {
        let msg = CanMessage::new(0x10, &[1]).unwrap();
        assert!(matches!(ReadOutcome::from(Ok(msg)), ReadOutcome::Message(_)));
        assert!(matches!(
            ReadOutcome::from(Err(TransportError::Timeout("noise".into()))),
            ReadOutcome::Recoverable(_)
        ));
        assert!(matches!(
            ReadOutcome::from(Err(TransportError::Closed)),
            ReadOutcome::Fatal(_)
        ));
    }

    #[test]
    fn test_baud_rate() {
        assert_eq!(BaudRate::new(500_000).unwrap().bits_per_second(), 500_000);
        assert!(BaudRate::new(123_456).is_err());
        assert!(BaudRate::try_from(250_000u32).is_ok());
    }
}
