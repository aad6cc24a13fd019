//! Alarm events and their logging bridge.
//!
//! Alarms are structured, non-fatal notifications about bus conditions.
//! They are published on the router's alarm channel and, independently,
//! written to `tracing` by [`log_alarm`].
//!
//! # Example
//!
//! ```ignore
//! let mut alarms = task.subscribe_alarms();
//! while let Ok(alarm) = alarms.recv().await {
//!     println!("[{}] {}", alarm.code, alarm.message);
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Alarm Level and Code
// ============================================================================

/// Severity of an alarm event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmLevel {
    /// Informational.
    Info,
    /// Condition that needs attention.
    #[default]
    Warning,
    /// Condition that ended the session.
    Error,
}

impl std::fmt::Display for AlarmLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Machine-readable alarm code, one per controller status flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmCode {
    /// Transmit queue full.
    TxQueueFull,
    /// Controller overrun.
    Overrun,
    /// Bus error (stuff/form/ack/bit error).
    BusError,
    /// Controller went bus-off.
    BusOff,
    /// Receive buffer overflow.
    RxOverflow,
    /// Transmit buffer overflow.
    TxOverflow,
}

impl AlarmCode {
    /// All codes in classification order.
    pub const ALL: [AlarmCode; 6] = [
        Self::TxQueueFull,
        Self::Overrun,
        Self::BusError,
        Self::BusOff,
        Self::RxOverflow,
        Self::TxOverflow,
    ];

    /// Numeric code for consumers that match on integers.
    pub const fn code(self) -> u16 {
        match self {
            Self::TxQueueFull => 1,
            Self::Overrun => 2,
            Self::BusError => 3,
            Self::BusOff => 4,
            Self::RxOverflow => 5,
            Self::TxOverflow => 6,
        }
    }

    /// Stable string form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TxQueueFull => "can_tx_queue_full",
            Self::Overrun => "can_overrun",
            Self::BusError => "can_bus_error",
            Self::BusOff => "can_bus_off",
            Self::RxOverflow => "can_rx_overflow",
            Self::TxOverflow => "can_tx_overflow",
        }
    }

    /// Human-readable description.
    pub const fn message(self) -> &'static str {
        match self {
            Self::TxQueueFull => "CAN transmit queue full",
            Self::Overrun => "CAN controller overrun",
            Self::BusError => "CAN bus error",
            Self::BusOff => "CAN controller is bus-off",
            Self::RxOverflow => "CAN receive buffer overflow",
            Self::TxOverflow => "CAN transmit buffer overflow",
        }
    }

    /// Whether this condition counts towards the aggregate bus error.
    pub const fn is_bus_error(self) -> bool {
        !matches!(self, Self::TxQueueFull)
    }
}

impl std::fmt::Display for AlarmCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Alarm Event
// ============================================================================

/// A single alarm notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmEvent {
    /// When the condition was observed.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub level: AlarmLevel,
    /// Machine-readable code.
    pub code: AlarmCode,
    /// Human-readable message.
    pub message: String,
}

impl AlarmEvent {
    /// Create a warning-level alarm for a status condition.
    pub fn warning(code: AlarmCode, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            level: AlarmLevel::Warning,
            code,
            message: code.message().to_string(),
        }
    }
}

impl std::fmt::Display for AlarmEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {} ({})",
            self.timestamp.to_rfc3339(),
            self.level,
            self.message,
            self.code
        )
    }
}

/// Write an alarm to `tracing` at a level matching its severity.
pub fn log_alarm(device: &str, alarm: &AlarmEvent) {
    use tracing::{error, info, warn};

    match alarm.level {
        AlarmLevel::Info => info!(
            device = %device,
            code = %alarm.code,
            "{}", alarm.message
        ),
        AlarmLevel::Warning => warn!(
            device = %device,
            code = %alarm.code,
            "{}", alarm.message
        ),
        AlarmLevel::Error => error!(
            device = %device,
            code = %alarm.code,
            "{}", alarm.message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alarm_codes_unique() {
        let mut numeric: Vec<u16> = AlarmCode::ALL.iter().map(|c| c.code()).collect();
        numeric.sort_unstable();
        numeric.dedup();
        assert_eq!(numeric.len(), AlarmCode::ALL.len());
    }

    #[test]
    fn test_only_tx_queue_full_is_not_bus_error() {
        for code in AlarmCode::ALL {
            assert_eq!(code.is_bus_error(), code != AlarmCode::TxQueueFull);
        }
    }

    #[test]
    fn test_warning_event() {
        let now = Utc::now();
        let alarm = AlarmEvent::warning(AlarmCode::BusOff, now);
        assert_eq!(alarm.level, AlarmLevel::Warning);
        assert_eq!(alarm.message, "CAN controller is bus-off");
        assert_eq!(alarm.timestamp, now);
    }

    #[test]
    fn test_serialize_code() {
        let json = serde_json::to_string(&AlarmCode::RxOverflow).unwrap();
        assert_eq!(json, "\"rx_overflow\"");
    }
}
