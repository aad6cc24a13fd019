//! Controller status flags and fault classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::core::error::{Result, RouterError};
use crate::core::logging::{AlarmCode, AlarmEvent};

/// Bitfield of independent controller error flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusFlags(u32);

impl StatusFlags {
    /// Transmit queue full.
    pub const TX_QUEUE_FULL: Self = Self(0x01);
    /// Controller overrun.
    pub const OVERRUN: Self = Self(0x02);
    /// Bus error.
    pub const BUS_ERROR: Self = Self(0x04);
    /// Bus-off.
    pub const BUS_OFF: Self = Self(0x08);
    /// Receive buffer overflow.
    pub const RX_OVERFLOW: Self = Self(0x10);
    /// Transmit buffer overflow.
    pub const TX_OVERFLOW: Self = Self(0x20);

    const KNOWN: [(Self, AlarmCode, &'static str); 6] = [
        (Self::TX_QUEUE_FULL, AlarmCode::TxQueueFull, "TX_QUEUE_FULL"),
        (Self::OVERRUN, AlarmCode::Overrun, "OVERRUN"),
        (Self::BUS_ERROR, AlarmCode::BusError, "BUS_ERROR"),
        (Self::BUS_OFF, AlarmCode::BusOff, "BUS_OFF"),
        (Self::RX_OVERFLOW, AlarmCode::RxOverflow, "RX_OVERFLOW"),
        (Self::TX_OVERFLOW, AlarmCode::TxOverflow, "TX_OVERFLOW"),
    ];

    /// No flags set.
    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build from raw bits. Unknown bits are kept but never classified.
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits.
    #[inline]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Check whether all flags in `other` are set.
    #[inline]
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// Check whether no flags are set.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Set the flags in `other`.
    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for StatusFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        let names: Vec<&str> = Self::KNOWN
            .iter()
            .filter(|(flag, _, _)| self.contains(*flag))
            .map(|(_, _, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "0x{:X}", self.0)
        } else {
            write!(f, "{}", names.join(" | "))
        }
    }
}

/// Controller status sampled from an adapter with the extended capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Sample time.
    pub time: DateTime<Utc>,
    /// Error flags.
    pub error: StatusFlags,
}

impl StatusSnapshot {
    /// Create a snapshot stamped with the current time.
    pub fn now(error: StatusFlags) -> Self {
        Self {
            time: Utc::now(),
            error,
        }
    }
}

/// Outcome of classifying one status snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultReport {
    /// One warning per set flag.
    pub alarms: Vec<AlarmEvent>,
    /// Flags that count towards the aggregate bus error.
    pub bus_error_flags: StatusFlags,
}

impl FaultReport {
    /// Whether the aggregate condition is a bus error.
    #[inline]
    pub fn is_bus_error(&self) -> bool {
        !self.bus_error_flags.is_empty()
    }

    /// Turn the aggregate condition into a result.
    pub fn into_result(self) -> Result<()> {
        if self.is_bus_error() {
            Err(RouterError::BusError(self.bus_error_flags))
        } else {
            Ok(())
        }
    }
}

/// Classify a snapshot. Pure; emits nothing.
pub fn classify(snapshot: &StatusSnapshot) -> FaultReport {
    let mut report = FaultReport::default();

    for (flag, code, _) in StatusFlags::KNOWN {
        if !snapshot.error.contains(flag) {
            continue;
        }
        report.alarms.push(AlarmEvent::warning(code, snapshot.time));
        if code.is_bus_error() {
            report.bus_error_flags.insert(flag);
        }
    }

    report
}

/// Classify a snapshot, publish every alarm, then fail if it is a bus error.
///
/// All alarms are emitted before the error is returned, so none is lost when
/// the session ends.
pub fn check_status(
    device: &str,
    snapshot: &StatusSnapshot,
    alarm_tx: &broadcast::Sender<AlarmEvent>,
) -> Result<()> {
    let report = classify(snapshot);

    for alarm in &report.alarms {
        crate::core::logging::log_alarm(device, alarm);
        // No subscribers is not an error
        let _ = alarm_tx.send(alarm.clone());
    }

    report.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(flags: StatusFlags) -> StatusSnapshot {
        StatusSnapshot::now(flags)
    }

    #[test]
    fn test_empty_status_is_clean() {
        let report = classify(&snapshot(StatusFlags::empty()));
        assert!(report.alarms.is_empty());
        assert!(!report.is_bus_error());
    }

    #[test]
    fn test_tx_queue_full_alone_is_not_bus_error() {
        let (tx, mut rx) = broadcast::channel(16);
        let result = check_status("vcan0", &snapshot(StatusFlags::TX_QUEUE_FULL), &tx);

        assert!(result.is_ok());
        let alarm = rx.try_recv().unwrap();
        assert_eq!(alarm.code, AlarmCode::TxQueueFull);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_bus_off_raises_after_alarm() {
        let (tx, mut rx) = broadcast::channel(16);
        let result = check_status("vcan0", &snapshot(StatusFlags::BUS_OFF), &tx);

        assert!(matches!(result, Err(RouterError::BusError(f)) if f == StatusFlags::BUS_OFF));
        assert_eq!(rx.try_recv().unwrap().code, AlarmCode::BusOff);
    }

    #[test]
    fn test_multiple_flags_emit_all_alarms_before_error() {
        let (tx, mut rx) = broadcast::channel(16);
        let flags = StatusFlags::TX_QUEUE_FULL
            | StatusFlags::OVERRUN
            | StatusFlags::RX_OVERFLOW
            | StatusFlags::TX_OVERFLOW;

        let result = check_status("vcan0", &snapshot(flags), &tx);

        let mut codes = Vec::new();
        while let Ok(alarm) = rx.try_recv() {
            codes.push(alarm.code);
        }
        assert_eq!(
            codes,
            vec![
                AlarmCode::TxQueueFull,
                AlarmCode::Overrun,
                AlarmCode::RxOverflow,
                AlarmCode::TxOverflow
            ]
        );
        match result {
            Err(RouterError::BusError(f)) => {
                assert!(!f.contains(StatusFlags::TX_QUEUE_FULL));
                assert!(f.contains(StatusFlags::OVERRUN));
                assert!(f.contains(StatusFlags::TX_OVERFLOW));
            }
            other => panic!("expected bus error, got {:?}", other),
        }
    }

    #[test]
    fn test_every_error_flag_is_bus_error() {
        for flag in [
            StatusFlags::OVERRUN,
            StatusFlags::BUS_ERROR,
            StatusFlags::BUS_OFF,
            StatusFlags::RX_OVERFLOW,
            StatusFlags::TX_OVERFLOW,
        ] {
            let report = classify(&snapshot(flag));
            assert_eq!(report.alarms.len(), 1);
            assert!(report.is_bus_error(), "{} should be a bus error", flag);
        }
    }

    #[test]
    fn test_unknown_bits_are_ignored() {
        let report = classify(&snapshot(StatusFlags::from_bits(0x100)));
        assert!(report.alarms.is_empty());
        assert!(!report.is_bus_error());
        assert_eq!(StatusFlags::from_bits(0x100).to_string(), "0x100");
    }

    #[test]
    fn test_alarms_work_without_subscribers() {
        let (tx, rx) = broadcast::channel::<AlarmEvent>(4);
        drop(rx);
        let result = check_status("vcan0", &snapshot(StatusFlags::BUS_ERROR), &tx);
        assert!(result.is_err());
    }
}
