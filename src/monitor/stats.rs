//! Traffic statistics and the periodic health monitor.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::core::error::{Result, RouterError};
use crate::core::message::CanMessage;
use crate::core::traits::CanTransport;

/// Traffic counters for one session.
///
/// Counters only grow within a session and are zeroed at start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    /// Time of the last emission.
    pub time: Option<DateTime<Utc>>,
    /// Messages sent.
    pub msg_tx: u64,
    /// Messages received.
    pub msg_rx: u64,
    /// Bytes sent (header + payload).
    pub tx: u64,
    /// Bytes received (header + payload).
    pub rx: u64,
    /// Adapter error count at the last emission.
    pub error_count: u64,
}

impl Statistics {
    /// Account for a message handed to the transport.
    #[inline]
    pub fn record_tx(&mut self, msg: &CanMessage) {
        self.msg_tx += 1;
        self.tx += msg.accounted_bytes();
    }

    /// Account for a message read from the transport.
    #[inline]
    pub fn record_rx(&mut self, msg: &CanMessage) {
        self.msg_rx += 1;
        self.rx += msg.accounted_bytes();
    }

    /// Zero all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Wall-clock timer that fires once the interval has elapsed.
///
/// Re-armed to the firing time, not advanced by a fixed step, so scheduling
/// jitter never accumulates.
#[derive(Debug, Clone)]
pub struct IntervalTimer {
    interval: Duration,
    last_fired: Option<DateTime<Utc>>,
}

impl IntervalTimer {
    /// Create a timer that fires on its first poll.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fired: None,
        }
    }

    /// Create a timer from a millisecond interval.
    pub fn from_millis(interval_ms: u64) -> Result<Self> {
        let interval = i64::try_from(interval_ms)
            .ok()
            .and_then(Duration::try_milliseconds)
            .ok_or_else(|| RouterError::config(format!("interval of {} ms is out of range", interval_ms)))?;
        Ok(Self::new(interval))
    }

    /// Forget the last firing time.
    pub fn reset(&mut self) {
        self.last_fired = None;
    }

    /// Fire if the interval has elapsed, re-arming to `now`.
    pub fn poll(&mut self, now: DateTime<Utc>) -> bool {
        let due = match self.last_fired {
            None => true,
            Some(last) => now.signed_duration_since(last) > self.interval,
        };
        if due {
            self.last_fired = Some(now);
        }
        due
    }

    /// Last firing time.
    pub fn last_fired(&self) -> Option<DateTime<Utc>> {
        self.last_fired
    }
}

/// Bus-check and statistics timers sharing the dispatch tick.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    bus_check: IntervalTimer,
    stats: IntervalTimer,
}

impl HealthMonitor {
    /// Create a monitor with the given intervals in milliseconds.
    pub fn new(check_bus_ok_interval_ms: u64, stats_interval_ms: u64) -> Result<Self> {
        Ok(Self {
            bus_check: IntervalTimer::from_millis(check_bus_ok_interval_ms)?,
            stats: IntervalTimer::from_millis(stats_interval_ms)?,
        })
    }

    /// Reset both timers.
    pub fn reset(&mut self) {
        self.bus_check.reset();
        self.stats.reset();
    }

    /// Run the bus check and statistics emission if their timers are due.
    ///
    /// A negative bus check fails with [`RouterError::BusCheckFailed`]; the
    /// statistics timer is not polled in that case.
    pub fn poll(
        &mut self,
        now: DateTime<Utc>,
        transport: &mut dyn CanTransport,
        stats: &mut Statistics,
        stats_tx: &broadcast::Sender<Statistics>,
    ) -> Result<()> {
        if self.bus_check.poll(now) && !transport.check_bus_ok() {
            error!(device = %transport.device(), "CAN bus reported error");
            return Err(RouterError::BusCheckFailed);
        }

        if self.stats.poll(now) {
            stats.time = Some(now);
            stats.error_count = transport.error_count();
            debug!(
                device = %transport.device(),
                msg_tx = stats.msg_tx,
                msg_rx = stats.msg_rx,
                error_count = stats.error_count,
                "Statistics emitted"
            );
            let _ = stats_tx.send(stats.clone());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::virtual_bus::VirtualBus;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000 + ms).unwrap()
    }

    #[test]
    fn test_statistics_accounting() {
        let mut stats = Statistics::default();
        stats.record_tx(&CanMessage::new(0x10, &[1, 2, 3]).unwrap());
        stats.record_rx(&CanMessage::new(0x20, &[]).unwrap());
        stats.record_rx(&CanMessage::new(0x20, &[0; 8]).unwrap());

        assert_eq!(stats.msg_tx, 1);
        assert_eq!(stats.tx, 11);
        assert_eq!(stats.msg_rx, 2);
        assert_eq!(stats.rx, 8 + 16);

        stats.reset();
        assert_eq!(stats, Statistics::default());
    }

    #[test]
    fn test_timer_fires_first_then_after_interval() {
        let mut timer = IntervalTimer::from_millis(100).unwrap();
        assert!(timer.poll(at(0)));
        assert!(!timer.poll(at(50)));
        // Strictly greater than the interval
        assert!(!timer.poll(at(100)));
        assert!(timer.poll(at(101)));
        assert_eq!(timer.last_fired(), Some(at(101)));
    }

    #[test]
    fn test_timer_rearms_to_now() {
        let mut timer = IntervalTimer::from_millis(100).unwrap();
        assert!(timer.poll(at(0)));
        // Late tick: re-armed to 350, not to 100
        assert!(timer.poll(at(350)));
        assert!(!timer.poll(at(420)));
        assert!(timer.poll(at(451)));
    }

    #[test]
    fn test_timer_reset() {
        let mut timer = IntervalTimer::from_millis(1000).unwrap();
        assert!(timer.poll(at(0)));
        timer.reset();
        assert!(timer.poll(at(1)));
    }

    #[test]
    fn test_timer_rejects_huge_interval() {
        assert!(IntervalTimer::from_millis(1 << 63).is_err());
        assert!(IntervalTimer::from_millis(u64::MAX).is_err());
        assert!(HealthMonitor::new(1000, 1 << 63).is_err());
    }

    #[test]
    fn test_stats_emitted_without_traffic() {
        let bus = VirtualBus::new("vcan0");
        let mut transport = bus.clone();
        bus.set_error_count(7);

        let (stats_tx, mut stats_rx) = broadcast::channel(8);
        let mut monitor = HealthMonitor::new(1000, 100).unwrap();
        let mut stats = Statistics::default();

        monitor
            .poll(at(0), &mut transport, &mut stats, &stats_tx)
            .unwrap();
        let emitted = stats_rx.try_recv().unwrap();
        assert_eq!(emitted.error_count, 7);
        assert_eq!(emitted.time, Some(at(0)));
        assert_eq!(emitted.msg_rx, 0);

        monitor
            .poll(at(50), &mut transport, &mut stats, &stats_tx)
            .unwrap();
        assert!(stats_rx.try_recv().is_err());

        monitor
            .poll(at(150), &mut transport, &mut stats, &stats_tx)
            .unwrap();
        assert_eq!(stats_rx.try_recv().unwrap().time, Some(at(150)));
    }

    #[test]
    fn test_bus_check_failure() {
        let bus = VirtualBus::new("vcan0");
        let mut transport = bus.clone();
        let (stats_tx, mut stats_rx) = broadcast::channel(8);
        let mut monitor = HealthMonitor::new(100, 100).unwrap();
        let mut stats = Statistics::default();

        monitor
            .poll(at(0), &mut transport, &mut stats, &stats_tx)
            .unwrap();
        assert!(stats_rx.try_recv().is_ok());

        bus.set_bus_ok(false);
        // Not due yet: the bad bus goes unnoticed
        monitor
            .poll(at(50), &mut transport, &mut stats, &stats_tx)
            .unwrap();

        let result = monitor.poll(at(200), &mut transport, &mut stats, &stats_tx);
        assert!(matches!(result, Err(RouterError::BusCheckFailed)));
        assert!(stats_rx.try_recv().is_err());
    }
}
