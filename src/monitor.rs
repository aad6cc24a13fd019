//! Bus-health monitoring.
//!
//! - [`stats`]: traffic counters and the bus-check/statistics timers
//! - [`fault`]: controller status flags and alarm classification

pub mod fault;
pub mod stats;

pub use fault::{check_status, classify, FaultReport, StatusFlags, StatusSnapshot};
pub use stats::{HealthMonitor, IntervalTimer, Statistics};
