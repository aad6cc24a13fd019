//! In-process CAN bus.
//!
//! A virtual bus does not touch any hardware. Frames are injected by the
//! application (or a test) and drained by the router through the normal
//! [`CanTransport`] interface. Optional loopback echoes written frames back
//! into the receive queue; an opt-in write log records them for inspection.
//!
//! Handles are cheap clones sharing one bus, so the side that injects frames
//! keeps a handle while the router owns another.
//!
//! # Example
//!
//! ```rust,ignore
//! use canroute::transport::VirtualBus;
//!
//! let bus = VirtualBus::named("vcan0").with_extended_status();
//! bus.inject(CanMessage::new(0x100, &[0xDE, 0xAD])?);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tokio::sync::Notify;

use crate::core::error::TransportError;
use crate::core::message::CanMessage;
use crate::core::traits::{BaudRate, CanTransport, ExtendedStatus, Readiness};
use crate::monitor::fault::{StatusFlags, StatusSnapshot};

/// Process-wide registry of named virtual buses.
static REGISTRY: Lazy<DashMap<String, VirtualBus>> = Lazy::new(DashMap::new);

/// One receive slot.
#[derive(Debug, Clone)]
enum Pending {
    Frame(CanMessage),
    Timeout,
    Fault(String),
}

#[derive(Debug)]
struct Inner {
    pending: VecDeque<Pending>,
    written: Vec<CanMessage>,
    status: StatusFlags,
    bus_ok: bool,
    error_count: u64,
    baud_rate: Option<BaudRate>,
    read_timeout: Option<Duration>,
    open: bool,
    extended: bool,
    loopback: bool,
    log_writes: bool,
    fail_reset: bool,
    write_fault: Option<String>,
    resets: u32,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            written: Vec::new(),
            status: StatusFlags::empty(),
            bus_ok: true,
            error_count: 0,
            baud_rate: None,
            read_timeout: None,
            open: true,
            extended: false,
            loopback: false,
            log_writes: false,
            fail_reset: false,
            write_fault: None,
            resets: 0,
        }
    }
}

/// Shared handle to an in-process CAN bus.
#[derive(Debug, Clone)]
pub struct VirtualBus {
    name: Arc<str>,
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl VirtualBus {
    /// Create a standalone bus, not visible through the registry.
    pub fn new(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            inner: Arc::new(Mutex::new(Inner::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Get or create the registered bus called `name`.
    pub fn named(name: &str) -> Self {
        REGISTRY
            .entry(name.to_string())
            .or_insert_with(|| Self::new(name))
            .clone()
    }

    /// Remove a bus from the registry. Existing handles keep working.
    pub fn unregister(name: &str) -> bool {
        REGISTRY.remove(name).is_some()
    }

    /// Names of all registered buses.
    pub fn registered() -> Vec<String> {
        let mut names: Vec<String> = REGISTRY.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Enable the status/baud-rate capability.
    pub fn with_extended_status(self) -> Self {
        self.lock().extended = true;
        self
    }

    /// Echo written frames into the receive queue.
    pub fn with_loopback(self) -> Self {
        self.lock().loopback = true;
        self
    }

    /// Record written frames, see [`written`](Self::written).
    ///
    /// The log grows with every write until the bus is cleared.
    pub fn with_write_log(self) -> Self {
        self.lock().log_writes = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("virtual bus lock poisoned")
    }

    fn push(&self, pending: Pending) {
        self.lock().pending.push_back(pending);
        self.notify.notify_one();
    }

    /// Queue a frame for reading.
    pub fn inject(&self, msg: CanMessage) {
        self.push(Pending::Frame(msg));
    }

    /// Queue a slot whose read times out (partial frame on the wire).
    pub fn inject_timeout(&self) {
        self.push(Pending::Timeout);
    }

    /// Queue a slot whose read fails with a device error.
    pub fn inject_fault(&self, reason: impl Into<String>) {
        self.push(Pending::Fault(reason.into()));
    }

    /// Set the controller status flags returned by status snapshots.
    pub fn set_status(&self, flags: StatusFlags) {
        self.lock().status = flags;
    }

    /// Set the bus health query result.
    pub fn set_bus_ok(&self, ok: bool) {
        self.lock().bus_ok = ok;
    }

    /// Set the adapter error counter.
    pub fn set_error_count(&self, count: u64) {
        self.lock().error_count = count;
    }

    /// Make the next resets fail.
    pub fn set_fail_reset(&self, fail: bool) {
        self.lock().fail_reset = fail;
    }

    /// Make writes fail with a device error. `None` restores normal writes.
    pub fn set_write_fault(&self, reason: Option<String>) {
        self.lock().write_fault = reason;
    }

    /// Reopen a closed bus.
    pub fn open(&self) {
        self.lock().open = true;
    }

    /// Frames written since the last clear, oldest first. Empty unless the
    /// write log is enabled.
    pub fn written(&self) -> Vec<CanMessage> {
        self.lock().written.clone()
    }

    /// Number of receive slots queued.
    pub fn queued(&self) -> usize {
        self.lock().pending.len()
    }

    /// Configured baud rate.
    pub fn baud_rate(&self) -> Option<BaudRate> {
        self.lock().baud_rate
    }

    /// Configured read timeout.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.lock().read_timeout
    }

    /// Whether the bus is open.
    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Number of successful resets.
    pub fn reset_count(&self) -> u32 {
        self.lock().resets
    }
}

impl CanTransport for VirtualBus {
    fn device(&self) -> &str {
        &self.name
    }

    fn write(&mut self, msg: &CanMessage) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if !inner.open {
            return Err(TransportError::Closed);
        }
        if let Some(reason) = &inner.write_fault {
            return Err(TransportError::Device(reason.clone()));
        }
        if inner.log_writes {
            inner.written.push(*msg);
        }
        if inner.loopback {
            inner.pending.push_back(Pending::Frame(*msg));
            drop(inner);
            self.notify.notify_one();
        }
        Ok(())
    }

    fn read(&mut self) -> Result<CanMessage, TransportError> {
        let mut inner = self.lock();
        if !inner.open {
            return Err(TransportError::Closed);
        }
        match inner.pending.pop_front() {
            Some(Pending::Frame(msg)) => Ok(msg),
            Some(Pending::Timeout) => Err(TransportError::Timeout("partial frame".into())),
            Some(Pending::Fault(reason)) => Err(TransportError::Device(reason)),
            None => Err(TransportError::Timeout("no frame pending".into())),
        }
    }

    fn pending_messages(&mut self) -> usize {
        let inner = self.lock();
        if inner.open {
            inner.pending.len()
        } else {
            0
        }
    }

    fn check_bus_ok(&mut self) -> bool {
        self.lock().bus_ok
    }

    fn error_count(&mut self) -> u64 {
        self.lock().error_count
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.lock().read_timeout = Some(timeout);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if !inner.open {
            return Err(TransportError::Closed);
        }
        if inner.fail_reset {
            return Err(TransportError::Device("controller did not come back".into()));
        }
        inner.status = StatusFlags::empty();
        inner.bus_ok = true;
        inner.resets += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner.pending.clear();
        inner.written.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.lock().open = false;
        Ok(())
    }

    fn readiness(&self) -> Option<Readiness> {
        Some(Readiness::Notify(Arc::clone(&self.notify)))
    }

    fn extended_status(&mut self) -> Option<&mut dyn ExtendedStatus> {
        if self.lock().extended {
            Some(self)
        } else {
            None
        }
    }
}

impl ExtendedStatus for VirtualBus {
    fn status(&mut self) -> Result<StatusSnapshot, TransportError> {
        let inner = self.lock();
        if !inner.open {
            return Err(TransportError::Closed);
        }
        Ok(StatusSnapshot::now(inner.status))
    }

    fn set_baud_rate(&mut self, rate: BaudRate) -> Result<(), TransportError> {
        self.lock().baud_rate = Some(rate);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: u32) -> CanMessage {
        CanMessage::new(id, &[id as u8]).unwrap()
    }

    #[test]
    fn test_inject_and_read() {
        let bus = VirtualBus::new("vcan0");
        let mut transport = bus.clone();

        bus.inject(msg(0x10));
        bus.inject_timeout();
        bus.inject_fault("wire cut");
        assert_eq!(transport.pending_messages(), 3);

        assert_eq!(transport.read().unwrap(), msg(0x10));
        assert!(transport.read().unwrap_err().is_recoverable());
        assert!(matches!(
            transport.read(),
            Err(TransportError::Device(reason)) if reason == "wire cut"
        ));
        assert_eq!(transport.pending_messages(), 0);
        assert!(transport.read().unwrap_err().is_recoverable());
    }

    #[test]
    fn test_write_and_loopback() {
        let mut plain = VirtualBus::new("plain").with_write_log();
        plain.write(&msg(0x20)).unwrap();
        assert_eq!(plain.written(), vec![msg(0x20)]);
        assert_eq!(plain.pending_messages(), 0);

        let mut looped = VirtualBus::new("looped").with_loopback();
        looped.write(&msg(0x30)).unwrap();
        assert_eq!(looped.pending_messages(), 1);
        assert_eq!(looped.read().unwrap(), msg(0x30));
    }

    #[test]
    fn test_write_log_is_opt_in() {
        let mut bus = VirtualBus::new("quiet");
        for id in 0..5000 {
            bus.write(&msg(id)).unwrap();
        }
        assert!(bus.written().is_empty());

        let mut logged = VirtualBus::new("logged").with_write_log();
        logged.write(&msg(1)).unwrap();
        logged.write(&msg(2)).unwrap();
        assert_eq!(logged.written().len(), 2);
        logged.clear().unwrap();
        assert!(logged.written().is_empty());
    }

    #[test]
    fn test_write_fault() {
        let mut bus = VirtualBus::new("vcan0");
        bus.set_write_fault(Some("arbitration lost".into()));
        assert!(matches!(bus.write(&msg(1)), Err(TransportError::Device(_))));
        bus.set_write_fault(None);
        assert!(bus.write(&msg(1)).is_ok());
    }

    #[test]
    fn test_close_and_reopen() {
        let bus = VirtualBus::new("vcan0");
        let mut transport = bus.clone();
        bus.inject(msg(1));

        transport.close().unwrap();
        assert!(!bus.is_open());
        assert_eq!(transport.pending_messages(), 0);
        assert!(matches!(transport.read(), Err(TransportError::Closed)));
        assert!(matches!(transport.write(&msg(2)), Err(TransportError::Closed)));

        bus.open();
        assert_eq!(transport.pending_messages(), 1);
    }

    #[test]
    fn test_reset_and_clear() {
        let bus = VirtualBus::new("vcan0").with_extended_status();
        let mut transport = bus.clone();
        bus.inject(msg(1));
        bus.set_status(StatusFlags::BUS_OFF);
        bus.set_bus_ok(false);

        transport.reset().unwrap();
        transport.clear().unwrap();
        assert_eq!(bus.reset_count(), 1);
        assert_eq!(bus.queued(), 0);
        assert!(transport.check_bus_ok());
        let status = transport.extended_status().unwrap().status().unwrap();
        assert!(status.error.is_empty());

        bus.set_fail_reset(true);
        assert!(transport.reset().is_err());
        assert_eq!(bus.reset_count(), 1);
    }

    #[test]
    fn test_extended_status_capability() {
        let mut plain = VirtualBus::new("plain");
        assert!(plain.extended_status().is_none());

        let bus = VirtualBus::new("ext").with_extended_status();
        let mut transport = bus.clone();
        let ext = transport.extended_status().unwrap();
        ext.set_baud_rate(BaudRate::new(250_000).unwrap()).unwrap();
        bus.set_status(StatusFlags::OVERRUN);
        let snapshot = ext.status().unwrap();

        assert_eq!(snapshot.error, StatusFlags::OVERRUN);
        assert_eq!(bus.baud_rate().unwrap().bits_per_second(), 250_000);
    }

    #[test]
    fn test_registry_shares_bus() {
        let a = VirtualBus::named("registry-test");
        let mut b = VirtualBus::named("registry-test");
        a.inject(msg(7));
        assert_eq!(b.read().unwrap(), msg(7));
        assert!(VirtualBus::registered().contains(&"registry-test".to_string()));
        assert!(VirtualBus::unregister("registry-test"));
        assert!(!VirtualBus::unregister("registry-test"));
    }

    #[tokio::test]
    async fn test_inject_wakes_readiness() {
        let bus = VirtualBus::new("vcan0");
        let notify = match bus.readiness() {
            Some(Readiness::Notify(notify)) => notify,
            other => panic!("unexpected readiness: {:?}", other),
        };

        let waiter = tokio::spawn(async move { notify.notified().await });
        tokio::task::yield_now().await;
        bus.inject(msg(1));
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
