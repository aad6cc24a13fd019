//! The router task: lifecycle, subscriptions and the per-tick dispatch.
//!
//! # Lifecycle
//!
//! ```text
//!                configure            start
//! PreOperational ─────────► Stopped ─────────► Running
//!       ▲                      ▲                  │
//!       │         stop         │                  │ tick error
//!       └──────────────────────┴──────────────────┤
//!                                                 ▼
//!                     configure ◄─────────── Exception
//! ```
//!
//! # Tick
//!
//! 1. Drain the inbound write queue into the transport.
//! 2. Snapshot the pending count and perform exactly that many reads,
//!    routing every message read.
//! 3. Run the bus check and statistics timers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::core::error::{Result, RouterError};
use crate::core::logging::AlarmEvent;
use crate::core::message::CanMessage;
use crate::core::traits::{CanTransport, ReadOutcome, Readiness, TaskState};
use crate::monitor::fault::{check_status, StatusSnapshot};
use crate::monitor::stats::{HealthMonitor, Statistics};
use crate::routing::{MessageReceiver, Router};

use super::config::RouterConfig;
use super::factory::open_device;

/// Endpoint names owned by the task itself.
pub const RESERVED_NAMES: [&str; 6] = ["in", "stats", "can_status", "log_message", "watch", "unwatch"];

/// A CAN router bound to one transport.
pub struct RouterTask {
    config: RouterConfig,
    state: TaskState,
    transport: Option<Box<dyn CanTransport>>,
    router: Router,
    stats: Statistics,
    monitor: HealthMonitor,
    write_tx: mpsc::Sender<CanMessage>,
    write_rx: mpsc::Receiver<CanMessage>,
    stats_tx: broadcast::Sender<Statistics>,
    status_tx: broadcast::Sender<StatusSnapshot>,
    alarm_tx: broadcast::Sender<AlarmEvent>,
}

impl RouterTask {
    /// Create an unconfigured task.
    pub fn new(config: RouterConfig) -> Result<Self> {
        config.validate()?;

        let buffer_size = config.output_buffer_size;
        let (write_tx, write_rx) = mpsc::channel(config.write_queue_size);
        let (stats_tx, _) = broadcast::channel(buffer_size);
        let (status_tx, _) = broadcast::channel(buffer_size);
        let (alarm_tx, _) = broadcast::channel(buffer_size);

        Ok(Self {
            router: Router::new(buffer_size),
            monitor: HealthMonitor::new(config.check_bus_ok_interval_ms, config.stats_interval_ms)?,
            config,
            state: TaskState::PreOperational,
            transport: None,
            stats: Statistics::default(),
            write_tx,
            write_rx,
            stats_tx,
            status_tx,
            alarm_tx,
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Open the configured device and prepare it.
    pub fn configure(&mut self) -> Result<()> {
        self.ensure_configurable()?;
        let transport = open_device(&self.config)?;
        self.configure_with(transport)
    }

    /// Prepare an already opened transport.
    ///
    /// Sets a zero read timeout and applies the configured baud rate when the
    /// transport supports it.
    pub fn configure_with(&mut self, mut transport: Box<dyn CanTransport>) -> Result<()> {
        self.ensure_configurable()?;

        if let Some(mut previous) = self.transport.take() {
            if let Err(e) = previous.close() {
                warn!(device = %previous.device(), error = %e, "Failed to close previous transport");
            }
        }

        transport
            .set_read_timeout(Duration::ZERO)
            .map_err(|e| RouterError::Connection(format!("{}: {}", transport.device(), e)))?;

        if let Some(rate) = self.config.baud_rate {
            let device = transport.device().to_string();
            match transport.extended_status() {
                Some(ext) => {
                    ext.set_baud_rate(rate)
                        .map_err(|e| RouterError::Connection(format!("{}: {}", device, e)))?;
                    info!(device = %device, baud_rate = rate.bits_per_second(), "Baud rate set");
                }
                None => warn!(
                    device = %device,
                    baud_rate = rate.bits_per_second(),
                    "Transport cannot set baud rate, ignoring"
                ),
            }
        }

        info!(device = %transport.device(), "CAN router configured");
        self.transport = Some(transport);
        self.state = TaskState::Stopped;
        Ok(())
    }

    /// Reset the transport and begin a new session.
    ///
    /// Clears buffered frames, invalidates the routing cache and zeroes the
    /// statistics and timers.
    pub fn start(&mut self) -> Result<()> {
        if self.state != TaskState::Stopped {
            return Err(RouterError::invalid_state(format!(
                "cannot start from {}",
                self.state
            )));
        }
        let transport = self
            .transport
            .as_deref_mut()
            .ok_or_else(|| RouterError::invalid_state("no transport"))?;

        transport.reset().map_err(|e| {
            RouterError::Connection(format!("failed to reset {}: {}", transport.device(), e))
        })?;
        transport.clear().map_err(|e| {
            RouterError::Connection(format!("failed to clear {}: {}", transport.device(), e))
        })?;

        self.router.invalidate();
        self.stats.reset();
        self.monitor.reset();
        self.state = TaskState::Running;

        info!(device = %self.config.device, "CAN router started");
        Ok(())
    }

    /// Run one tick at the current wall-clock time.
    pub fn update(&mut self) -> Result<()> {
        self.update_at(Utc::now())
    }

    /// Run one tick as if the wall clock read `now`.
    ///
    /// Any error ends the session and moves the task to
    /// [`TaskState::Exception`].
    pub fn update_at(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.state.is_running() {
            return Err(RouterError::invalid_state(format!(
                "cannot update from {}",
                self.state
            )));
        }

        let result = self.tick(now);
        if let Err(e) = &result {
            error!(device = %self.config.device, error = %e, "CAN router entering exception state");
            self.state = TaskState::Exception;
        }
        result
    }

    /// Close and release the transport.
    ///
    /// The task returns to [`TaskState::PreOperational`] unless it is in
    /// [`TaskState::Exception`], which is kept.
    pub fn stop(&mut self) -> Result<()> {
        let closed = match self.transport.take() {
            Some(mut transport) => transport.close(),
            None => Ok(()),
        };

        if self.state != TaskState::Exception {
            self.state = TaskState::PreOperational;
        }
        info!(device = %self.config.device, state = %self.state, "CAN router stopped");

        closed.map_err(RouterError::from)
    }

    fn ensure_configurable(&self) -> Result<()> {
        if self.state.can_configure() {
            Ok(())
        } else {
            Err(RouterError::invalid_state(format!(
                "cannot configure from {}",
                self.state
            )))
        }
    }

    fn tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        let Self {
            config,
            transport,
            router,
            stats,
            monitor,
            write_rx,
            stats_tx,
            status_tx,
            alarm_tx,
            ..
        } = self;
        let transport = transport
            .as_deref_mut()
            .ok_or_else(|| RouterError::invalid_state("no transport"))?;

        while let Ok(msg) = write_rx.try_recv() {
            stats.record_tx(&msg);
            transport.write(&msg)?;
        }

        let pending = transport.pending_messages();
        for slot in 0..pending {
            let msg = match ReadOutcome::from(transport.read()) {
                ReadOutcome::Message(msg) => msg,
                ReadOutcome::Recoverable(e) => {
                    debug!(device = %config.device, slot, error = %e, "Skipping unreadable frame");
                    continue;
                }
                ReadOutcome::Fatal(e) => {
                    error!(device = %config.device, slot, error = %e, "CAN read failed");
                    return Err(e.into());
                }
            };

            stats.record_rx(&msg);
            router.route(&msg);

            if let Some(ext) = transport.extended_status() {
                let snapshot = ext.status()?;
                let _ = status_tx.send(snapshot);
                check_status(&config.device, &snapshot, alarm_tx)?;
            }
        }

        monitor.poll(now, transport, stats, stats_tx)
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Route identifiers matching `id`/`mask` to a new output channel `name`.
    ///
    /// Rejected while running, and for names already in use or reserved.
    pub fn watch(&mut self, name: &str, id: u32, mask: u32) -> bool {
        if self.state.is_running() {
            warn!(name = %name, "Cannot add a watch while running");
            return false;
        }
        if RESERVED_NAMES.contains(&name) {
            warn!(name = %name, "Watch name is reserved");
            return false;
        }
        if !self.router.watch(name, id, mask) {
            warn!(name = %name, "Watch name already in use");
            return false;
        }
        true
    }

    /// Remove the output channel `name`. Allowed while running.
    pub fn unwatch(&mut self, name: &str) -> bool {
        if !self.router.unwatch(name) {
            warn!(name = %name, "No such watch");
            return false;
        }
        true
    }

    // ------------------------------------------------------------------
    // Channels and accessors
    // ------------------------------------------------------------------

    /// Producer handle for the inbound write queue.
    pub fn writer(&self) -> mpsc::Sender<CanMessage> {
        self.write_tx.clone()
    }

    /// Attach a consumer to the output channel `name`.
    pub fn subscribe(&self, name: &str) -> Option<MessageReceiver> {
        self.router.subscribe(name)
    }

    /// Attach a consumer to the statistics channel.
    pub fn subscribe_stats(&self) -> broadcast::Receiver<Statistics> {
        self.stats_tx.subscribe()
    }

    /// Attach a consumer to the status channel.
    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    /// Attach a consumer to the alarm channel.
    pub fn subscribe_alarms(&self) -> broadcast::Receiver<AlarmEvent> {
        self.alarm_tx.subscribe()
    }

    /// Current statistics.
    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Task configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// The routing engine.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// All endpoint names: reserved ones first, then watches in order.
    pub fn endpoints(&self) -> Vec<String> {
        RESERVED_NAMES
            .iter()
            .map(|s| s.to_string())
            .chain(self.router.table().iter().map(|s| s.name().to_string()))
            .collect()
    }

    /// Readiness source of the current transport.
    pub fn readiness(&self) -> Option<Readiness> {
        self.transport.as_ref().and_then(|t| t.readiness())
    }
}

impl std::fmt::Debug for RouterTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterTask")
            .field("device", &self.config.device)
            .field("state", &self.state)
            .field("watches", &self.router.table().len())
            .field("stats", &self.stats)
            .finish()
    }
}
