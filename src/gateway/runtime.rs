//! Async lifecycle shell for a [`RouterTask`].
//!
//! Ticks the task on a fixed period, and early whenever the transport
//! signals that frames are waiting, until shutdown or a session-fatal error.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::core::error::{Result, TransportError};
use crate::core::traits::Readiness;

use super::task::RouterTask;

/// Wakes the runner when the transport has frames.
enum Wakeup {
    Notify(Arc<Notify>),
    #[cfg(unix)]
    Fd(tokio::io::unix::AsyncFd<std::os::unix::io::RawFd>),
    Never,
}

impl Wakeup {
    fn new(readiness: Option<Readiness>) -> Result<Self> {
        Ok(match readiness {
            Some(Readiness::Notify(notify)) => Self::Notify(notify),
            #[cfg(unix)]
            Some(Readiness::Fd(fd)) => Self::Fd(tokio::io::unix::AsyncFd::with_interest(
                fd,
                tokio::io::Interest::READABLE,
            )
            .map_err(TransportError::from)?),
            None => Self::Never,
        })
    }

    async fn wait(&self) {
        match self {
            Self::Notify(notify) => notify.notified().await,
            #[cfg(unix)]
            Self::Fd(fd) => match fd.readable().await {
                // The tick drains the socket; clearing lets the next frame re-arm.
                Ok(mut guard) => guard.clear_ready(),
                Err(_) => std::future::pending().await,
            },
            Self::Never => std::future::pending().await,
        }
    }
}

/// Drives a [`RouterTask`] from a tokio runtime.
#[derive(Debug)]
pub struct TaskRunner {
    task: RouterTask,
}

impl TaskRunner {
    /// Wrap a task. It is configured on [`run`](Self::run) if needed.
    pub fn new(task: RouterTask) -> Self {
        Self { task }
    }

    /// The wrapped task.
    pub fn task(&self) -> &RouterTask {
        &self.task
    }

    /// Mutable access to the wrapped task.
    pub fn task_mut(&mut self) -> &mut RouterTask {
        &mut self.task
    }

    /// Unwrap the task.
    pub fn into_task(self) -> RouterTask {
        self.task
    }

    /// Start the task and tick it until `shutdown` changes or a tick fails.
    ///
    /// The task is always stopped before returning, also when it fails to start. A tick error is returned
    /// as is; the task is then left in the exception state.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.task.state().can_configure() {
            self.task.configure()?;
        }
        if let Err(e) = self.task.start() {
            if let Err(close) = self.task.stop() {
                debug!(error = %close, "Failed to release transport after start error");
            }
            return Err(e);
        }

        let period = Duration::from_millis(self.task.config().tick_interval_ms);
        let result = {
            let wakeup = Wakeup::new(self.task.readiness())?;
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!(device = %self.task.config().device, "Shutdown requested");
                        break Ok(());
                    }
                    _ = ticker.tick() => {}
                    _ = wakeup.wait() => debug!("Transport readiness wake-up"),
                }

                if let Err(e) = self.task.update() {
                    break Err(e);
                }
            }
        };

        let stopped = self.task.stop();
        result.and(stopped)
    }
}
