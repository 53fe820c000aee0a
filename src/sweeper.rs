//! Background periodic passes: lease expiry, retention purges and
//! registration reaping.
//!
//! Registration expiry is evaluated lazily on every read, so the reaping
//! sweep only persists `Expired`. Lapsed leases are different: a lapsed
//! lease already refuses ack and nack, but its message stays in flight
//! until the coordinator sweep requeues or dead-letters it and feeds the
//! failure back into the circuit breaker. Without that sweep, such messages
//! are never redelivered.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Shortest interval a sweeper will run at.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// A pass that should run periodically.
#[async_trait]
pub trait PeriodicSweep: Send + Sync + 'static {
    /// Error reported by a failed pass.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Stable name used in logs.
    fn name(&self) -> &'static str;

    /// Runs one pass and returns how many records it changed.
    async fn sweep(&self) -> Result<usize, Self::Error>;
}

/// Handle to a spawned periodic sweep.
#[derive(Debug)]
pub struct BackgroundSweeper {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundSweeper {
    /// Spawns `task` on the current runtime, running a pass immediately and
    /// then every `interval` until `cancel` fires.
    ///
    /// A failed pass is logged and the loop carries on. Intervals shorter
    /// than [`MIN_SWEEP_INTERVAL`] are raised to it.
    #[must_use]
    pub fn spawn<T: PeriodicSweep>(
        task: Arc<T>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let name = task.name();
        let period = interval.max(MIN_SWEEP_INTERVAL);
        let stop = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(sweep = name, interval_ms = millis(period), "sweeper started");
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    _ = ticker.tick() => run_pass(task.as_ref()).await,
                }
            }
            tracing::info!(sweep = name, "sweeper stopped");
        });
        Self {
            name,
            cancel,
            handle,
        }
    }

    /// Returns the name of the sweep.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` once the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the loop and waits for the in-progress pass, if any, to end.
    ///
    /// # Errors
    ///
    /// Returns the [`JoinError`] when the loop panicked.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.cancel.cancel();
        self.handle.await
    }
}

async fn run_pass<T: PeriodicSweep>(task: &T) {
    match task.sweep().await {
        Ok(0) => tracing::trace!(sweep = task.name(), "sweep found nothing to do"),
        Ok(changed) => tracing::debug!(sweep = task.name(), changed, "sweep pass complete"),
        Err(err) => tracing::warn!(sweep = task.name(), error = %err, "sweep pass failed"),
    }
}

fn millis(period: Duration) -> u64 {
    u64::try_from(period.as_millis()).unwrap_or(u64::MAX)
}
