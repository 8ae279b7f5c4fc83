//! Timeout Monitor
//!
//! Background task that periodically forces stalled transactions to a decision.
//! The coordinator and every participant run one each.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Something with a table of in-flight transactions that can expire
#[async_trait]
pub trait TimeoutSweep: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Abort everything that is overdue at `now`; returns how many were aborted
    async fn sweep_expired(&self, now: Instant) -> usize;
}

/// Periodic driver for a [`TimeoutSweep`]
pub struct TimeoutMonitor {
    target: Arc<dyn TimeoutSweep>,
    interval: Duration,
}

impl TimeoutMonitor {
    pub fn new(target: Arc<dyn TimeoutSweep>, interval: Duration) -> Self {
        Self { target, interval }
    }

    /// Run the monitor loop
    ///
    /// This method runs forever, sweeping once per interval.
    pub async fn run(&self) -> ! {
        info!(
            node = self.target.name(),
            interval_ms = self.interval.as_millis() as u64,
            "Starting timeout monitor"
        );

        loop {
            tokio::time::sleep(self.interval).await;
            self.sweep_once().await;
        }
    }

    /// Run a single sweep now
    pub async fn sweep_once(&self) -> usize {
        let aborted = self.target.sweep_expired(Instant::now()).await;
        if aborted > 0 {
            info!(
                node = self.target.name(),
                count = aborted,
                "Timed-out transactions aborted"
            );
        } else {
            debug!(node = self.target.name(), "No timed-out transactions");
        }
        aborted
    }

    /// Spawn the loop on the current runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }
}
