//! Recycler: enforces the maximum kernel lifetime.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{self, Duration, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::KernelError;
use crate::orchestrator::KernelOrchestrator;

/// Ticks immediately, then every `period`. A stalled sweep delays the next
/// one instead of triggering a burst of catch-up sweeps.
fn sweep_ticker(period: Duration) -> Interval {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Periodically removes kernels older than the configured lifetime.
pub struct Recycler {
    orchestrator: Arc<KernelOrchestrator>,
    sweep_interval: Duration,
}

impl Recycler {
    pub fn new(orchestrator: Arc<KernelOrchestrator>) -> Self {
        Self {
            orchestrator,
            sweep_interval: Duration::from_secs(300),
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sweep now and then every interval until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            "Kernel recycler started (sweep interval: {:?})",
            self.sweep_interval
        );

        let mut interval = sweep_ticker(self.sweep_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        error!("Kernel recycler sweep failed: {}", e);
                    }
                }
                _ = cancel.cancelled() => {
                    info!("Kernel recycler shutting down");
                    break;
                }
            }
        }
    }

    /// Recycle every kernel created more than the maximum lifetime before
    /// `now`. One failing kernel does not stop the sweep.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, KernelError> {
        let cutoff = now - self.orchestrator.settings().max_lifetime;
        let expired = self
            .orchestrator
            .store()
            .kernels_created_before(cutoff)
            .await?;
        debug!("Recycler found {} expired kernels", expired.len());

        let mut recycled = 0;
        for record in &expired {
            match self.orchestrator.recycle(record).await {
                Ok(true) => recycled += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to recycle kernel {}: {}", record.key(), e),
            }
        }
        if recycled > 0 {
            info!("Recycled {} expired kernels", recycled);
        }
        Ok(recycled)
    }
}

#[cfg(test)]
#[path = "recycler_tests.rs"]
mod tests;
