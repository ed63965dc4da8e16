//! Background reclamation of stale counter records.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::clock::Clock;
use super::limiter::WindowLimiter;

/// Periodic task that removes records whose window ended long ago.
///
/// Sweeping only bounds memory: a stale record that has not been swept yet
/// is treated as a fresh window on its next use.
pub struct SweepTask {
    limiter: Arc<WindowLimiter>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl SweepTask {
    pub fn new(limiter: Arc<WindowLimiter>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            limiter,
            clock,
            interval,
        }
    }

    /// Run a single sweep now.
    pub fn run_once(&self) -> usize {
        let removed = self.limiter.sweep(self.clock.now());
        debug!(
            removed = removed,
            live = self.limiter.store().len(),
            "Swept stale rate limit counters"
        );
        removed
    }

    /// Spawn the sweep loop. It stops when `shutdown` is cancelled.
    pub fn start(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.interval, "Counter sweep task started");
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once();
                    }
                    _ = shutdown.cancelled() => {
                        info!("Counter sweep task received shutdown signal");
                        break;
                    }
                }
            }
            info!("Counter sweep task stopped");
        })
    }
}
