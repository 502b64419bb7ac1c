//! Scan loop
//!
//! Runs scan cycles on a fixed interval until shutdown. Each tick waits for
//! the previous cycle to finish, so cycles never overlap.

use super::ScanCoordinator;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct ScanLoop {
    coordinator: ScanCoordinator,
    interval: Duration,
}

impl ScanLoop {
    pub fn new(coordinator: ScanCoordinator, interval: Duration) -> Self {
        Self {
            coordinator,
            interval: interval.max(Duration::from_secs(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run until a shutdown signal is received
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_secs = self.interval.as_secs(), "Starting scan loop");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.coordinator.run_cycle().await;
                    cycles += 1;

                    if let Some(error) = &report.error {
                        warn!(cycle = cycles, error = %error, "Scan cycle aborted");
                    } else if report.duration_ms > self.interval.as_millis() as u64 {
                        warn!(
                            cycle = cycles,
                            elapsed_ms = report.duration_ms,
                            interval_ms = self.interval.as_millis() as u64,
                            "Scan cycle overran the interval"
                        );
                    } else {
                        debug!(cycle = cycles, elapsed_ms = report.duration_ms, "Scan cycle finished");
                    }
                }
                _ = shutdown.recv() => {
                    info!(cycles = cycles, "Shutting down scan loop");
                    break;
                }
            }
        }
    }
}
