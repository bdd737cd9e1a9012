//! Drives polling cycles until cancelled.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::Result;
use crate::ingest::Ingestor;

/// Runs one cycle, waits, runs the next.
pub struct Poller {
    ingestor: Ingestor,
    interval: Duration,
}

impl Poller {
    pub fn new(ingestor: Ingestor, interval: Duration) -> Self {
        Self { ingestor, interval }
    }

    /// Poll until `token` is cancelled.
    ///
    /// A failed cycle ends the loop with its error. Cancellation, whether
    /// during a cycle or while waiting, returns `Ok(())`.
    pub async fn run(&self, token: &CancellationToken) -> Result<()> {
        info!(interval_secs = self.interval.as_secs(), "Poller started");
        while !token.is_cancelled() {
            match self.ingestor.run_cycle(token).await {
                Ok(report) => info!(
                    total = report.total,
                    filed = report.filed,
                    rejected = report.rejected(),
                    notify_failed = report.rejected_notify_failed,
                    expunged = report.expunged,
                    "Cycle finished"
                ),
                Err(e) if e.is_cancelled() => break,
                Err(e) => return Err(e),
            }

            debug!(secs = self.interval.as_secs(), "Waiting for next cycle");
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("Poller stopped");
        Ok(())
    }
}
