use crate::error::Result;
use crate::retention::RetentionManager;
use crate::types::{RetentionReport, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Periodic background retention task
pub struct RetentionScheduler {
    manager: Arc<RetentionManager>,
    interval: Duration,
}

impl RetentionScheduler {
    /// Create a new retention scheduler
    pub fn new(manager: Arc<RetentionManager>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Run passes on every tick until `cancel` fires.
    ///
    /// The first pass runs immediately. A failed pass is logged and retried
    /// on the next tick; a cancelled pass stops after its current chunk.
    pub async fn run(self, cancel: CancellationToken) {
        info!("Starting retention scheduler (interval: {:?})", self.interval);

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Retention scheduler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match self
                        .manager
                        .run_retention_pass_until(Timestamp::now(), &cancel)
                        .await
                    {
                        Ok(report) => {
                            info!("Scheduled retention {}", outcome(&report));
                        }
                        Err(e) => {
                            error!("Scheduled retention failed: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// Run retention once (for testing or manual execution)
    pub async fn run_once(&self, now: Timestamp) -> Result<RetentionReport> {
        info!("Running one-time retention pass");
        self.manager.run_retention_pass(now).await
    }

    /// Run the scheduler on its own task
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

fn outcome(report: &RetentionReport) -> String {
    let state = if report.completed { "completed" } else { "cancelled" };
    format!(
        "{}: {} points, {} snapshots deleted",
        state, report.points_deleted, report.snapshots_deleted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(completed: bool) -> RetentionReport {
        let now = Timestamp::now();
        RetentionReport {
            points_deleted: 500,
            snapshots_deleted: 0,
            chunks: 1,
            points_cutoff: now,
            snapshots_cutoff: now,
            executed_at: now,
            duration: Duration::from_millis(3),
            completed,
        }
    }

    #[test]
    fn test_outcome_reflects_cancellation() {
        assert_eq!(outcome(&report(true)), "completed: 500 points, 0 snapshots deleted");
        assert_eq!(outcome(&report(false)), "cancelled: 500 points, 0 snapshots deleted");
    }
}
