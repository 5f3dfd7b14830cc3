//! CleanupLoop - 終了済みジョブの削除と履歴の期限切れ
//!
//! Terminal records older than the job retention are deleted. History is
//! pruned only when a history retention is configured.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::driver::sleep_or_shutdown;
use crate::ports::{Clock, HistoryWriter, JobStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub jobs_removed: usize,
    pub history_pruned: usize,
}

pub struct CleanupLoop {
    store: Arc<dyn JobStore>,
    history: Arc<dyn HistoryWriter>,
    clock: Arc<dyn Clock>,
    job_retention: Duration,
    history_retention: Option<Duration>,
}

impl CleanupLoop {
    pub fn new(
        store: Arc<dyn JobStore>,
        history: Arc<dyn HistoryWriter>,
        clock: Arc<dyn Clock>,
        job_retention: Duration,
        history_retention: Option<Duration>,
    ) -> Self {
        Self {
            store,
            history,
            clock,
            job_retention,
            history_retention,
        }
    }

    /// One pass. Failures are logged; the report counts what succeeded.
    pub async fn tick(&self) -> CleanupReport {
        let mut report = CleanupReport::default();

        match self.store.cleanup(self.job_retention).await {
            Ok(removed) => report.jobs_removed = removed,
            Err(e) => tracing::warn!(error = %e, "job cleanup failed"),
        }

        if let Some(retention) = self.history_retention {
            let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
            let cutoff = self
                .clock
                .now()
                .checked_sub_signed(retention)
                .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);
            match self.history.prune(cutoff).await {
                Ok(pruned) => report.history_pruned = pruned,
                Err(e) => tracing::warn!(error = %e, "history expiration failed"),
            }
        }

        if report != CleanupReport::default() {
            tracing::info!(
                jobs_removed = report.jobs_removed,
                history_pruned = report.history_pruned,
                "cleanup pass"
            );
        }
        report
    }

    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        while !sleep_or_shutdown(interval, &mut shutdown).await {
            self.tick().await;
        }
    }
}
