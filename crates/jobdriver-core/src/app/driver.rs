//! ConcurrentJobDriver - N 個のスロットとバックグラウンドループを束ねる
//!
//! `spawn()` starts:
//! - `config.slots` slot loops (claim → execute → finalize)
//! - one cleanup loop (old records, optional history expiration)
//! - one reaper loop (expired leases back to Pending)
//!
//! The returned `DriverHandle` stops them:
//! - `request_shutdown()` only stops new claims; in-flight jobs run to
//!   completion (bounded by `max_job_duration`)
//! - `shutdown_and_join()` also waits for every loop to exit

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::cleanup_loop::CleanupLoop;
use super::config::DriverConfig;
use super::reaper_loop::ReaperLoop;
use super::slot::slot_loop;
use super::status::{DriverStatus, SlotStats};
use crate::domain::DriverId;
use crate::impls::InsertSignal;
use crate::ports::{Clock, HistoryWriter, JobStore, RepoGetter};
use crate::workers::WorkerRegistry;

/// Everything the slots and loops share. Read-only apart from `stats`.
pub(crate) struct DriverShared {
    pub(crate) id: DriverId,
    pub(crate) config: DriverConfig,
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) history: Arc<dyn HistoryWriter>,
    pub(crate) repos: Arc<dyn RepoGetter>,
    pub(crate) workers: WorkerRegistry,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) inserts: Option<InsertSignal>,
    pub(crate) stats: SlotStats,
}

/// Built by `DriverBuilder`.
pub struct ConcurrentJobDriver {
    shared: Arc<DriverShared>,
}

impl ConcurrentJobDriver {
    pub(crate) fn new(shared: DriverShared) -> Self {
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn id(&self) -> DriverId {
        self.shared.id
    }

    pub fn config(&self) -> &DriverConfig {
        &self.shared.config
    }

    /// Start all loops on the current tokio runtime.
    pub fn spawn(self) -> DriverHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = self.shared;
        let config = &shared.config;

        let mut joins = Vec::with_capacity(config.slots + 2);
        for slot in 0..config.slots {
            joins.push(tokio::spawn(slot_loop(
                slot,
                Arc::clone(&shared),
                shutdown_rx.clone(),
            )));
        }

        let cleanup = CleanupLoop::new(
            Arc::clone(&shared.store),
            Arc::clone(&shared.history),
            Arc::clone(&shared.clock),
            config.job_retention(),
            config.history_retention(),
        );
        joins.push(tokio::spawn(
            cleanup.run(config.cleanup_interval(), shutdown_rx.clone()),
        ));

        let reaper = ReaperLoop::new(Arc::clone(&shared.store));
        joins.push(tokio::spawn(
            reaper.run(config.reap_interval(), shutdown_rx),
        ));

        tracing::info!(
            driver = %shared.id,
            slots = config.slots,
            actions = ?shared.workers.actions(),
            "driver started"
        );
        DriverHandle {
            shared,
            shutdown_tx,
            joins,
        }
    }
}

pub struct DriverHandle {
    shared: Arc<DriverShared>,
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl DriverHandle {
    pub fn id(&self) -> DriverId {
        self.shared.id
    }

    pub fn status(&self) -> DriverStatus {
        self.shared
            .stats
            .snapshot(self.shared.id, self.shared.config.slots)
    }

    /// The store this driver claims from.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.shared.store
    }

    /// Stop claiming new jobs. Does not cancel running ones.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop, wait for every loop, and return the final counters.
    pub async fn shutdown_and_join(self) -> DriverStatus {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "driver task panicked");
            }
        }
        let status = self
            .shared
            .stats
            .snapshot(self.shared.id, self.shared.config.slots);
        tracing::info!(
            driver = %self.shared.id,
            succeeded = status.succeeded,
            failed = status.failed,
            abandoned = status.abandoned,
            "driver stopped"
        );
        status
    }
}

/// Sleep for `period` unless shutdown comes first. `true` means stop.
pub(crate) async fn sleep_or_shutdown(
    period: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(period) => false,
        res = shutdown.changed() => res.is_err() || *shutdown.borrow(),
    }
}
