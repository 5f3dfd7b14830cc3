//! Status - ストアとドライバの状態スナップショット

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::domain::DriverId;

/// Job records per state, from `JobStore::counts`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: usize,
    pub claimed: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl JobCounts {
    /// Pending or leased: work not yet finished.
    pub fn active(&self) -> usize {
        self.pending + self.claimed + self.running
    }

    pub fn total(&self) -> usize {
        self.active() + self.succeeded + self.failed
    }
}

/// What one driver has done since it started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverStatus {
    pub driver: Option<DriverId>,
    pub slots: usize,
    pub busy_slots: usize,
    pub succeeded: u64,
    pub failed: u64,

    /// Jobs dropped after losing the lease (no finalize, no history).
    pub abandoned: u64,

    /// Finalize rejected by the store; history written with `finalized: false`.
    pub unfinalized: u64,
}

/// Counters the slots update while running.
#[derive(Debug, Default)]
pub(crate) struct SlotStats {
    busy: AtomicUsize,
    succeeded: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
    unfinalized: AtomicU64,
}

/// How a slot's job ended, as far as the driver is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotOutcome {
    Succeeded,
    Failed,
    Abandoned,
    Unfinalized,
}

impl SlotStats {
    pub(crate) fn enter(&self) {
        self.busy.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn leave(&self, outcome: SlotOutcome) {
        self.busy.fetch_sub(1, Ordering::Relaxed);
        let counter = match outcome {
            SlotOutcome::Succeeded => &self.succeeded,
            SlotOutcome::Failed => &self.failed,
            SlotOutcome::Abandoned => &self.abandoned,
            SlotOutcome::Unfinalized => &self.unfinalized,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, driver: DriverId, slots: usize) -> DriverStatus {
        DriverStatus {
            driver: Some(driver),
            slots,
            busy_slots: self.busy.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            unfinalized: self.unfinalized.load(Ordering::Relaxed),
        }
    }
}
