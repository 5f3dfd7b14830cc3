//! Audit trail entries written once per finalized job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DriverId, HistoryId, JobKey};
use super::job::{JobAction, JobRecord, Verdict};
use super::state::FinalState;

/// Terminal outcome of one job execution.
///
/// Entries are independent of the job record: they are written even when
/// the store rejected the finalize (`finalized == false`), and they outlive
/// record cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: HistoryId,
    pub job: JobKey,
    pub action: JobAction,
    pub repository: String,
    pub state: FinalState,
    pub message: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,

    pub claimed_by: DriverId,
    pub attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    pub finished_at: DateTime<Utc>,

    /// Whether the store accepted the matching finalize.
    pub finalized: bool,
}

impl HistoryEntry {
    /// Entry for `job` as claimed by `driver`.
    ///
    /// `job` is the driver's copy of the record; when the finalize was
    /// applied pass the stored result instead so timestamps match.
    pub fn from_record(
        job: &JobRecord,
        driver: DriverId,
        verdict: &Verdict,
        finished_at: DateTime<Utc>,
        finalized: bool,
    ) -> Self {
        Self {
            id: HistoryId::generate(),
            job: job.key.clone(),
            action: job.action,
            repository: job.spec.repository.clone(),
            state: verdict.state,
            message: verdict.message.clone(),
            errors: verdict.errors.clone(),
            claimed_by: driver,
            attempts: job.status.attempts,
            started_at: job.status.started_at,
            finished_at,
            finalized,
        }
    }
}

/// Filter for `HistoryWriter::list`.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub job: Option<JobKey>,
    pub repository: Option<String>,
}

impl HistoryFilter {
    pub fn for_job(job: JobKey) -> Self {
        Self {
            job: Some(job),
            repository: None,
        }
    }

    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        self.job.as_ref().is_none_or(|job| *job == entry.job)
            && self
                .repository
                .as_ref()
                .is_none_or(|repo| *repo == entry.repository)
    }
}
