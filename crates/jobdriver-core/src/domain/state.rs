//! Job lifecycle state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of a job record.
///
/// State transitions:
/// - Pending -> Claimed -> Running -> Succeeded | Failed
/// - Claimed -> Failed (the job failed before its worker started)
/// - Claimed | Running -> Pending (lease expired without finalize; reclaim)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting to be claimed.
    Pending,

    /// Leased by a driver slot, worker not started yet.
    Claimed,

    /// Worker is executing under a live lease.
    Running,

    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// Held by some driver (lease may have expired).
    pub fn is_leased(self) -> bool {
        matches!(self, JobState::Claimed | JobState::Running)
    }

    /// Position in the forward order. Succeeded and Failed share a rank.
    pub fn rank(self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Claimed => 1,
            JobState::Running => 2,
            JobState::Succeeded | JobState::Failed => 3,
        }
    }

    /// Is `self -> next` a legal transition?
    pub fn can_transition_to(self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        // reclaim is the only regression
        if next == JobState::Pending {
            return self.is_leased();
        }
        if self == JobState::Pending {
            return next == JobState::Claimed;
        }
        next.rank() >= self.rank()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Claimed => "claimed",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Terminal verdict a driver writes when it finalizes a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalState {
    Succeeded,
    Failed,
}

impl From<FinalState> for JobState {
    fn from(state: FinalState) -> Self {
        match state {
            FinalState::Succeeded => JobState::Succeeded,
            FinalState::Failed => JobState::Failed,
        }
    }
}

impl fmt::Display for FinalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        JobState::from(*self).fmt(f)
    }
}
