//! Errors - エラー型と分類
//!
//! One enum per seam. The driver only branches on `StoreError`:
//! `LeaseLost` aborts the current execution, transient errors are retried,
//! everything a worker returns becomes a Failed verdict.

use thiserror::Error;

use super::ids::{DriverId, JobKey};
use super::job::JobAction;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("job {0} already exists")]
    Conflict(JobKey),

    #[error("job {0} not found")]
    NotFound(JobKey),

    /// The caller no longer holds a valid claim on the job.
    #[error("lease on job {key} is no longer held by {driver}")]
    LeaseLost { key: JobKey, driver: DriverId },

    #[error("invalid job: {0}")]
    Invalid(String),

    #[error("job store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history io: {0}")]
    Io(#[from] std::io::Error),

    #[error("history encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("repository {0} not found")]
    NotFound(String),

    #[error("file {path} not found in repository {repository}")]
    FileNotFound { repository: String, path: String },

    #[error("repository {repository}: {message}")]
    Backend { repository: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// The file is not a valid resource.
    #[error("parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("resources unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a worker's `process`.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{action} options invalid: {message}")]
    InvalidOptions { action: JobAction, message: String },

    /// One stage failed as a whole.
    #[error("{action} {stage}: {source}")]
    Stage {
        action: JobAction,
        stage: &'static str,
        #[source]
        source: StageError,
    },

    /// Some items failed; the job is Failed with each item error listed.
    #[error("{action} finished with {} error(s)", errors.len())]
    Partial { action: JobAction, errors: Vec<String> },

    #[error("job context cancelled")]
    Cancelled,
}

impl WorkerError {
    pub fn stage(action: JobAction, stage: &'static str, source: impl Into<StageError>) -> Self {
        WorkerError::Stage {
            action,
            stage,
            source: source.into(),
        }
    }

    /// Item-level errors to copy into the job status.
    pub fn item_errors(&self) -> Vec<String> {
        match self {
            WorkerError::Partial { errors, .. } => errors.clone(),
            _ => Vec::new(),
        }
    }
}

/// Collaborator error wrapped by `WorkerError::Stage`.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
