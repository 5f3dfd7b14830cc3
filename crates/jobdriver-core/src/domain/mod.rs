//! Domain model (ids, job records, state machine, history, errors).

pub mod errors;
pub mod history;
pub mod ids;
pub mod job;
pub mod state;

pub use self::errors::{
    HistoryError, RepositoryError, ResourceError, StageError, StoreError, WorkerError,
};
pub use self::history::{HistoryEntry, HistoryFilter};
pub use self::ids::{DriverId, HistoryId, Id, IdMarker, JobKey};
pub use self::job::{
    DeleteOptions, ExportOptions, JobAction, JobFilter, JobOptions, JobProgress, JobRecord,
    JobSpec, JobStatus, LeaseToken, MigrateOptions, MoveOptions, NewJob, SyncOptions, Verdict,
};
pub use self::state::{FinalState, JobState};
