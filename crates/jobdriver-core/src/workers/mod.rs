//! Workers - アクションごとのジョブ実行戦略
//!
//! One `Worker` per `JobAction`, looked up through `WorkerRegistry`.
//! Workers see a resolved repository handle and the resources port; they
//! never touch the job store directly except through `JobContext`'s
//! progress reporter.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{JobAction, JobRecord, WorkerError};
use crate::ports::Repository;

pub mod context;
pub mod delete;
pub mod export;
pub mod migrate;
pub mod move_files;
pub mod registry;
pub mod sync;

pub use self::context::{JobContext, ProgressReporter};
pub use self::delete::DeleteWorker;
pub use self::export::ExportWorker;
pub use self::migrate::MigrationWorker;
pub use self::move_files::MoveWorker;
pub use self::registry::{RegistryError, WorkerRegistry};
pub use self::sync::{SyncPlan, SyncReport, SyncWorker};

/// Executes one job action.
///
/// Jobs may run more than once (a reclaimed lease re-executes from the
/// start), so `process` must be safe to repeat.
#[async_trait]
pub trait Worker: Send + Sync {
    fn action(&self) -> JobAction;

    async fn process(
        &self,
        ctx: &JobContext,
        job: &JobRecord,
        repo: Arc<dyn Repository>,
    ) -> Result<(), WorkerError>;
}

/// `options` of the expected variant, or `InvalidOptions`.
macro_rules! expect_options {
    ($job:expr, $variant:ident) => {
        match &$job.spec.options {
            $crate::domain::JobOptions::$variant(opts) => opts,
            other => {
                return Err($crate::domain::WorkerError::InvalidOptions {
                    action: $crate::domain::JobAction::$variant,
                    message: format!("got {} options", other.action()),
                });
            }
        }
    };
}
pub(crate) use expect_options;

/// Expand directory entries (trailing `/`) into the files under them.
pub(crate) async fn expand_paths(
    repo: &dyn Repository,
    paths: &[String],
    git_ref: Option<&str>,
) -> Result<Vec<String>, crate::domain::RepositoryError> {
    if !paths.iter().any(|p| p.ends_with('/')) {
        return Ok(paths.to_vec());
    }
    let tree = repo.list(git_ref).await?;
    let mut out = Vec::new();
    for path in paths {
        if path.ends_with('/') {
            out.extend(
                tree.iter()
                    .filter(|f| f.path.starts_with(path.as_str()))
                    .map(|f| f.path.clone()),
            );
        } else {
            out.push(path.clone());
        }
    }
    out.sort();
    out.dedup();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryRepository;
    use crate::ports::RepositoryRef;

    #[tokio::test]
    async fn expand_paths_lists_directory_contents() {
        let repo = InMemoryRepository::new(RepositoryRef::new("ns", "r"));
        repo.seed("dash/a.json", "{}").await;
        repo.seed("dash/b.json", "{}").await;
        repo.seed("other.json", "{}").await;

        let paths = expand_paths(&repo, &["dash/".into(), "other.json".into()], None)
            .await
            .unwrap();
        assert_eq!(paths, vec!["dash/a.json", "dash/b.json", "other.json"]);
    }
}
