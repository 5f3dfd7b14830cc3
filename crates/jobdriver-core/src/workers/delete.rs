//! DeleteWorker - ファイルを削除し、incremental sync する

use std::sync::Arc;

use async_trait::async_trait;

use super::sync::finish;
use super::{JobContext, SyncWorker, Worker, expand_paths, expect_options};
use crate::domain::{JobAction, JobRecord, WorkerError};
use crate::ports::Repository;

pub struct DeleteWorker {
    sync: Arc<SyncWorker>,
}

impl DeleteWorker {
    pub fn new(sync: Arc<SyncWorker>) -> Self {
        Self { sync }
    }
}

#[async_trait]
impl Worker for DeleteWorker {
    fn action(&self) -> JobAction {
        JobAction::Delete
    }

    async fn process(
        &self,
        ctx: &JobContext,
        job: &JobRecord,
        repo: Arc<dyn Repository>,
    ) -> Result<(), WorkerError> {
        let opts = expect_options!(job, Delete);
        if opts.paths.is_empty() {
            return Err(WorkerError::InvalidOptions {
                action: JobAction::Delete,
                message: "no paths to delete".to_string(),
            });
        }
        let git_ref = opts.git_ref.as_deref();
        let paths = expand_paths(repo.as_ref(), &opts.paths, git_ref)
            .await
            .map_err(|e| WorkerError::stage(JobAction::Delete, "list files", e))?;

        let progress = ctx.progress();
        let mut errors = Vec::new();
        for path in &paths {
            ctx.checkpoint()?;
            match repo.delete(path, git_ref, &format!("Delete {path}")).await {
                Ok(()) => progress.increment("deleted_files", 1),
                Err(e) => {
                    progress.increment("errors", 1);
                    errors.push(format!("{path}: {e}"));
                }
            }
        }
        progress.flush().await;

        if git_ref.is_none() {
            let report = self
                .sync
                .sync(ctx, JobAction::Delete, repo.as_ref(), true)
                .await?;
            errors.extend(report.errors);
        }
        finish(JobAction::Delete, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeleteOptions, JobKey, JobOptions, NewJob};
    use crate::impls::{InMemoryRepository, InMemoryResources};
    use crate::ports::{RepositoryRef, RepositoryResources};
    use chrono::Utc;

    fn job(paths: &[&str], git_ref: Option<&str>) -> JobRecord {
        let opts = DeleteOptions {
            paths: paths.iter().map(|p| p.to_string()).collect(),
            git_ref: git_ref.map(str::to_string),
        };
        JobRecord::new(
            JobKey::new("ns", "delete-1"),
            NewJob::for_repository("ns", "repo", JobOptions::Delete(opts)),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn deleting_files_removes_their_resources() {
        let target = RepositoryRef::new("ns", "repo");
        let repo = Arc::new(InMemoryRepository::new(target.clone()));
        repo.seed("keep.json", "{}").await;
        repo.seed("old/a.json", "{}").await;
        let resources = Arc::new(InMemoryResources::new());
        let sync = Arc::new(SyncWorker::new(resources.clone()));
        sync.sync(&JobContext::detached(), JobAction::Sync, repo.as_ref(), false)
            .await
            .unwrap();
        assert_eq!(resources.list_managed(&target).await.unwrap().len(), 2);

        DeleteWorker::new(sync)
            .process(&JobContext::detached(), &job(&["old/"], None), repo.clone())
            .await
            .unwrap();

        let managed = resources.list_managed(&target).await.unwrap();
        assert_eq!(managed.len(), 1);
        assert_eq!(managed[0].path, "keep.json");
    }

    #[tokio::test]
    async fn deleting_on_a_branch_leaves_resources_alone() {
        let target = RepositoryRef::new("ns", "repo");
        let repo = Arc::new(InMemoryRepository::new(target.clone()));
        repo.write("a.json", Some("feature"), b"{}", "add").await.unwrap();
        let resources = Arc::new(InMemoryResources::new());
        resources.apply(&target, "a.json", b"{}", "h").await.unwrap();

        DeleteWorker::new(Arc::new(SyncWorker::new(resources.clone())))
            .process(
                &JobContext::detached(),
                &job(&["a.json"], Some("feature")),
                repo.clone(),
            )
            .await
            .unwrap();

        assert!(repo.file("a.json", Some("feature")).await.is_none());
        assert_eq!(resources.list_managed(&target).await.unwrap().len(), 1);
    }
}
