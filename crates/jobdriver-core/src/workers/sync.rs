//! SyncWorker - リポジトリのファイルをリソースに反映する
//!
//! 1. list the repository tree and the resources it currently manages
//! 2. plan creates / updates / deletes
//! 3. apply them one file at a time, collecting per-file errors

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{JobContext, Worker, expect_options};
use crate::domain::{JobAction, JobRecord, WorkerError};
use crate::ports::{FileEntry, ManagedResource, Repository, RepositoryRef, RepositoryResources};

/// What a sync is going to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub create: Vec<FileEntry>,
    pub update: Vec<FileEntry>,
    pub delete: Vec<String>,
    pub unchanged: usize,
}

impl SyncPlan {
    /// Incremental sync skips files whose hash matches the applied one;
    /// full sync re-applies them.
    pub fn compute(files: &[FileEntry], managed: &[ManagedResource], incremental: bool) -> Self {
        let applied: BTreeMap<&str, &str> = managed
            .iter()
            .map(|m| (m.path.as_str(), m.hash.as_str()))
            .collect();

        let mut plan = SyncPlan::default();
        for file in files {
            match applied.get(file.path.as_str()) {
                None => plan.create.push(file.clone()),
                Some(hash) if *hash != file.hash || !incremental => plan.update.push(file.clone()),
                Some(_) => plan.unchanged += 1,
            }
        }

        let present: std::collections::BTreeSet<&str> =
            files.iter().map(|f| f.path.as_str()).collect();
        plan.delete = managed
            .iter()
            .filter(|m| !present.contains(m.path.as_str()))
            .map(|m| m.path.clone())
            .collect();
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub errors: Vec<String>,
}

pub struct SyncWorker {
    resources: Arc<dyn RepositoryResources>,
}

impl SyncWorker {
    pub fn new(resources: Arc<dyn RepositoryResources>) -> Self {
        Self { resources }
    }

    /// Sync `repo` into resources. Per-file failures land in the report;
    /// only listing failures abort. `action` labels errors for composed
    /// workers (migrate, move, delete).
    pub async fn sync(
        &self,
        ctx: &JobContext,
        action: JobAction,
        repo: &dyn Repository,
        incremental: bool,
    ) -> Result<SyncReport, WorkerError> {
        let target = repo.target().clone();
        let files = repo
            .list(None)
            .await
            .map_err(|e| WorkerError::stage(action, "list files", e))?;
        let managed = self
            .resources
            .list_managed(&target)
            .await
            .map_err(|e| WorkerError::stage(action, "list resources", e))?;

        let plan = SyncPlan::compute(&files, &managed, incremental);
        tracing::debug!(
            repository = %target,
            create = plan.create.len(),
            update = plan.update.len(),
            delete = plan.delete.len(),
            unchanged = plan.unchanged,
            "sync plan"
        );

        let progress = ctx.progress();
        let mut report = SyncReport {
            unchanged: plan.unchanged,
            ..Default::default()
        };

        for (file, created) in plan
            .create
            .iter()
            .map(|f| (f, true))
            .chain(plan.update.iter().map(|f| (f, false)))
        {
            ctx.checkpoint()?;
            match self.apply_file(&target, repo, file).await {
                Ok(()) if created => {
                    report.created += 1;
                    progress.increment("created", 1);
                }
                Ok(()) => {
                    report.updated += 1;
                    progress.increment("updated", 1);
                }
                Err(e) => {
                    progress.increment("errors", 1);
                    report.errors.push(format!("{}: {e}", file.path));
                }
            }
        }

        for path in &plan.delete {
            ctx.checkpoint()?;
            match self.resources.remove(&target, path).await {
                Ok(()) => {
                    report.deleted += 1;
                    progress.increment("deleted", 1);
                }
                Err(e) => {
                    progress.increment("errors", 1);
                    report.errors.push(format!("{path}: {e}"));
                }
            }
        }

        progress.message(format!(
            "synced {}: {} created, {} updated, {} deleted",
            target, report.created, report.updated, report.deleted
        ));
        progress.flush().await;
        Ok(report)
    }

    async fn apply_file(
        &self,
        target: &RepositoryRef,
        repo: &dyn Repository,
        file: &FileEntry,
    ) -> Result<(), String> {
        let data = repo
            .read(&file.path, None)
            .await
            .map_err(|e| e.to_string())?;
        self.resources
            .apply(target, &file.path, &data, &file.hash)
            .await
            .map_err(|e| e.to_string())
    }
}

/// Turn a report's collected errors into the worker result.
pub(crate) fn finish(action: JobAction, errors: Vec<String>) -> Result<(), WorkerError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(WorkerError::Partial { action, errors })
    }
}

#[async_trait]
impl Worker for SyncWorker {
    fn action(&self) -> JobAction {
        JobAction::Sync
    }

    async fn process(
        &self,
        ctx: &JobContext,
        job: &JobRecord,
        repo: Arc<dyn Repository>,
    ) -> Result<(), WorkerError> {
        let opts = expect_options!(job, Sync);
        let report = self
            .sync(ctx, JobAction::Sync, repo.as_ref(), opts.incremental)
            .await?;
        finish(JobAction::Sync, report.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobKey, JobOptions, NewJob, SyncOptions};
    use crate::impls::{InMemoryRepository, InMemoryResources, content_hash};
    use chrono::Utc;
    use rstest::rstest;

    fn entry(path: &str, hash: &str) -> FileEntry {
        FileEntry {
            path: path.into(),
            hash: hash.into(),
        }
    }

    fn managed(path: &str, hash: &str) -> ManagedResource {
        ManagedResource {
            path: path.into(),
            hash: hash.into(),
        }
    }

    #[rstest]
    #[case::incremental(true, 0, 1, 1)]
    #[case::full(false, 0, 2, 0)]
    fn plan_diffs_tree_against_managed(
        #[case] incremental: bool,
        #[case] create: usize,
        #[case] update: usize,
        #[case] unchanged: usize,
    ) {
        let files = [entry("same.json", "h1"), entry("changed.json", "new")];
        let applied = [
            managed("same.json", "h1"),
            managed("changed.json", "old"),
            managed("gone.json", "h"),
        ];
        let plan = SyncPlan::compute(&files, &applied, incremental);

        assert_eq!(plan.create.len(), create);
        assert_eq!(plan.update.len(), update);
        assert_eq!(plan.unchanged, unchanged);
        assert_eq!(plan.delete, vec!["gone.json".to_string()]);
    }

    #[test]
    fn plan_creates_new_files() {
        let plan = SyncPlan::compute(&[entry("a.json", "h")], &[], true);
        assert_eq!(plan.create.len(), 1);
        assert!(!plan.is_empty());
    }

    fn job(incremental: bool) -> JobRecord {
        let job = NewJob::for_repository(
            "ns",
            "repo",
            JobOptions::Sync(SyncOptions { incremental }),
        );
        JobRecord::new(JobKey::new("ns", "sync-1"), job, Utc::now())
    }

    #[tokio::test]
    async fn sync_applies_and_removes_resources() {
        let target = RepositoryRef::new("ns", "repo");
        let repo = Arc::new(InMemoryRepository::new(target.clone()));
        repo.seed("a.json", "{\"a\":1}").await;
        let resources = Arc::new(InMemoryResources::new());
        resources.apply(&target, "stale.json", b"{}", "x").await.unwrap();

        let worker = SyncWorker::new(resources.clone());
        let ctx = JobContext::detached();
        worker.process(&ctx, &job(false), repo).await.unwrap();

        let managed = resources.list_managed(&target).await.unwrap();
        assert_eq!(managed, vec![managed_entry("a.json", b"{\"a\":1}")]);
        assert_eq!(ctx.progress().snapshot().counter("created"), 1);
        assert_eq!(ctx.progress().snapshot().counter("deleted"), 1);
    }

    fn managed_entry(path: &str, data: &[u8]) -> ManagedResource {
        managed(path, &content_hash(data))
    }

    #[tokio::test]
    async fn per_file_errors_fail_the_job_after_applying_the_rest() {
        let target = RepositoryRef::new("ns", "repo");
        let repo = Arc::new(InMemoryRepository::new(target.clone()));
        repo.seed("bad.json", "not json").await;
        repo.seed("good.json", "{}").await;
        let resources = Arc::new(InMemoryResources::new());

        let err = SyncWorker::new(resources.clone())
            .process(&JobContext::detached(), &job(true), repo)
            .await
            .unwrap_err();

        let errors = err.item_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("bad.json:"));
        assert_eq!(resources.list_managed(&target).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_context_stops_before_applying() {
        let target = RepositoryRef::new("ns", "repo");
        let repo = Arc::new(InMemoryRepository::new(target.clone()));
        repo.seed("a.json", "{}").await;
        let resources = Arc::new(InMemoryResources::new());

        let ctx = JobContext::detached();
        ctx.cancellation().cancel();
        let err = SyncWorker::new(resources.clone())
            .process(&ctx, &job(false), repo)
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::Cancelled));
        assert!(resources.list_managed(&target).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn wrong_options_are_rejected() {
        let target = RepositoryRef::new("ns", "repo");
        let repo = Arc::new(InMemoryRepository::new(target));
        let mut record = job(false);
        record.spec.options = JobOptions::default_for(JobAction::Export);

        let err = SyncWorker::new(Arc::new(InMemoryResources::new()))
            .process(&JobContext::detached(), &record, repo)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::InvalidOptions { .. }));
    }
}
