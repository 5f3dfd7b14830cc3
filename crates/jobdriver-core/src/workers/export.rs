//! ExportWorker - namespace のリソースをリポジトリに書き出す

use std::sync::Arc;

use async_trait::async_trait;

use super::sync::finish;
use super::{JobContext, Worker, expect_options};
use crate::domain::{ExportOptions, JobAction, JobRecord, WorkerError};
use crate::ports::{Repository, RepositoryResources};

const DEFAULT_EXPORT_MESSAGE: &str = "Export from cluster";

pub struct ExportWorker {
    resources: Arc<dyn RepositoryResources>,
}

impl ExportWorker {
    pub fn new(resources: Arc<dyn RepositoryResources>) -> Self {
        Self { resources }
    }

    /// Write every resource of `namespace` into `repo`. Returns per-file
    /// errors; only the export listing itself aborts.
    pub async fn export(
        &self,
        ctx: &JobContext,
        action: JobAction,
        namespace: &str,
        repo: &dyn Repository,
        opts: &ExportOptions,
    ) -> Result<Vec<String>, WorkerError> {
        let exported = self
            .resources
            .export(namespace)
            .await
            .map_err(|e| WorkerError::stage(action, "export resources", e))?;

        let message = opts.message.as_deref().unwrap_or(DEFAULT_EXPORT_MESSAGE);
        let branch = opts.branch.as_deref();
        let progress = ctx.progress();
        let mut errors = Vec::new();

        for resource in &exported {
            ctx.checkpoint()?;
            let path = prefixed(opts.path.as_deref(), &resource.path);
            match repo.write(&path, branch, &resource.data, message).await {
                Ok(()) => progress.increment("exported", 1),
                Err(e) => {
                    progress.increment("errors", 1);
                    errors.push(format!("{path}: {e}"));
                }
            }
        }

        progress.message(format!(
            "exported {} of {} resources to {}",
            exported.len() - errors.len(),
            exported.len(),
            repo.target()
        ));
        progress.flush().await;
        Ok(errors)
    }
}

fn prefixed(prefix: Option<&str>, path: &str) -> String {
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{prefix}/{path}"),
        None => path.to_string(),
    }
}

#[async_trait]
impl Worker for ExportWorker {
    fn action(&self) -> JobAction {
        JobAction::Export
    }

    async fn process(
        &self,
        ctx: &JobContext,
        job: &JobRecord,
        repo: Arc<dyn Repository>,
    ) -> Result<(), WorkerError> {
        let opts = expect_options!(job, Export);
        let errors = self
            .export(ctx, JobAction::Export, &job.key.namespace, repo.as_ref(), opts)
            .await?;
        finish(JobAction::Export, errors)
    }
}
