//! MigrationWorker - export してから full sync する
//!
//! Moves a namespace from unmanaged resources to repository-managed ones.

use std::sync::Arc;

use async_trait::async_trait;

use super::sync::finish;
use super::{ExportWorker, JobContext, SyncWorker, Worker, expect_options};
use crate::domain::{ExportOptions, JobAction, JobRecord, WorkerError};
use crate::ports::Repository;

const DEFAULT_MIGRATE_MESSAGE: &str = "Migrate resources to repository";

pub struct MigrationWorker {
    export: Arc<ExportWorker>,
    sync: Arc<SyncWorker>,
}

impl MigrationWorker {
    pub fn new(export: Arc<ExportWorker>, sync: Arc<SyncWorker>) -> Self {
        Self { export, sync }
    }
}

#[async_trait]
impl Worker for MigrationWorker {
    fn action(&self) -> JobAction {
        JobAction::Migrate
    }

    async fn process(
        &self,
        ctx: &JobContext,
        job: &JobRecord,
        repo: Arc<dyn Repository>,
    ) -> Result<(), WorkerError> {
        let opts = expect_options!(job, Migrate);
        let export_opts = ExportOptions {
            message: Some(
                opts.message
                    .clone()
                    .unwrap_or_else(|| DEFAULT_MIGRATE_MESSAGE.to_string()),
            ),
            ..Default::default()
        };

        let errors = self
            .export
            .export(
                ctx,
                JobAction::Migrate,
                &job.key.namespace,
                repo.as_ref(),
                &export_opts,
            )
            .await?;
        // 書き出しに失敗したファイルがあれば同期しない
        finish(JobAction::Migrate, errors)?;

        let report = self
            .sync
            .sync(ctx, JobAction::Migrate, repo.as_ref(), false)
            .await?;
        finish(JobAction::Migrate, report.errors)
    }
}
