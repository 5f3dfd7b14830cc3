//! MoveWorker - ファイルを別ディレクトリへ移動し、incremental sync する

use std::sync::Arc;

use async_trait::async_trait;

use super::sync::finish;
use super::{JobContext, SyncWorker, Worker, expand_paths, expect_options};
use crate::domain::{JobAction, JobRecord, RepositoryError, WorkerError};
use crate::ports::Repository;

pub struct MoveWorker {
    sync: Arc<SyncWorker>,
}

impl MoveWorker {
    pub fn new(sync: Arc<SyncWorker>) -> Self {
        Self { sync }
    }

    async fn move_one(
        repo: &dyn Repository,
        from: &str,
        to: &str,
        git_ref: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let message = format!("Move {from} to {to}");
        let data = repo.read(from, git_ref).await?;
        repo.write(to, git_ref, &data, &message).await?;
        repo.delete(from, git_ref, &message).await
    }
}

/// Destination of `path` under `target_dir`. Files expanded from a
/// directory keep their path relative to that directory's parent.
fn destination(target_dir: &str, path: &str, from_dir: Option<&str>) -> String {
    let relative = match from_dir {
        Some(dir) => {
            let parent_len = dir
                .trim_end_matches('/')
                .rfind('/')
                .map(|i| i + 1)
                .unwrap_or(0);
            &path[parent_len..]
        }
        None => path.rsplit('/').next().unwrap_or(path),
    };
    format!("{target_dir}{relative}")
}

#[async_trait]
impl Worker for MoveWorker {
    fn action(&self) -> JobAction {
        JobAction::Move
    }

    async fn process(
        &self,
        ctx: &JobContext,
        job: &JobRecord,
        repo: Arc<dyn Repository>,
    ) -> Result<(), WorkerError> {
        let opts = expect_options!(job, Move);
        job.spec
            .options
            .validate()
            .map_err(|message| WorkerError::InvalidOptions {
                action: JobAction::Move,
                message,
            })?;
        let git_ref = opts.git_ref.as_deref();

        // (source file, directory it was expanded from)
        let mut moves = Vec::new();
        for path in &opts.paths {
            if path.ends_with('/') {
                let files = expand_paths(repo.as_ref(), std::slice::from_ref(path), git_ref)
                    .await
                    .map_err(|e| WorkerError::stage(JobAction::Move, "list files", e))?;
                moves.extend(files.into_iter().map(|f| (f, Some(path.as_str()))));
            } else {
                moves.push((path.clone(), None));
            }
        }

        let progress = ctx.progress();
        let mut errors = Vec::new();
        for (from, dir) in &moves {
            ctx.checkpoint()?;
            let to = destination(&opts.target_path, from, *dir);
            match Self::move_one(repo.as_ref(), from, &to, git_ref).await {
                Ok(()) => progress.increment("moved", 1),
                Err(e) => {
                    progress.increment("errors", 1);
                    errors.push(format!("{from}: {e}"));
                }
            }
        }
        progress.flush().await;

        // 別ブランチへの移動はリソースに影響しない
        if git_ref.is_none() {
            let report = self
                .sync
                .sync(ctx, JobAction::Move, repo.as_ref(), true)
                .await?;
            errors.extend(report.errors);
        }
        finish(JobAction::Move, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobKey, JobOptions, MoveOptions, NewJob};
    use crate::impls::{InMemoryRepository, InMemoryResources};
    use crate::ports::{RepositoryRef, RepositoryResources};
    use chrono::Utc;
    use rstest::rstest;

    #[rstest]
    #[case("dst/", "a/b.json", None, "dst/b.json")]
    #[case("dst/", "dash/x/y.json", Some("dash/"), "dst/dash/x/y.json")]
    #[case("dst/", "top/dash/y.json", Some("top/dash/"), "dst/dash/y.json")]
    fn destination_paths(
        #[case] target: &str,
        #[case] path: &str,
        #[case] dir: Option<&str>,
        #[case] want: &str,
    ) {
        assert_eq!(destination(target, path, dir), want);
    }

    fn job(paths: &[&str], target_path: &str) -> JobRecord {
        let opts = MoveOptions {
            paths: paths.iter().map(|p| p.to_string()).collect(),
            target_path: target_path.into(),
            git_ref: None,
        };
        JobRecord::new(
            JobKey::new("ns", "move-1"),
            NewJob::for_repository("ns", "repo", JobOptions::Move(opts)),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn moves_files_then_resyncs_resources() {
        let target = RepositoryRef::new("ns", "repo");
        let repo = Arc::new(InMemoryRepository::new(target.clone()));
        repo.seed("a.json", "{}").await;
        repo.seed("dash/b.json", "{}").await;
        let resources = Arc::new(InMemoryResources::new());
        let sync = Arc::new(SyncWorker::new(resources.clone()));

        MoveWorker::new(sync)
            .process(
                &JobContext::detached(),
                &job(&["a.json", "dash/"], "archive/"),
                repo.clone(),
            )
            .await
            .unwrap();

        assert!(repo.file("a.json", None).await.is_none());
        assert!(repo.file("archive/a.json", None).await.is_some());
        assert!(repo.file("archive/dash/b.json", None).await.is_some());

        let mut managed: Vec<String> = resources
            .list_managed(&target)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.path)
            .collect();
        managed.sort();
        assert_eq!(managed, vec!["archive/a.json", "archive/dash/b.json"]);
    }

    #[tokio::test]
    async fn missing_source_is_reported_per_file() {
        let repo = Arc::new(InMemoryRepository::new(RepositoryRef::new("ns", "repo")));
        repo.seed("a.json", "{}").await;
        let sync = Arc::new(SyncWorker::new(Arc::new(InMemoryResources::new())));

        let err = MoveWorker::new(sync)
            .process(
                &JobContext::detached(),
                &job(&["a.json", "missing.json"], "dst/"),
                repo.clone(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.item_errors().len(), 1);
        assert!(err.item_errors()[0].starts_with("missing.json:"));
        assert!(repo.file("dst/a.json", None).await.is_some());
    }
}
