//! WorkerRegistry - action → worker の対応表
//!
//! 起動時に一度だけ組み立てる。重複登録はエラー。

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::{DeleteWorker, ExportWorker, MigrationWorker, MoveWorker, SyncWorker, Worker};
use crate::domain::JobAction;
use crate::ports::RepositoryResources;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("worker for action {0} is already registered")]
    Duplicate(JobAction),
}

#[derive(Default, Clone)]
pub struct WorkerRegistry {
    workers: HashMap<JobAction, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All five built-in workers over `resources`.
    pub fn standard(resources: Arc<dyn RepositoryResources>) -> Self {
        let sync = Arc::new(SyncWorker::new(resources.clone()));
        let export = Arc::new(ExportWorker::new(resources));
        let workers: [Arc<dyn Worker>; 5] = [
            sync.clone(),
            export.clone(),
            Arc::new(MigrationWorker::new(export, sync.clone())),
            Arc::new(MoveWorker::new(sync.clone())),
            Arc::new(DeleteWorker::new(sync)),
        ];

        // action ごとに 1 つずつ。register() の重複検査は通さない
        let workers = workers
            .into_iter()
            .map(|worker| (worker.action(), worker))
            .collect();
        Self { workers }
    }

    pub fn register(&mut self, worker: Arc<dyn Worker>) -> Result<(), RegistryError> {
        let action = worker.action();
        if self.workers.contains_key(&action) {
            return Err(RegistryError::Duplicate(action));
        }
        self.workers.insert(action, worker);
        Ok(())
    }

    pub fn get(&self, action: JobAction) -> Option<Arc<dyn Worker>> {
        self.workers.get(&action).cloned()
    }

    /// Registered actions in declaration order.
    pub fn actions(&self) -> Vec<JobAction> {
        JobAction::ALL
            .into_iter()
            .filter(|a| self.workers.contains_key(a))
            .collect()
    }

    /// Which of `expected` have no worker.
    pub fn missing(&self, expected: &[JobAction]) -> Vec<JobAction> {
        expected
            .iter()
            .copied()
            .filter(|a| !self.workers.contains_key(a))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
