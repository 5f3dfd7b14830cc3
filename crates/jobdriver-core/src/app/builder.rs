//! DriverBuilder - ドライバの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - `expect_actions()` で必要な action を宣言
//! - `build()` 時に「期待集合 ⊆ 登録済み集合」と設定の妥当性をチェック
//! - 不足があれば BuildError を返す（実行時に初めて気づくことがない）

use std::sync::Arc;

use super::config::{ConfigError, DriverConfig};
use super::driver::{ConcurrentJobDriver, DriverShared};
use super::status::SlotStats;
use crate::domain::{DriverId, JobAction};
use crate::impls::InsertSignal;
use crate::ports::{Clock, HistoryWriter, JobStore, RepoGetter, SystemClock};
use crate::workers::{RegistryError, Worker, WorkerRegistry};

/// BuildError はドライバ構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing workers for actions {0:?}; they were expected but not registered")]
    MissingWorkers(Vec<JobAction>),

    #[error("driver needs a {0}")]
    MissingComponent(&'static str),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// # 使用例
/// ```ignore
/// let driver = DriverBuilder::new(config)
///     .store(store)
///     .history(history)
///     .repositories(repos)
///     .workers(WorkerRegistry::standard(resources))
///     .expect_actions(&JobAction::ALL)
///     .build()?;
/// let handle = driver.spawn();
/// ```
pub struct DriverBuilder {
    config: DriverConfig,
    store: Option<Arc<dyn JobStore>>,
    history: Option<Arc<dyn HistoryWriter>>,
    repos: Option<Arc<dyn RepoGetter>>,
    workers: WorkerRegistry,
    expected: Option<Vec<JobAction>>,
    clock: Arc<dyn Clock>,
    inserts: Option<InsertSignal>,
    id: Option<DriverId>,
}

impl DriverBuilder {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            store: None,
            history: None,
            repos: None,
            workers: WorkerRegistry::new(),
            expected: None,
            clock: Arc::new(SystemClock),
            inserts: None,
            id: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn history(mut self, history: Arc<dyn HistoryWriter>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn repositories(mut self, repos: Arc<dyn RepoGetter>) -> Self {
        self.repos = Some(repos);
        self
    }

    /// Replace the registry wholesale.
    pub fn workers(mut self, workers: WorkerRegistry) -> Self {
        self.workers = workers;
        self
    }

    /// Add one worker. Fails if its action already has one.
    pub fn register(mut self, worker: Arc<dyn Worker>) -> Result<Self, BuildError> {
        self.workers.register(worker)?;
        Ok(self)
    }

    pub fn expect_actions(mut self, actions: &[JobAction]) -> Self {
        self.expected = Some(actions.to_vec());
        self
    }

    /// Wake idle slots on inserts instead of waiting for the next poll.
    pub fn insert_signal(mut self, signal: InsertSignal) -> Self {
        self.inserts = Some(signal);
        self
    }

    /// Clock used for lease-expiry checks on the driver side. Should match
    /// the store's clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn driver_id(mut self, id: DriverId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn build(self) -> Result<ConcurrentJobDriver, BuildError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected {
            let missing = self.workers.missing(expected);
            if !missing.is_empty() {
                return Err(BuildError::MissingWorkers(missing));
            }
        }

        let store = self.store.ok_or(BuildError::MissingComponent("job store"))?;
        let history = self
            .history
            .ok_or(BuildError::MissingComponent("history writer"))?;
        let repos = self
            .repos
            .ok_or(BuildError::MissingComponent("repository getter"))?;

        Ok(ConcurrentJobDriver::new(DriverShared {
            id: self.id.unwrap_or_else(DriverId::generate),
            config: self.config,
            store,
            history,
            repos,
            workers: self.workers,
            clock: self.clock,
            inserts: self.inserts,
            stats: SlotStats::default(),
        }))
    }
}
