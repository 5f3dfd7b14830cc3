//! jobdriver-core
//!
//! A concurrent job driver: jobs are records in a store, claimed under a
//! time-bounded lease by one of N driver slots, executed by the worker
//! registered for their action, then finalized and written to history.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job record, state machine, history, errors）
//! - **ports**: 抽象化レイヤー（JobStore, HistoryWriter, Repository, RepoGetter, Clock など）
//! - **impls**: 実装（JobTable + in-memory / JSON ファイルの store、履歴、通知、デモ用リポジトリ）
//! - **workers**: action ごとの Worker（sync, export, migrate, move, delete）
//! - **app**: ドライバ本体（builder, driver, slot, lease renewal, cleanup, reaper, config）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod workers;

pub use app::{ConcurrentJobDriver, DriverBuilder, DriverConfig, DriverHandle};
