//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（job store, 監査ログ, リポジトリ, リソース）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//! 実装は `impls` にあります（in-memory とファイル永続化）。

pub mod clock;
pub mod history_writer;
pub mod id_generator;
pub mod job_store;
pub mod repository;
pub mod resources;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::history_writer::HistoryWriter;
pub use self::id_generator::{NameGenerator, UlidNameGenerator};
pub use self::job_store::JobStore;
pub use self::repository::{FileEntry, RepoGetter, Repository, RepositoryRef};
pub use self::resources::{ExportedResource, ManagedResource, RepositoryResources};
