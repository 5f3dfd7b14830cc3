//! Implementations of the ports.

pub mod history;
pub mod insert_notifier;
pub mod job_store;
pub mod memory_repo;
mod persistence;
pub mod table;

pub use self::history::{FileHistory, InMemoryHistory};
pub use self::insert_notifier::{InsertNotifier, InsertSignal};
pub use self::job_store::{
    FileJobStore, InMemoryJobStore, JsonSnapshot, TableSink, TableStore, Volatile,
};
pub use self::memory_repo::{
    Commit, InMemoryRepository, InMemoryResources, StaticRepoGetter, content_hash,
};
pub use self::table::{JobTable, TableSnapshot};
