//! HistoryWriter port - 終了したジョブの監査ログ
//!
//! Append-only from the driver's point of view. `prune` exists for the
//! cleanup loop's history expiration and is the only way entries go away.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{HistoryEntry, HistoryError, HistoryFilter};

#[async_trait]
pub trait HistoryWriter: Send + Sync {
    async fn append(&self, entry: HistoryEntry) -> Result<(), HistoryError>;

    /// Entries matching `filter` in append order.
    async fn list(&self, filter: &HistoryFilter) -> Result<Vec<HistoryEntry>, HistoryError>;

    /// Drop entries that finished before `cutoff`.
    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, HistoryError>;
}
