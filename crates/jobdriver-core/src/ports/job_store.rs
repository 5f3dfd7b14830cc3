//! JobStore port - job record の正本（source of truth）
//!
//! # 設計原則
//! - Lease の権威はここにある。claim / renew / finalize はそれぞれ
//!   「所有者・状態・期限の確認」と「書き込み」を一つの条件付き更新で行う
//! - 所有の確認は `LeaseToken` 単位（driver id + claim 番号）。同じ driver の
//!   古い claim は reclaim 後に弾かれる
//! - 通知チャネルはヒントに過ぎない（ドライバは必ずポーリングもする）
//! - 読み取り系（get / list / counts）は正しさには関与しない

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::app::status::JobCounts;
use crate::domain::{
    DriverId, JobFilter, JobKey, JobProgress, JobRecord, LeaseToken, NewJob, StoreError, Verdict,
};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a Pending record. `Conflict` on a duplicate name.
    async fn add(&self, job: NewJob) -> Result<JobRecord, StoreError>;

    async fn get(&self, key: &JobKey) -> Result<JobRecord, StoreError>;

    /// Records matching `filter`, oldest first.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError>;

    /// Claim the oldest claimable record (Pending, or leased with an expired
    /// lease) for `driver`. `Ok(None)` when nothing is eligible. The
    /// returned record's `lease_token()` is what the calls below expect.
    async fn claim_next(
        &self,
        driver: &DriverId,
        lease: Duration,
    ) -> Result<Option<JobRecord>, StoreError>;

    /// Claimed -> Running.
    async fn mark_running(&self, key: &JobKey, token: &LeaseToken)
    -> Result<JobRecord, StoreError>;

    /// Extend the lease. Returns the new expiry.
    async fn renew_lease(
        &self,
        key: &JobKey,
        token: &LeaseToken,
        lease: Duration,
    ) -> Result<DateTime<Utc>, StoreError>;

    async fn update_progress(
        &self,
        key: &JobKey,
        token: &LeaseToken,
        progress: &JobProgress,
    ) -> Result<(), StoreError>;

    /// Record the terminal verdict and release the claim.
    async fn finalize(
        &self,
        key: &JobKey,
        token: &LeaseToken,
        verdict: &Verdict,
    ) -> Result<JobRecord, StoreError>;

    /// Move every leased record whose lease expired back to Pending.
    async fn requeue_expired(&self) -> Result<Vec<JobKey>, StoreError>;

    /// Delete terminal records that finished more than `retention` ago.
    async fn cleanup(&self, retention: Duration) -> Result<usize, StoreError>;

    async fn delete(&self, key: &JobKey) -> Result<(), StoreError>;

    async fn counts(&self) -> Result<JobCounts, StoreError>;
}
