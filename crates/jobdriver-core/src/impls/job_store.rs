//! JobStore implementations over `JobTable`.
//!
//! - `InMemoryJobStore`: volatile, one process. Tests and demos.
//! - `FileJobStore`: same table, snapshotted to a JSON file after every
//!   write. A write only becomes visible once its snapshot is on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::insert_notifier::{InsertNotifier, InsertSignal};
use super::persistence::{atomic_write, read_if_exists};
use super::table::{JobTable, TableSnapshot};
use crate::app::status::JobCounts;
use crate::domain::{
    DriverId, JobFilter, JobKey, JobProgress, JobRecord, LeaseToken, NewJob, StoreError, Verdict,
};
use crate::ports::{Clock, JobStore, NameGenerator, SystemClock, UlidNameGenerator};

/// Where a table's writes go after they are applied in memory.
#[async_trait]
pub trait TableSink: Send + Sync {
    /// `false` skips the clone-then-commit dance.
    fn is_durable(&self) -> bool;

    async fn save(&self, table: &JobTable) -> Result<(), StoreError>;
}

/// Nothing is persisted.
#[derive(Debug, Clone, Copy, Default)]
pub struct Volatile;

#[async_trait]
impl TableSink for Volatile {
    fn is_durable(&self) -> bool {
        false
    }

    async fn save(&self, _table: &JobTable) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Pretty-printed JSON snapshot at `path`.
#[derive(Debug, Clone)]
pub struct JsonSnapshot {
    path: PathBuf,
}

impl JsonSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<JobTable, StoreError> {
        let Some(bytes) = read_if_exists(&self.path).await.map_err(|e| {
            StoreError::Unavailable(format!("read {}: {e}", self.path.display()))
        })?
        else {
            return Ok(JobTable::default());
        };
        let snapshot: TableSnapshot = serde_json::from_slice(&bytes).map_err(|e| {
            StoreError::Invalid(format!("corrupt job snapshot {}: {e}", self.path.display()))
        })?;
        Ok(snapshot.into())
    }
}

#[async_trait]
impl TableSink for JsonSnapshot {
    fn is_durable(&self) -> bool {
        true
    }

    async fn save(&self, table: &JobTable) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&TableSnapshot::from(table))
            .map_err(|e| StoreError::Unavailable(format!("encode job snapshot: {e}")))?;
        atomic_write(&self.path, &json).await.map_err(|e| {
            StoreError::Unavailable(format!("write {}: {e}", self.path.display()))
        })
    }
}

pub type InMemoryJobStore = TableStore<Volatile>;
pub type FileJobStore = TableStore<JsonSnapshot>;

pub struct TableStore<S> {
    table: Mutex<JobTable>,
    sink: S,
    clock: Arc<dyn Clock>,
    names: Arc<dyn NameGenerator>,
    notifier: InsertNotifier,
}

impl TableStore<Volatile> {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::from_parts(JobTable::default(), Volatile, clock)
    }
}

impl Default for TableStore<Volatile> {
    fn default() -> Self {
        Self::new()
    }
}

impl TableStore<JsonSnapshot> {
    /// Open (or create on first write) the snapshot at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with_clock(path, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(
        path: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let sink = JsonSnapshot::new(path);
        let table = sink.load().await?;
        tracing::debug!(
            path = %sink.path().display(),
            jobs = table.len(),
            revision = table.revision(),
            "loaded job snapshot"
        );
        Ok(Self::from_parts(table, sink, clock))
    }
}

impl<S: TableSink> TableStore<S> {
    fn from_parts(table: JobTable, sink: S, clock: Arc<dyn Clock>) -> Self {
        let names = Arc::new(UlidNameGenerator::new(Arc::clone(&clock)));
        Self {
            table: Mutex::new(table),
            sink,
            clock,
            names,
            notifier: InsertNotifier::new(),
        }
    }

    pub fn with_name_generator(mut self, names: Arc<dyn NameGenerator>) -> Self {
        self.names = names;
        self
    }

    /// Share an existing notifier (e.g. one the driver already listens on).
    pub fn with_notifier(mut self, notifier: InsertNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn notifier(&self) -> &InsertNotifier {
        &self.notifier
    }

    pub fn subscribe(&self) -> InsertSignal {
        self.notifier.subscribe()
    }

    /// Apply `op` under the lock. For durable sinks the op runs on a copy
    /// that only replaces the live table once it has been saved.
    async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut JobTable, DateTime<Utc>) -> Result<T, StoreError> + Send,
    ) -> Result<T, StoreError> {
        let mut table = self.table.lock().await;
        let now = self.clock.now();

        if !self.sink.is_durable() {
            return op(&mut table, now);
        }

        let mut draft = table.clone();
        let out = op(&mut draft, now)?;
        if draft.revision() != table.revision() {
            self.sink.save(&draft).await?;
            *table = draft;
        }
        Ok(out)
    }
}

#[async_trait]
impl<S: TableSink> JobStore for TableStore<S> {
    async fn add(&self, job: NewJob) -> Result<JobRecord, StoreError> {
        let name = match &job.name {
            Some(name) => name.clone(),
            None => self.names.generate(job.action()),
        };
        let key = JobKey::new(job.namespace.clone(), name);
        let record = self.mutate(|table, now| table.insert(key, job, now)).await?;

        tracing::debug!(job = %record.key, action = %record.action, "job added");
        self.notifier.notify();
        Ok(record)
    }

    async fn get(&self, key: &JobKey) -> Result<JobRecord, StoreError> {
        self.table.lock().await.get(key).cloned()
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError> {
        Ok(self.table.lock().await.list(filter))
    }

    async fn claim_next(
        &self,
        driver: &DriverId,
        lease: Duration,
    ) -> Result<Option<JobRecord>, StoreError> {
        self.mutate(|table, now| Ok(table.claim_next(driver, lease, now)))
            .await
    }

    async fn mark_running(
        &self,
        key: &JobKey,
        token: &LeaseToken,
    ) -> Result<JobRecord, StoreError> {
        self.mutate(|table, now| table.mark_running(key, token, now))
            .await
    }

    async fn renew_lease(
        &self,
        key: &JobKey,
        token: &LeaseToken,
        lease: Duration,
    ) -> Result<DateTime<Utc>, StoreError> {
        self.mutate(|table, now| table.renew(key, token, lease, now))
            .await
    }

    async fn update_progress(
        &self,
        key: &JobKey,
        token: &LeaseToken,
        progress: &JobProgress,
    ) -> Result<(), StoreError> {
        self.mutate(|table, now| table.update_progress(key, token, progress, now))
            .await
    }

    async fn finalize(
        &self,
        key: &JobKey,
        token: &LeaseToken,
        verdict: &Verdict,
    ) -> Result<JobRecord, StoreError> {
        self.mutate(|table, now| table.finalize(key, token, verdict, now))
            .await
    }

    async fn requeue_expired(&self) -> Result<Vec<JobKey>, StoreError> {
        self.mutate(|table, now| Ok(table.requeue_expired(now)))
            .await
    }

    async fn cleanup(&self, retention: Duration) -> Result<usize, StoreError> {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        self.mutate(|table, now| {
            let cutoff = now
                .checked_sub_signed(retention)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            Ok(table.cleanup(cutoff))
        })
        .await
    }

    async fn delete(&self, key: &JobKey) -> Result<(), StoreError> {
        self.mutate(|table, _| table.remove(key).map(|_| ()))
            .await
    }

    async fn counts(&self) -> Result<JobCounts, StoreError> {
        Ok(self.table.lock().await.counts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobAction, JobOptions, JobState};
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    const LEASE: Duration = Duration::from_secs(30);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn sync_job(repo: &str) -> NewJob {
        NewJob::for_repository("ns", repo, JobOptions::default_for(JobAction::Sync))
    }

    fn store_at_t0() -> (Arc<FixedClock>, InMemoryJobStore) {
        let clock = Arc::new(FixedClock::new(t0()));
        let store = InMemoryJobStore::with_clock(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn add_generates_action_prefixed_names() {
        let (_, store) = store_at_t0();
        let a = store.add(sync_job("repo")).await.unwrap();
        let b = store.add(sync_job("repo")).await.unwrap();

        assert!(a.key.name.starts_with("sync-"));
        assert_ne!(a.key, b.key);
        assert_eq!(a.created_at, t0());
    }

    #[tokio::test]
    async fn add_with_explicit_name_conflicts_on_duplicate() {
        let (_, store) = store_at_t0();
        store.add(sync_job("repo").with_name("fixed")).await.unwrap();
        let err = store
            .add(sync_job("repo").with_name("fixed"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Conflict(JobKey::new("ns", "fixed")));
    }

    #[tokio::test]
    async fn add_notifies_subscribers() {
        let (_, store) = store_at_t0();
        let mut signal = store.subscribe();
        store.add(sync_job("repo")).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), signal.changed())
            .await
            .expect("insert should signal");
    }

    #[tokio::test]
    async fn concurrent_claims_hand_out_each_job_once() {
        let (_, store) = store_at_t0();
        let store = Arc::new(store);
        for i in 0..20 {
            store
                .add(sync_job("repo").with_name(format!("job-{i:02}")))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let driver = DriverId::generate();
                let mut mine = Vec::new();
                while let Some(job) = store.claim_next(&driver, LEASE).await.unwrap() {
                    mine.push(job.key);
                }
                mine
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 20);
    }

    #[tokio::test]
    async fn lease_expiry_follows_the_store_clock() {
        let (clock, store) = store_at_t0();
        let job = store.add(sync_job("repo")).await.unwrap();
        let first = DriverId::generate();
        let second = DriverId::generate();

        let stale = store
            .claim_next(&first, LEASE)
            .await
            .unwrap()
            .unwrap()
            .lease_token()
            .unwrap();
        assert!(store.claim_next(&second, LEASE).await.unwrap().is_none());

        clock.advance(LEASE);
        let reclaimed = store.claim_next(&second, LEASE).await.unwrap().unwrap();
        assert_eq!(reclaimed.key, job.key);

        let err = store.renew_lease(&job.key, &stale, LEASE).await.unwrap_err();
        assert!(matches!(err, StoreError::LeaseLost { .. }));
    }

    #[tokio::test]
    async fn cleanup_uses_retention_relative_to_now() {
        let (clock, store) = store_at_t0();
        let driver = DriverId::generate();
        let job = store.add(sync_job("repo")).await.unwrap();
        let token = store
            .claim_next(&driver, LEASE)
            .await
            .unwrap()
            .and_then(|claimed| claimed.lease_token())
            .unwrap();
        store
            .finalize(&job.key, &token, &Verdict::succeeded("ok"))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(60));
        assert_eq!(store.cleanup(Duration::from_secs(120)).await.unwrap(), 0);
        clock.advance(Duration::from_secs(61));
        assert_eq!(store.cleanup(Duration::from_secs(120)).await.unwrap(), 1);
        assert!(matches!(
            store.get(&job.key).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(t0()));
        let driver = DriverId::generate();

        let (key, token) = {
            let store = FileJobStore::open_with_clock(&path, clock.clone())
                .await
                .unwrap();
            let job = store.add(sync_job("repo")).await.unwrap();
            let token = store
                .claim_next(&driver, LEASE)
                .await
                .unwrap()
                .and_then(|claimed| claimed.lease_token())
                .unwrap();
            store.mark_running(&job.key, &token).await.unwrap();
            (job.key, token)
        };

        let reopened = FileJobStore::open_with_clock(&path, clock).await.unwrap();
        let record = reopened.get(&key).await.unwrap();
        assert_eq!(record.status.state, JobState::Running);
        assert_eq!(record.status.claimed_by, Some(driver));

        // the lease is still honoured after restart
        reopened
            .finalize(&key, &token, &Verdict::succeeded("ok"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn file_store_rejects_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        let err = FileJobStore::open(&path).await.err().unwrap();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn unreadable_snapshot_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::create_dir_all(&path).unwrap();

        let err = FileJobStore::open(&path).await.err().unwrap();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
