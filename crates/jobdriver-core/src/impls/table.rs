//! JobTable: the leasing state machine shared by every store backend.
//!
//! Design:
//! - This is the single source of truth for job records.
//! - Each public method is one conditional update: it checks ownership,
//!   state and lease expiry, then writes. Backends call it while holding
//!   their lock, which is what makes claim / renew / finalize atomic.
//! - Ownership is a `LeaseToken` (driver id + claim number), so a reclaim
//!   fences out the previous claim even when the same driver makes it.
//! - `revision` is a table-wide counter; every write stamps it into the
//!   record's `resource_version`, so versions are unique and increasing.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::status::JobCounts;
use crate::domain::{
    DriverId, JobFilter, JobKey, JobProgress, JobRecord, JobState, LeaseToken, NewJob, StoreError,
    Verdict,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobTable {
    revision: u64,
    jobs: BTreeMap<JobKey, JobRecord>,
}

/// On-disk form of a table. Records are a list since keys are not strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub revision: u64,
    pub jobs: Vec<JobRecord>,
}

impl From<&JobTable> for TableSnapshot {
    fn from(table: &JobTable) -> Self {
        Self {
            revision: table.revision,
            jobs: table.jobs.values().cloned().collect(),
        }
    }
}

impl From<TableSnapshot> for JobTable {
    fn from(snapshot: TableSnapshot) -> Self {
        // never hand out a version lower than one already stored
        let highest = snapshot
            .jobs
            .iter()
            .map(|r| r.resource_version)
            .max()
            .unwrap_or(0);
        Self {
            revision: snapshot.revision.max(highest),
            jobs: snapshot
                .jobs
                .into_iter()
                .map(|r| (r.key.clone(), r))
                .collect(),
        }
    }
}

/// FIFO order: creation time, then name, then namespace.
fn fifo_key(record: &JobRecord) -> (DateTime<Utc>, &str, &str) {
    (
        record.created_at,
        record.key.name.as_str(),
        record.key.namespace.as_str(),
    )
}

/// Record whose current claim is `token` at `now`, or the reason it is not.
fn held_mut<'a>(
    jobs: &'a mut BTreeMap<JobKey, JobRecord>,
    key: &JobKey,
    token: &LeaseToken,
    now: DateTime<Utc>,
) -> Result<&'a mut JobRecord, StoreError> {
    let record = jobs
        .get_mut(key)
        .ok_or_else(|| StoreError::NotFound(key.clone()))?;
    if !record.is_held_by(token, now) {
        return Err(StoreError::LeaseLost {
            key: key.clone(),
            driver: token.holder,
        });
    }
    Ok(record)
}

impl JobTable {
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn next_revision(revision: &mut u64) -> u64 {
        *revision += 1;
        *revision
    }

    pub fn insert(
        &mut self,
        key: JobKey,
        job: NewJob,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError> {
        if key.namespace.is_empty() || key.name.is_empty() {
            return Err(StoreError::Invalid(format!(
                "job key {key} needs a namespace and a name"
            )));
        }
        if job.spec.repository.is_empty() {
            return Err(StoreError::Invalid(format!("job {key} has no repository")));
        }
        job.spec
            .options
            .validate()
            .map_err(|message| StoreError::Invalid(format!("job {key}: {message}")))?;
        if self.jobs.contains_key(&key) {
            return Err(StoreError::Conflict(key));
        }

        let mut record = JobRecord::new(key.clone(), job, now);
        record.resource_version = Self::next_revision(&mut self.revision);
        self.jobs.insert(key, record.clone());
        Ok(record)
    }

    pub fn get(&self, key: &JobKey) -> Result<&JobRecord, StoreError> {
        self.jobs
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    pub fn list(&self, filter: &JobFilter) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self
            .jobs
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| fifo_key(a).cmp(&fifo_key(b)));
        records
    }

    pub fn claim_next(
        &mut self,
        driver: &DriverId,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Option<JobRecord> {
        let key = self
            .jobs
            .values()
            .filter(|r| r.is_claimable(now))
            .min_by(|a, b| fifo_key(a).cmp(&fifo_key(b)))
            .map(|r| r.key.clone())?;

        let record = self.jobs.get_mut(&key)?;
        if record.status.state.is_leased() {
            // expired lease: the previous owner is presumed dead
            record.release();
        }
        record.claim(*driver, lease, now);
        record.resource_version = Self::next_revision(&mut self.revision);
        Some(record.clone())
    }

    pub fn mark_running(
        &mut self,
        key: &JobKey,
        token: &LeaseToken,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError> {
        let record = held_mut(&mut self.jobs, key, token, now)?;
        record.start(now);
        record.resource_version = Self::next_revision(&mut self.revision);
        Ok(record.clone())
    }

    pub fn renew(
        &mut self,
        key: &JobKey,
        token: &LeaseToken,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        let record = held_mut(&mut self.jobs, key, token, now)?;
        let expiry = record.extend_lease(lease, now);
        record.resource_version = Self::next_revision(&mut self.revision);
        Ok(expiry)
    }

    pub fn update_progress(
        &mut self,
        key: &JobKey,
        token: &LeaseToken,
        progress: &JobProgress,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let record = held_mut(&mut self.jobs, key, token, now)?;
        if record.status.progress == *progress {
            return Ok(());
        }
        record.status.progress = progress.clone();
        record.resource_version = Self::next_revision(&mut self.revision);
        Ok(())
    }

    pub fn finalize(
        &mut self,
        key: &JobKey,
        token: &LeaseToken,
        verdict: &Verdict,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError> {
        let record = held_mut(&mut self.jobs, key, token, now)?;
        record.finish(verdict, now);
        record.resource_version = Self::next_revision(&mut self.revision);
        Ok(record.clone())
    }

    pub fn requeue_expired(&mut self, now: DateTime<Utc>) -> Vec<JobKey> {
        let mut requeued = Vec::new();
        for record in self.jobs.values_mut() {
            if record.status.state.is_leased() && record.is_claimable(now) {
                record.release();
                record.resource_version = Self::next_revision(&mut self.revision);
                requeued.push(record.key.clone());
            }
        }
        requeued
    }

    /// Delete terminal records finished before `cutoff`.
    pub fn cleanup(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, r| !r.finished_before(cutoff));
        let removed = before - self.jobs.len();
        if removed > 0 {
            Self::next_revision(&mut self.revision);
        }
        removed
    }

    pub fn remove(&mut self, key: &JobKey) -> Result<JobRecord, StoreError> {
        let record = self
            .jobs
            .remove(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        Self::next_revision(&mut self.revision);
        Ok(record)
    }

    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for record in self.jobs.values() {
            match record.status.state {
                JobState::Pending => counts.pending += 1,
                JobState::Claimed => counts.claimed += 1,
                JobState::Running => counts.running += 1,
                JobState::Succeeded => counts.succeeded += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobAction, JobOptions};
    use chrono::TimeZone;

    const LEASE: Duration = Duration::from_secs(30);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    fn sync_job() -> NewJob {
        NewJob::for_repository("ns", "repo", JobOptions::default_for(JobAction::Sync))
    }

    fn insert(table: &mut JobTable, name: &str, at: DateTime<Utc>) -> JobKey {
        let key = JobKey::new("ns", name);
        table.insert(key.clone(), sync_job(), at).unwrap();
        key
    }

    #[test]
    fn insert_rejects_duplicate_names() {
        let mut table = JobTable::default();
        insert(&mut table, "a", t0());
        let err = table
            .insert(JobKey::new("ns", "a"), sync_job(), t0())
            .unwrap_err();
        assert_eq!(err, StoreError::Conflict(JobKey::new("ns", "a")));

        // same name in another namespace is fine
        assert!(table.insert(JobKey::new("other", "a"), sync_job(), t0()).is_ok());
    }

    #[test]
    fn insert_rejects_invalid_options() {
        let mut table = JobTable::default();
        let job = NewJob::for_repository("ns", "repo", JobOptions::default_for(JobAction::Delete));
        let err = table.insert(JobKey::new("ns", "d"), job, t0()).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[test]
    fn claim_next_is_fifo_with_name_tie_break() {
        let mut table = JobTable::default();
        insert(&mut table, "late", t0() + secs(1));
        insert(&mut table, "b", t0());
        insert(&mut table, "a", t0());
        let driver = DriverId::generate();

        let names: Vec<String> = (0..3)
            .map(|_| table.claim_next(&driver, LEASE, t0() + secs(2)).unwrap().key.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "late"]);
        assert!(table.claim_next(&driver, LEASE, t0() + secs(2)).is_none());
    }

    #[test]
    fn claim_stamps_owner_lease_and_attempts() {
        let mut table = JobTable::default();
        insert(&mut table, "a", t0());
        let driver = DriverId::generate();

        let claimed = table.claim_next(&driver, LEASE, t0()).unwrap();
        assert_eq!(claimed.status.state, JobState::Claimed);
        assert_eq!(claimed.status.claimed_by, Some(driver));
        assert_eq!(claimed.status.lease_expiry, Some(t0() + secs(30)));
        assert_eq!(claimed.status.attempts, 1);
    }

    #[test]
    fn held_job_is_not_claimable_until_lease_expires() {
        let mut table = JobTable::default();
        let key = insert(&mut table, "a", t0());
        let first = DriverId::generate();
        let second = DriverId::generate();

        let token = table.claim_next(&first, LEASE, t0()).unwrap().lease_token().unwrap();
        table.mark_running(&key, &token, t0()).unwrap();
        assert!(table.claim_next(&second, LEASE, t0() + secs(29)).is_none());

        let reclaimed = table.claim_next(&second, LEASE, t0() + secs(30)).unwrap();
        assert_eq!(reclaimed.status.claimed_by, Some(second));
        assert_eq!(reclaimed.status.state, JobState::Claimed);
        assert_eq!(reclaimed.status.attempts, 2);
        // started_at survives the reclaim
        assert_eq!(reclaimed.status.started_at, Some(t0()));
    }

    #[test]
    fn renew_requires_live_ownership() {
        let mut table = JobTable::default();
        let key = insert(&mut table, "a", t0());
        let owner = table
            .claim_next(&DriverId::generate(), LEASE, t0())
            .unwrap()
            .lease_token()
            .unwrap();
        let other = LeaseToken {
            holder: DriverId::generate(),
            claim: owner.claim,
        };

        let expiry = table.renew(&key, &owner, LEASE, t0() + secs(20)).unwrap();
        assert_eq!(expiry, t0() + secs(50));

        let err = table.renew(&key, &other, LEASE, t0() + secs(21)).unwrap_err();
        assert!(matches!(err, StoreError::LeaseLost { .. }));

        // expired, even though nobody else claimed it
        let err = table.renew(&key, &owner, LEASE, t0() + secs(50)).unwrap_err();
        assert!(matches!(err, StoreError::LeaseLost { .. }));
    }

    #[test]
    fn finalize_after_losing_lease_leaves_new_owner_untouched() {
        let mut table = JobTable::default();
        let key = insert(&mut table, "a", t0());
        let old = DriverId::generate();
        let new = DriverId::generate();

        let stale = table.claim_next(&old, LEASE, t0()).unwrap().lease_token().unwrap();
        let taken = table.claim_next(&new, LEASE, t0() + secs(31)).unwrap();

        let err = table
            .finalize(&key, &stale, &Verdict::succeeded("done"), t0() + secs(32))
            .unwrap_err();
        assert!(matches!(err, StoreError::LeaseLost { .. }));
        assert_eq!(table.get(&key).unwrap(), &taken);
    }

    #[test]
    fn reclaim_by_the_same_driver_fences_the_stale_claim() {
        let mut table = JobTable::default();
        let key = insert(&mut table, "a", t0());
        let driver = DriverId::generate();

        // two slots of one driver: the first stalls past its lease
        let stale = table.claim_next(&driver, LEASE, t0()).unwrap().lease_token().unwrap();
        let reclaimed = table.claim_next(&driver, LEASE, t0() + secs(31)).unwrap();
        let current = reclaimed.lease_token().unwrap();
        assert_eq!(reclaimed.status.attempts, 2);
        assert_eq!(stale.holder, current.holder);

        let err = table.renew(&key, &stale, LEASE, t0() + secs(32)).unwrap_err();
        assert!(matches!(err, StoreError::LeaseLost { .. }));
        let err = table.mark_running(&key, &stale, t0() + secs(32)).unwrap_err();
        assert!(matches!(err, StoreError::LeaseLost { .. }));
        let err = table
            .update_progress(&key, &stale, &JobProgress::default(), t0() + secs(32))
            .unwrap_err();
        assert!(matches!(err, StoreError::LeaseLost { .. }));
        let err = table
            .finalize(&key, &stale, &Verdict::succeeded("late"), t0() + secs(33))
            .unwrap_err();
        assert!(matches!(err, StoreError::LeaseLost { .. }));
        assert_eq!(table.get(&key).unwrap(), &reclaimed);

        // the current claim is unaffected
        table.renew(&key, &current, LEASE, t0() + secs(34)).unwrap();
        let done = table
            .finalize(&key, &current, &Verdict::succeeded("ok"), t0() + secs(35))
            .unwrap();
        assert_eq!(done.status.state, JobState::Succeeded);
    }

    #[test]
    fn finalize_sets_terminal_state_and_finished_at() {
        let mut table = JobTable::default();
        let key = insert(&mut table, "a", t0());
        let driver = DriverId::generate();
        let token = table.claim_next(&driver, LEASE, t0()).unwrap().lease_token().unwrap();
        table.mark_running(&key, &token, t0()).unwrap();

        let done = table
            .finalize(&key, &token, &Verdict::succeeded("ok"), t0() + secs(5))
            .unwrap();
        assert_eq!(done.status.state, JobState::Succeeded);
        assert_eq!(done.status.finished_at, Some(t0() + secs(5)));
        assert!(done.status.claimed_by.is_none());

        // terminal records are never claimed again
        assert!(table.claim_next(&driver, LEASE, t0() + secs(600)).is_none());
    }

    #[test]
    fn requeue_expired_returns_only_expired_leases_to_pending() {
        let mut table = JobTable::default();
        let stale = insert(&mut table, "stale", t0());
        let fresh = insert(&mut table, "fresh", t0() + secs(1));
        let driver = DriverId::generate();
        table.claim_next(&driver, LEASE, t0()).unwrap();
        table.claim_next(&driver, LEASE, t0() + secs(20)).unwrap();

        let requeued = table.requeue_expired(t0() + secs(35));
        assert_eq!(requeued, vec![stale.clone()]);
        assert_eq!(table.get(&stale).unwrap().status.state, JobState::Pending);
        assert_eq!(table.get(&fresh).unwrap().status.state, JobState::Claimed);
    }

    #[test]
    fn cleanup_never_deletes_recently_finished_records() {
        let mut table = JobTable::default();
        let old = insert(&mut table, "a-old", t0());
        let recent = insert(&mut table, "b-recent", t0());
        let open = insert(&mut table, "c-open", t0());
        let driver = DriverId::generate();

        let first = table.claim_next(&driver, LEASE, t0()).unwrap();
        assert_eq!(first.key, old);
        let token = first.lease_token().unwrap();
        table.finalize(&old, &token, &Verdict::succeeded("ok"), t0()).unwrap();
        let second = table.claim_next(&driver, LEASE, t0()).unwrap();
        assert_eq!(second.key, recent);
        let token = second.lease_token().unwrap();
        table
            .finalize(&recent, &token, &Verdict::failed("x"), t0() + secs(100))
            .unwrap();

        let removed = table.cleanup(t0() + secs(50));
        assert_eq!(removed, 1);
        assert!(table.get(&old).is_err());
        assert!(table.get(&recent).is_ok());
        assert!(table.get(&open).is_ok());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn every_write_bumps_resource_version() {
        let mut table = JobTable::default();
        let key = insert(&mut table, "a", t0());
        let driver = DriverId::generate();

        let v0 = table.get(&key).unwrap().resource_version;
        let claimed = table.claim_next(&driver, LEASE, t0()).unwrap();
        let v1 = claimed.resource_version;
        let token = claimed.lease_token().unwrap();
        let v2 = table.mark_running(&key, &token, t0()).unwrap().resource_version;
        table.renew(&key, &token, LEASE, t0()).unwrap();
        let v3 = table.get(&key).unwrap().resource_version;

        assert!(v0 < v1 && v1 < v2 && v2 < v3);
        assert_eq!(table.revision(), v3);
    }

    #[test]
    fn snapshot_round_trip_keeps_revision_monotonic() {
        let mut table = JobTable::default();
        insert(&mut table, "a", t0());
        insert(&mut table, "b", t0());

        let mut snapshot = TableSnapshot::from(&table);
        snapshot.revision = 0;
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored = JobTable::from(serde_json::from_str::<TableSnapshot>(&json).unwrap());

        assert_eq!(restored.len(), 2);
        assert_eq!(restored.revision(), table.revision());
    }

    #[test]
    fn counts_by_state() {
        let mut table = JobTable::default();
        insert(&mut table, "a", t0());
        insert(&mut table, "b", t0());
        table.claim_next(&DriverId::generate(), LEASE, t0()).unwrap();

        let counts = table.counts();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.claimed, 1);
    }
}
