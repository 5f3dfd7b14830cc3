//! Job record and status management.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DriverId, JobKey};
use super::state::{FinalState, JobState};

/// What a job does. Selects the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    Sync,
    Export,
    Migrate,
    Move,
    Delete,
}

impl JobAction {
    pub const ALL: [JobAction; 5] = [
        JobAction::Sync,
        JobAction::Export,
        JobAction::Migrate,
        JobAction::Move,
        JobAction::Delete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobAction::Sync => "sync",
            JobAction::Export => "export",
            JobAction::Migrate => "migrate",
            JobAction::Move => "move",
            JobAction::Delete => "delete",
        }
    }
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobAction::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown job action {s:?}"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Only apply files whose content changed since the last sync.
    #[serde(default)]
    pub incremental: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Target branch; repository default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Directory prefix inside the repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Commit message used for every write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrateOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOptions {
    pub paths: Vec<String>,

    /// Destination directory; must end with `/`.
    pub target_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    pub paths: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
}

/// Action-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum JobOptions {
    Sync(SyncOptions),
    Export(ExportOptions),
    Migrate(MigrateOptions),
    Move(MoveOptions),
    Delete(DeleteOptions),
}

impl JobOptions {
    pub fn action(&self) -> JobAction {
        match self {
            JobOptions::Sync(_) => JobAction::Sync,
            JobOptions::Export(_) => JobAction::Export,
            JobOptions::Migrate(_) => JobAction::Migrate,
            JobOptions::Move(_) => JobAction::Move,
            JobOptions::Delete(_) => JobAction::Delete,
        }
    }

    /// Defaults for an action (incremental=false, empty path lists, ...).
    pub fn default_for(action: JobAction) -> Self {
        match action {
            JobAction::Sync => JobOptions::Sync(SyncOptions::default()),
            JobAction::Export => JobOptions::Export(ExportOptions::default()),
            JobAction::Migrate => JobOptions::Migrate(MigrateOptions::default()),
            JobAction::Move => JobOptions::Move(MoveOptions::default()),
            JobAction::Delete => JobOptions::Delete(DeleteOptions::default()),
        }
    }

    /// Shape checks that do not need the repository.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            JobOptions::Move(opts) => {
                if opts.paths.is_empty() {
                    return Err("move requires at least one path".to_string());
                }
                if !opts.target_path.ends_with('/') {
                    return Err(format!(
                        "move target {:?} must be a directory ending with '/'",
                        opts.target_path
                    ));
                }
                Ok(())
            }
            JobOptions::Delete(opts) if opts.paths.is_empty() => {
                Err("delete requires at least one path".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Target repository plus action parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub repository: String,
    pub options: JobOptions,
}

/// Request to insert a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub namespace: String,

    /// Explicit name. Generated when `None`.
    pub name: Option<String>,

    pub spec: JobSpec,
    pub labels: BTreeMap<String, String>,
}

impl NewJob {
    /// Job against `repository`, labelled with it.
    pub fn for_repository(
        namespace: impl Into<String>,
        repository: impl Into<String>,
        options: JobOptions,
    ) -> Self {
        let repository = repository.into();
        let mut labels = BTreeMap::new();
        labels.insert("repository".to_string(), repository.clone());
        Self {
            namespace: namespace.into(),
            name: None,
            spec: JobSpec {
                repository,
                options,
            },
            labels,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn action(&self) -> JobAction {
        self.spec.options.action()
    }
}

/// Counters and messages a worker reports while running.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<String, u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
}

impl JobProgress {
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.messages.is_empty()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<DriverId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expiry: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,

    #[serde(default, skip_serializing_if = "JobProgress::is_empty")]
    pub progress: JobProgress,

    /// Number of claims so far, reclaims included.
    #[serde(default)]
    pub attempts: u32,
}

impl JobStatus {
    fn pending() -> Self {
        Self {
            state: JobState::Pending,
            claimed_by: None,
            lease_expiry: None,
            started_at: None,
            finished_at: None,
            message: None,
            errors: Vec::new(),
            progress: JobProgress::default(),
            attempts: 0,
        }
    }
}

/// Outcome a driver asks the store to record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub state: FinalState,
    pub message: String,
    pub errors: Vec<String>,
}

impl Verdict {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            state: FinalState::Succeeded,
            message: message.into(),
            errors: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: FinalState::Failed,
            message: message.into(),
            errors: Vec::new(),
        }
    }

    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }
}

/// One claim on a job: the driver holding it and which claim it is.
///
/// `claim` is the record's `attempts` when the claim was granted. Every
/// reclaim bumps it, so a stale holder is fenced out even when it shares
/// the driver id of the new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseToken {
    pub holder: DriverId,
    pub claim: u32,
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.holder, self.claim)
    }
}

/// A persisted job.
///
/// State transitions happen through the methods below so that the
/// timestamp and claim invariants hold in one place; the store decides
/// *whether* a caller may perform them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub key: JobKey,
    pub action: JobAction,
    pub spec: JobSpec,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    pub created_at: DateTime<Utc>,

    /// Bumped on every write.
    pub resource_version: u64,

    pub status: JobStatus,
}

impl JobRecord {
    pub fn new(key: JobKey, new_job: NewJob, created_at: DateTime<Utc>) -> Self {
        Self {
            key,
            action: new_job.action(),
            spec: new_job.spec,
            labels: new_job.labels,
            created_at,
            resource_version: 0,
            status: JobStatus::pending(),
        }
    }

    /// Token of the current claim, if the record is leased.
    pub fn lease_token(&self) -> Option<LeaseToken> {
        if !self.status.state.is_leased() {
            return None;
        }
        self.status.claimed_by.map(|holder| LeaseToken {
            holder,
            claim: self.status.attempts,
        })
    }

    /// The claim `token` names is the current one and has not expired at `now`.
    pub fn is_held_by(&self, token: &LeaseToken, now: DateTime<Utc>) -> bool {
        self.lease_token().as_ref() == Some(token)
            && self.status.lease_expiry.is_some_and(|exp| now < exp)
    }

    /// Can `claim_next` pick this record at `now`?
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status.state {
            JobState::Pending => true,
            JobState::Claimed | JobState::Running => {
                self.status.lease_expiry.is_none_or(|exp| exp <= now)
            }
            JobState::Succeeded | JobState::Failed => false,
        }
    }

    pub fn claim(&mut self, driver: DriverId, lease: Duration, now: DateTime<Utc>) {
        self.status.state = JobState::Claimed;
        self.status.claimed_by = Some(driver);
        self.status.lease_expiry = Some(lease_deadline(now, lease));
        self.status.attempts += 1;
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        self.status.state = JobState::Running;
        if self.status.started_at.is_none() {
            self.status.started_at = Some(now);
        }
    }

    pub fn extend_lease(&mut self, lease: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
        let expiry = lease_deadline(now, lease);
        self.status.lease_expiry = Some(expiry);
        expiry
    }

    pub fn finish(&mut self, verdict: &Verdict, now: DateTime<Utc>) {
        self.status.state = verdict.state.into();
        self.status.finished_at = Some(now);
        self.status.message = Some(verdict.message.clone());
        self.status.errors = verdict.errors.clone();
        self.status.claimed_by = None;
        self.status.lease_expiry = None;
    }

    /// Back to Pending after an expired lease.
    pub fn release(&mut self) {
        self.status.state = JobState::Pending;
        self.status.claimed_by = None;
        self.status.lease_expiry = None;
    }

    /// Terminal and finished strictly before `cutoff`.
    pub fn finished_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.status.state.is_terminal() && self.status.finished_at.is_some_and(|t| t < cutoff)
    }
}

pub(crate) fn lease_deadline(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    // Durations past chrono's range saturate
    let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX);
    now.checked_add_signed(lease).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Filter for `JobStore::list`. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub namespace: Option<String>,
    pub repository: Option<String>,
    pub state: Option<JobState>,
}

impl JobFilter {
    pub fn matches(&self, record: &JobRecord) -> bool {
        self.namespace
            .as_ref()
            .is_none_or(|ns| *ns == record.key.namespace)
            && self
                .repository
                .as_ref()
                .is_none_or(|repo| *repo == record.spec.repository)
            && self.state.is_none_or(|state| state == record.status.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn record() -> JobRecord {
        let job = NewJob::for_repository("ns", "repo", JobOptions::default_for(JobAction::Sync));
        JobRecord::new(JobKey::new("ns", "job-1"), job, t0())
    }

    #[test]
    fn new_record_is_pending_and_labelled() {
        let r = record();
        assert_eq!(r.status.state, JobState::Pending);
        assert_eq!(r.action, JobAction::Sync);
        assert_eq!(r.labels.get("repository").map(String::as_str), Some("repo"));
        assert!(r.status.finished_at.is_none());
    }

    #[test]
    fn claim_then_expire_makes_record_claimable_again() {
        let mut r = record();
        let driver = DriverId::generate();
        r.claim(driver, Duration::from_secs(30), t0());
        let token = r.lease_token().unwrap();

        assert!(r.is_held_by(&token, t0()));
        assert!(!r.is_claimable(t0() + chrono::Duration::seconds(29)));
        assert!(r.is_claimable(t0() + chrono::Duration::seconds(30)));
        assert!(!r.is_held_by(&token, t0() + chrono::Duration::seconds(30)));
    }

    #[test]
    fn reclaim_by_same_driver_fences_the_old_token() {
        let mut r = record();
        let driver = DriverId::generate();
        r.claim(driver, Duration::from_secs(30), t0());
        let first = r.lease_token().unwrap();

        let later = t0() + chrono::Duration::seconds(31);
        r.release();
        r.claim(driver, Duration::from_secs(30), later);
        let second = r.lease_token().unwrap();

        assert_eq!(first.holder, second.holder);
        assert_ne!(first, second);
        assert!(r.is_held_by(&second, later));
        assert!(!r.is_held_by(&first, later));
    }

    #[test]
    fn terminal_record_has_no_lease_token() {
        let mut r = record();
        r.claim(DriverId::generate(), Duration::from_secs(30), t0());
        r.finish(&Verdict::succeeded("ok"), t0());
        assert!(r.lease_token().is_none());
    }

    #[test]
    fn started_at_is_set_once() {
        let mut r = record();
        r.start(t0());
        r.start(t0() + chrono::Duration::seconds(5));
        assert_eq!(r.status.started_at, Some(t0()));
    }

    #[test]
    fn finish_sets_finished_at_and_clears_claim() {
        let mut r = record();
        r.claim(DriverId::generate(), Duration::from_secs(30), t0());
        r.finish(&Verdict::failed("boom").with_errors(vec!["a".into()]), t0());

        assert_eq!(r.status.state, JobState::Failed);
        assert_eq!(r.status.finished_at, Some(t0()));
        assert!(r.status.claimed_by.is_none());
        assert_eq!(r.status.errors, vec!["a".to_string()]);
    }

    #[rstest]
    #[case::move_without_paths(JobOptions::Move(MoveOptions { target_path: "dst/".into(), ..Default::default() }), false)]
    #[case::move_to_file(JobOptions::Move(MoveOptions { paths: vec!["a.json".into()], target_path: "dst".into(), git_ref: None }), false)]
    #[case::move_ok(JobOptions::Move(MoveOptions { paths: vec!["a.json".into()], target_path: "dst/".into(), git_ref: None }), true)]
    #[case::delete_without_paths(JobOptions::default_for(JobAction::Delete), false)]
    #[case::sync(JobOptions::default_for(JobAction::Sync), true)]
    fn options_validation(#[case] options: JobOptions, #[case] ok: bool) {
        assert_eq!(options.validate().is_ok(), ok);
    }

    #[test]
    fn options_serialize_with_action_tag() {
        let json = serde_json::to_value(JobOptions::Sync(SyncOptions { incremental: true })).unwrap();
        assert_eq!(json, serde_json::json!({ "action": "sync", "incremental": true }));
    }

    #[test]
    fn filter_matches_on_all_given_fields() {
        let r = record();
        assert!(JobFilter::default().matches(&r));
        let f = JobFilter {
            namespace: Some("ns".into()),
            state: Some(JobState::Running),
            ..Default::default()
        };
        assert!(!f.matches(&r));
    }
}
