//! DriverConfig - ドライバの設定
//!
//! Every field has a default, so an empty TOML file is a valid config.
//! Durations are plain milliseconds in the file and `Duration` in code.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::backoff::Backoff;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Parallel execution slots.
    #[serde(default = "default_slots")]
    pub slots: usize,

    #[serde(default = "default_lease_duration_ms")]
    pub lease_duration_ms: u64,

    /// Must be shorter than the lease.
    #[serde(default = "default_renew_interval_ms")]
    pub renew_interval_ms: u64,

    #[serde(default = "default_max_job_duration_ms")]
    pub max_job_duration_ms: u64,

    /// Idle poll period. Insert notifications wake slots earlier.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,

    #[serde(default = "default_reap_interval_ms")]
    pub reap_interval_ms: u64,

    /// How long terminal records stay in the store.
    #[serde(default = "default_job_retention_ms")]
    pub job_retention_ms: u64,

    /// Prune history older than this. Absent keeps history forever.
    #[serde(default)]
    pub history_retention_ms: Option<u64>,

    #[serde(default = "default_history_timeout_ms")]
    pub history_timeout_ms: u64,

    #[serde(default = "default_finalize_attempts")]
    pub finalize_attempts: u32,

    /// Delete each record as soon as it is finalized.
    #[serde(default)]
    pub ephemeral_jobs: bool,

    #[serde(default)]
    pub backoff: Backoff,
}

fn default_slots() -> usize {
    3
}

fn default_lease_duration_ms() -> u64 {
    60_000
}

fn default_renew_interval_ms() -> u64 {
    30_000
}

fn default_max_job_duration_ms() -> u64 {
    20 * 60_000
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

fn default_cleanup_interval_ms() -> u64 {
    60_000
}

fn default_reap_interval_ms() -> u64 {
    30_000
}

fn default_job_retention_ms() -> u64 {
    5 * 60_000
}

fn default_history_timeout_ms() -> u64 {
    5_000
}

fn default_finalize_attempts() -> u32 {
    3
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            slots: default_slots(),
            lease_duration_ms: default_lease_duration_ms(),
            renew_interval_ms: default_renew_interval_ms(),
            max_job_duration_ms: default_max_job_duration_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            reap_interval_ms: default_reap_interval_ms(),
            job_retention_ms: default_job_retention_ms(),
            history_retention_ms: None,
            history_timeout_ms: default_history_timeout_ms(),
            finalize_attempts: default_finalize_attempts(),
            ephemeral_jobs: false,
            backoff: Backoff::default(),
        }
    }
}

impl DriverConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slots == 0 {
            return Err(ConfigError::Invalid("slots must be at least 1".into()));
        }
        let durations = [
            ("lease_duration_ms", self.lease_duration_ms),
            ("renew_interval_ms", self.renew_interval_ms),
            ("max_job_duration_ms", self.max_job_duration_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("cleanup_interval_ms", self.cleanup_interval_ms),
            ("reap_interval_ms", self.reap_interval_ms),
            ("history_timeout_ms", self.history_timeout_ms),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, ms)| *ms == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be positive")));
        }
        if self.renew_interval_ms >= self.lease_duration_ms {
            return Err(ConfigError::Invalid(format!(
                "renew_interval_ms ({}) must be shorter than lease_duration_ms ({})",
                self.renew_interval_ms, self.lease_duration_ms
            )));
        }
        if self.history_retention_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "history_retention_ms must be positive; omit it to keep history".into(),
            ));
        }
        if self.finalize_attempts == 0 {
            return Err(ConfigError::Invalid("finalize_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis(self.renew_interval_ms)
    }

    pub fn max_job_duration(&self) -> Duration {
        Duration::from_millis(self.max_job_duration_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_millis(self.job_retention_ms)
    }

    pub fn history_retention(&self) -> Option<Duration> {
        self.history_retention_ms.map(Duration::from_millis)
    }

    pub fn history_timeout(&self) -> Duration {
        Duration::from_millis(self.history_timeout_ms)
    }
}
