//! LeaseRenewer - 実行中ジョブの lease を延長し続ける
//!
//! Runs beside the worker. Any sign that the lease is gone cancels
//! `lost`, which makes the slot abandon the job without finalizing:
//! - the store answers `LeaseLost` (or `NotFound`)
//! - the store stays unavailable until the last granted expiry passes

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::driver::DriverShared;
use crate::domain::{JobKey, LeaseToken};

pub(crate) struct LeaseRenewer {
    shared: Arc<DriverShared>,
    key: JobKey,
    token: LeaseToken,
    expiry: DateTime<Utc>,
    lost: CancellationToken,
    stop: CancellationToken,
}

impl LeaseRenewer {
    pub(crate) fn new(
        shared: Arc<DriverShared>,
        key: JobKey,
        token: LeaseToken,
        expiry: DateTime<Utc>,
        lost: CancellationToken,
        stop: CancellationToken,
    ) -> Self {
        Self {
            shared,
            key,
            token,
            expiry,
            lost,
            stop,
        }
    }

    fn remaining(&self) -> Duration {
        (self.expiry - self.shared.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub(crate) async fn run(mut self) {
        let config = &self.shared.config;
        let renew_interval = config.renew_interval();
        let mut wait = renew_interval;
        let mut failures = 0u32;

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }

            let result = self
                .shared
                .store
                .renew_lease(&self.key, &self.token, config.lease_duration())
                .await;
            match result {
                Ok(expiry) => {
                    tracing::debug!(job = %self.key, %expiry, "lease renewed");
                    self.expiry = expiry;
                    failures = 0;
                    wait = renew_interval;
                }
                Err(e) if e.is_transient() => {
                    let remaining = self.remaining();
                    if remaining.is_zero() {
                        tracing::warn!(
                            job = %self.key,
                            error = %e,
                            "lease expired while the store was unavailable"
                        );
                        self.lost.cancel();
                        return;
                    }
                    failures += 1;
                    wait = config.backoff.delay(failures).min(remaining);
                    tracing::warn!(
                        job = %self.key,
                        error = %e,
                        retry_in_ms = wait.as_millis() as u64,
                        "lease renewal failed, retrying"
                    );
                }
                Err(e) => {
                    tracing::warn!(job = %self.key, error = %e, "lease lost");
                    self.lost.cancel();
                    return;
                }
            }
        }
    }
}
