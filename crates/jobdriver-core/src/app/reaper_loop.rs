//! ReaperLoop - Lease 期限切れの回収
//!
//! `claim_next` already picks up expired leases, so the reaper is not
//! needed for correctness. It makes abandoned jobs show up as Pending in
//! listings and counts instead of staying Running forever.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::driver::sleep_or_shutdown;
use crate::domain::{JobKey, StoreError};
use crate::ports::JobStore;

pub struct ReaperLoop {
    store: Arc<dyn JobStore>,
}

impl ReaperLoop {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// One pass.
    pub async fn tick(&self) -> Result<Vec<JobKey>, StoreError> {
        let requeued = self.store.requeue_expired().await?;
        for key in &requeued {
            tracing::info!(job = %key, "expired lease requeued");
        }
        Ok(requeued)
    }

    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        while !sleep_or_shutdown(interval, &mut shutdown).await {
            if let Err(e) = self.tick().await {
                tracing::warn!(error = %e, "reaper pass failed");
            }
        }
    }
}
