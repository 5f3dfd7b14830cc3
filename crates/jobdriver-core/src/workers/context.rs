//! JobContext - ワーカーに渡される実行コンテキスト
//!
//! キャンセルと進捗報告の 2 つだけを持つ。

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::domain::{JobKey, JobProgress, LeaseToken, WorkerError};
use crate::ports::JobStore;

/// Keep only the latest messages in the record.
const MAX_PROGRESS_MESSAGES: usize = 20;

pub struct JobContext {
    cancel: CancellationToken,
    progress: ProgressReporter,
}

impl JobContext {
    pub fn new(cancel: CancellationToken, progress: ProgressReporter) -> Self {
        Self { cancel, progress }
    }

    /// Context not bound to any store or driver. Tests and ad-hoc runs.
    pub fn detached() -> Self {
        Self::new(CancellationToken::new(), ProgressReporter::detached())
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Call between atomic sub-operations.
    pub fn checkpoint(&self) -> Result<(), WorkerError> {
        if self.cancel.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }
        Ok(())
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }
}

#[derive(Clone)]
struct ProgressSink {
    store: Arc<dyn JobStore>,
    key: JobKey,
    token: LeaseToken,
}

/// Buffers counters and messages; `flush` pushes them to the job record.
#[derive(Clone)]
pub struct ProgressReporter {
    state: Arc<Mutex<JobProgress>>,
    sink: Option<ProgressSink>,
}

impl ProgressReporter {
    pub fn new(store: Arc<dyn JobStore>, key: JobKey, token: LeaseToken) -> Self {
        Self {
            state: Arc::default(),
            sink: Some(ProgressSink { store, key, token }),
        }
    }

    pub fn detached() -> Self {
        Self {
            state: Arc::default(),
            sink: None,
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut JobProgress) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn increment(&self, counter: &str, by: u64) {
        self.with_state(|p| *p.counters.entry(counter.to_string()).or_default() += by);
    }

    pub fn message(&self, message: impl Into<String>) {
        let message = message.into();
        self.with_state(|p| {
            p.messages.push(message);
            if p.messages.len() > MAX_PROGRESS_MESSAGES {
                let excess = p.messages.len() - MAX_PROGRESS_MESSAGES;
                p.messages.drain(..excess);
            }
        });
    }

    pub fn snapshot(&self) -> JobProgress {
        self.with_state(|p| p.clone())
    }

    /// Best effort: failures are logged, never returned.
    pub async fn flush(&self) {
        let Some(sink) = &self.sink else {
            return;
        };
        let progress = self.snapshot();
        if let Err(e) = sink
            .store
            .update_progress(&sink.key, &sink.token, &progress)
            .await
        {
            tracing::debug!(job = %sink.key, error = %e, "progress update dropped");
        }
    }
}
