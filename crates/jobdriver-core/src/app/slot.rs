//! Slot - ドライバの実行スロット
//!
//! Each slot loops Idle → Claiming → Executing → Finalizing → Idle.
//!
//! # 不変条件
//! - A job whose lease was lost is neither finalized nor written to history.
//! - Every finalize attempt sequence is followed by exactly one history append.
//! - Store errors never end the loop; only shutdown does.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::driver::DriverShared;
use super::lease::LeaseRenewer;
use super::status::SlotOutcome;
use crate::domain::{FinalState, HistoryEntry, JobRecord, LeaseToken, StoreError, Verdict};
use crate::impls::InsertSignal;
use crate::ports::RepositoryRef;
use crate::workers::{JobContext, ProgressReporter};

pub(crate) async fn slot_loop(
    slot: usize,
    shared: Arc<DriverShared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut inserts = shared.inserts.clone();
    let mut claim_failures = 0u32;
    tracing::debug!(driver = %shared.id, slot, "slot started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let claimed = shared
            .store
            .claim_next(&shared.id, shared.config.lease_duration())
            .await;
        match claimed {
            Ok(Some(job)) => {
                claim_failures = 0;
                run_job(slot, &shared, job).await;
            }
            Ok(None) => {
                claim_failures = 0;
                tokio::select! {
                    _ = tokio::time::sleep(shared.config.poll_interval()) => {}
                    _ = next_insert(&mut inserts) => {
                        tracing::debug!(slot, "woken by insert");
                    }
                    res = shutdown.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                claim_failures += 1;
                let delay = shared.config.backoff.delay(claim_failures);
                tracing::warn!(
                    slot,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "claim failed"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    res = shutdown.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    tracing::debug!(driver = %shared.id, slot, "slot stopped");
}

async fn next_insert(inserts: &mut Option<InsertSignal>) {
    match inserts {
        Some(signal) => signal.changed().await,
        None => std::future::pending().await,
    }
}

async fn run_job(slot: usize, shared: &Arc<DriverShared>, job: JobRecord) {
    let span = tracing::info_span!(
        "job",
        job = %job.key,
        action = %job.action,
        driver = %shared.id,
        slot,
    );
    shared.stats.enter();
    let outcome = execute_claimed(shared, job).instrument(span).await;
    shared.stats.leave(outcome);
}

async fn execute_claimed(shared: &Arc<DriverShared>, claimed: JobRecord) -> SlotOutcome {
    let key = claimed.key.clone();
    let Some(token) = claimed.lease_token() else {
        tracing::warn!("claimed job carries no lease token");
        return SlotOutcome::Abandoned;
    };
    tracing::info!(attempt = claimed.status.attempts, lease = %token, "job claimed");

    let job = match shared.store.mark_running(&key, &token).await {
        Ok(record) => record,
        Err(e @ (StoreError::LeaseLost { .. } | StoreError::NotFound(_))) => {
            tracing::warn!(error = %e, "lost job before it started");
            return SlotOutcome::Abandoned;
        }
        Err(e) => {
            // 続行する。lease は renewer が確認する
            tracing::warn!(error = %e, "could not mark job running");
            claimed
        }
    };

    let Some(expiry) = job.status.lease_expiry else {
        tracing::warn!("claimed job has no lease expiry");
        return SlotOutcome::Abandoned;
    };

    let lease_lost = CancellationToken::new();
    let stop_renewing = CancellationToken::new();
    let renewer = tokio::spawn(
        LeaseRenewer::new(
            Arc::clone(shared),
            key.clone(),
            token,
            expiry,
            lease_lost.clone(),
            stop_renewing.clone(),
        )
        .run()
        .in_current_span(),
    );

    let ctx = JobContext::new(
        lease_lost.child_token(),
        ProgressReporter::new(Arc::clone(&shared.store), key.clone(), token),
    );
    let max_duration = shared.config.max_job_duration();

    let verdict = tokio::select! {
        biased;
        _ = lease_lost.cancelled() => None,
        res = tokio::time::timeout(max_duration, execute(shared, &ctx, &job)) => Some(match res {
            Ok(verdict) => verdict,
            Err(_) => Verdict::failed(format!(
                "timeout: job exceeded the maximum duration of {}s",
                max_duration.as_secs_f64()
            )),
        }),
    };
    // 中断された worker が残っていれば止める
    ctx.cancellation().cancel();
    stop_renewing.cancel();
    let _ = renewer.await;

    let Some(verdict) = verdict else {
        tracing::warn!("lease lost during execution, abandoning job");
        return SlotOutcome::Abandoned;
    };
    if lease_lost.is_cancelled() {
        // the worker finished but the lease is already gone
        tracing::warn!("lease lost before finalize, abandoning job");
        return SlotOutcome::Abandoned;
    }

    finalize_and_record(shared, &job, &token, verdict).await
}

/// Resolve the repository, pick the worker, run it.
async fn execute(shared: &DriverShared, ctx: &JobContext, job: &JobRecord) -> Verdict {
    let target = RepositoryRef::from(job);
    let repo = match shared.repos.as_repository(&target).await {
        Ok(repo) => repo,
        Err(e) => return Verdict::failed(format!("resolve repository {target}: {e}")),
    };

    let Some(worker) = shared.workers.get(job.action) else {
        return Verdict::failed(format!(
            "configuration error: no worker registered for action {}",
            job.action
        ));
    };

    match worker.process(ctx, job, repo).await {
        Ok(()) => Verdict::succeeded(format!("{} of {} completed", job.action, target)),
        Err(e) => Verdict::failed(e.to_string()).with_errors(e.item_errors()),
    }
}

async fn finalize_and_record(
    shared: &DriverShared,
    job: &JobRecord,
    token: &LeaseToken,
    verdict: Verdict,
) -> SlotOutcome {
    let attempts = shared.config.finalize_attempts;
    let mut finalized = None;

    for attempt in 1..=attempts {
        match shared.store.finalize(&job.key, token, &verdict).await {
            Ok(record) => {
                finalized = Some(record);
                break;
            }
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = shared.config.backoff.delay(attempt);
                tracing::warn!(
                    error = %e,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    "finalize failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e @ StoreError::LeaseLost { .. }) => {
                tracing::warn!(error = %e, "finalize rejected, lease lost");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, attempt, "finalize failed");
                break;
            }
        }
    }

    match &finalized {
        Some(record) => tracing::info!(
            state = %record.status.state,
            message = %verdict.message,
            "job finalized"
        ),
        None => tracing::warn!(message = %verdict.message, "job outcome not stored"),
    }

    let entry = match &finalized {
        Some(record) => HistoryEntry::from_record(
            record,
            shared.id,
            &verdict,
            record.status.finished_at.unwrap_or_else(|| shared.clock.now()),
            true,
        ),
        None => HistoryEntry::from_record(job, shared.id, &verdict, shared.clock.now(), false),
    };
    append_history(shared, entry).await;

    let Some(record) = finalized else {
        return SlotOutcome::Unfinalized;
    };
    if shared.config.ephemeral_jobs {
        if let Err(e) = shared.store.delete(&record.key).await {
            tracing::warn!(error = %e, "could not delete ephemeral job");
        }
    }
    match verdict.state {
        FinalState::Succeeded => SlotOutcome::Succeeded,
        FinalState::Failed => SlotOutcome::Failed,
    }
}

async fn append_history(shared: &DriverShared, entry: HistoryEntry) {
    let timeout = shared.config.history_timeout();
    match tokio::time::timeout(timeout, shared.history.append(entry)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "history append failed"),
        Err(_) => tracing::warn!(
            timeout_ms = timeout.as_millis() as u64,
            "history append timed out"
        ),
    }
}
