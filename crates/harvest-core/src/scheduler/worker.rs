//! One fetch worker.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use super::persist::{check_shape, persist, JobFailure};
use super::run_state::{Counters, InFlight, RunState};
use super::{CancelToken, FetchContext};
use crate::error::HarvestError;
use crate::job::{Job, JobMetadata, JobStatus};
use crate::queue::JobQueue;
use crate::retry::{FailureKind, FetchError, QueueAction};
use crate::source::{FetchRequest, Payload};

/// Where a worker is in its loop; logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Claimed,
    FetchingRemote,
    /// Upstream throttled; the job was released.
    Backoff,
    Validating,
    Persisting,
    Failed,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Claimed => "claimed",
            WorkerState::FetchingRemote => "fetching",
            WorkerState::Backoff => "backoff",
            WorkerState::Validating => "validating",
            WorkerState::Persisting => "persisting",
            WorkerState::Failed => "failed",
        }
    }
}

/// Next move of a worker that found no job and was the last one in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdleStep {
    /// Nothing Pending and nobody working: the run is over.
    Drained,
    /// A job became Pending after the failed claim.
    Retry,
    /// Only delayed retries are left.
    WaitFor(Duration),
}

/// With no worker in flight nobody can add work, so the queue alone decides.
async fn idle_step(queue: &JobQueue) -> Result<IdleStep> {
    Ok(match queue.next_claimable_in().await? {
        None => IdleStep::Drained,
        Some(wait) if wait.is_zero() => IdleStep::Retry,
        Some(wait) => IdleStep::WaitFor(wait),
    })
}

struct Worker<'a> {
    id: usize,
    ctx: &'a FetchContext,
    run: &'a RunState,
    cancel: &'a CancelToken,
    state: WorkerState,
}

pub(super) async fn run_worker(
    id: usize,
    ctx: Arc<FetchContext>,
    run: Arc<RunState>,
    cancel: CancelToken,
) {
    let mut worker = Worker {
        id,
        ctx: &ctx,
        run: &run,
        cancel: &cancel,
        state: WorkerState::Idle,
    };
    worker.run_loop().await;
    tracing::debug!(worker = id, "worker exiting");
}

impl Worker<'_> {
    fn enter(&mut self, next: WorkerState, job_id: &str) {
        tracing::trace!(
            worker = self.id,
            job_id,
            from = self.state.as_str(),
            to = next.as_str(),
            "worker state"
        );
        self.state = next;
    }

    fn stopping(&self) -> bool {
        self.cancel.is_cancelled() || self.run.halt.is_cancelled()
    }

    async fn run_loop(&mut self) {
        let run = self.run;
        while !self.stopping() {
            let flight = InFlight::enter(run);
            let claimed = match self.ctx.queue.claim_next().await {
                Ok(claimed) => claimed,
                Err(e) => {
                    drop(flight);
                    run.halt_with(HarvestError::State(e.context("claim next job")))
                        .await;
                    break;
                }
            };

            let Some(job) = claimed else {
                // Register for wake-ups before leaving flight so a job
                // finishing in between cannot be missed.
                let notified = run.wake().notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if flight.leave_idle() {
                    match idle_step(&self.ctx.queue).await {
                        Ok(IdleStep::Drained) => {
                            tracing::debug!(worker = self.id, "queue drained");
                            break;
                        }
                        Ok(IdleStep::Retry) => continue,
                        Ok(IdleStep::WaitFor(wait)) => {
                            tracing::debug!(
                                worker = self.id,
                                wait_ms = wait.as_millis() as u64,
                                "waiting for retry delay"
                            );
                            tokio::select! {
                                _ = tokio::time::sleep(wait) => continue,
                                _ = self.cancel.cancelled() => break,
                                _ = run.halt.cancelled() => break,
                            }
                        }
                        Err(e) => {
                            run.halt_with(HarvestError::State(e.context("inspect pending jobs")))
                                .await;
                            break;
                        }
                    }
                }
                tokio::select! {
                    _ = &mut notified => continue,
                    _ = self.cancel.cancelled() => break,
                    _ = run.halt.cancelled() => break,
                }
            };

            self.process(job).await;
            drop(flight);
        }
    }

    async fn process(&mut self, job: Job) {
        self.enter(WorkerState::Claimed, &job.id);
        if self.stopping() {
            self.release_untouched(&job).await;
            return;
        }

        tokio::select! {
            _ = self.ctx.limiter.acquire() => {}
            _ = self.cancel.cancelled() => {
                self.release_untouched(&job).await;
                return;
            }
            _ = self.run.halt.cancelled() => {
                self.release_untouched(&job).await;
                return;
            }
        }

        self.enter(WorkerState::FetchingRemote, &job.id);
        let request = FetchRequest::from(&job);
        let timeout = self.ctx.request_timeout;
        let fetched = match tokio::time::timeout(timeout, self.ctx.source.fetch(&request)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::transient(format!(
                "fetch timed out after {}s",
                timeout.as_secs()
            ))),
        };
        if self.cancel.is_cancelled() {
            tracing::debug!(job_id = %job.id, "cancel requested; finishing current job");
        }

        // A payload that arrived is always persisted, even when cancelled.
        let outcome = match fetched {
            Ok(payload) => self.store(&job, payload).await,
            Err(e) => Err(JobFailure::from(e)),
        };
        match outcome {
            Ok(()) => {}
            Err(failure) => self.on_failure(&job, failure).await,
        }
        self.enter(WorkerState::Idle, &job.id);
    }

    async fn store(&mut self, job: &Job, payload: Payload) -> Result<(), JobFailure> {
        self.enter(WorkerState::Validating, &job.id);
        check_shape(self.ctx, job, &payload.bytes)?;

        self.enter(WorkerState::Persisting, &job.id);
        let digest = persist(self.ctx, job, &payload.bytes).await?;
        tracing::debug!(
            job_id = %job.id,
            key = %job.artifact_key(),
            sha256 = %digest,
            bytes = payload.bytes.len(),
            "artifact stored"
        );

        if let Err(e) = self.finish_success(job, payload.next_page, payload.total_pages).await {
            self.run.halt_with(HarvestError::State(e)).await;
        }
        Ok(())
    }

    /// Progress, follow-up page, and queue bookkeeping after a stored artifact.
    async fn finish_success(
        &mut self,
        job: &Job,
        next_page: Option<String>,
        total_pages: Option<u64>,
    ) -> Result<()> {
        let progress = &self.ctx.progress;
        if let Some(pages) = total_pages {
            progress.set_total(job.kind, job.congress, pages).await?;
        }
        if let Some(token) = next_page {
            let next = self
                .ctx
                .queue
                .enqueue(job.kind, job.congress, JobMetadata::page(token))
                .await
                .context("enqueue follow-up page")?;
            if next.created {
                Counters::bump(&self.run.counters.follow_ups);
                if total_pages.is_none() {
                    progress.grow_total(job.kind, job.congress, 1).await?;
                }
                tracing::debug!(job_id = %job.id, next_job = %next.id, "enqueued next page");
            }
        }
        progress.record_completed(job.kind, job.congress, 1).await?;
        self.ctx.queue.complete(&job.id).await?;
        self.ctx.limiter.record_success().await;
        self.run.storage_ok().await;
        Counters::bump(&self.run.counters.completed);
        tracing::info!(job_id = %job.id, kind = %job.kind, congress = job.congress, "job completed");
        Ok(())
    }

    async fn on_failure(&mut self, job: &Job, failure: JobFailure) {
        match failure.kind.queue_action() {
            QueueAction::Release => self.on_throttled(job, &failure).await,
            QueueAction::Fail { permanent } => {
                self.enter(WorkerState::Failed, &job.id);
                let reason = format!("{}: {}", failure.kind.as_str(), failure.reason);
                match self.ctx.queue.fail(&job.id, permanent, &reason).await {
                    Ok(Some(JobStatus::Failed)) => {
                        Counters::bump(&self.run.counters.failed);
                        tracing::warn!(
                            job_id = %job.id,
                            kind = %job.kind,
                            congress = job.congress,
                            reason = %reason,
                            "job failed"
                        );
                    }
                    Ok(Some(_)) => {
                        Counters::bump(&self.run.counters.retried);
                        tracing::info!(
                            job_id = %job.id,
                            retries = job.retries + 1,
                            reason = %reason,
                            "job will be retried"
                        );
                    }
                    Ok(None) => {}
                    Err(e) => {
                        self.run.halt_with(HarvestError::State(e)).await;
                        return;
                    }
                }
                if failure.kind == FailureKind::StorageFailure {
                    self.on_storage_failure(job, &failure).await;
                }
            }
        }
    }

    async fn on_throttled(&mut self, job: &Job, failure: &JobFailure) {
        self.enter(WorkerState::Backoff, &job.id);
        Counters::bump(&self.run.counters.throttled);
        let limiter = &self.ctx.limiter;
        let delay = limiter.record_throttled(failure.retry_after).await;
        tracing::info!(
            job_id = %job.id,
            delay_ms = delay.as_millis() as u64,
            "throttled; job released"
        );
        if let Err(e) = self.ctx.queue.release(&job.id).await {
            self.run.halt_with(HarvestError::State(e)).await;
            return;
        }
        if limiter.is_exhausted().await {
            let snap = limiter.snapshot().await;
            self.run
                .halt_with(HarvestError::BackoffExhausted {
                    streak: snap.ceiling_streak,
                    max_backoff: limiter.max_backoff(),
                })
                .await;
        }
    }

    async fn on_storage_failure(&mut self, job: &Job, failure: &JobFailure) {
        tracing::error!(
            job_id = %job.id,
            key = %job.artifact_key(),
            error = %failure.reason,
            "storage failure"
        );
        let streak = self.run.storage_failed(&job.id).await;
        let limit = self.ctx.max_consecutive_storage_failures;
        if limit > 0 && streak >= limit {
            self.run
                .halt_with(HarvestError::RepeatedStorageFailure {
                    count: streak,
                    last: failure.reason.clone(),
                })
                .await;
        }
    }

    /// Hand a claimed job back without consuming a retry (cancel or halt).
    async fn release_untouched(&mut self, job: &Job) {
        match self.ctx.queue.release(&job.id).await {
            Ok(_) => {
                Counters::bump(&self.run.counters.released);
                tracing::debug!(job_id = %job.id, "released claimed job on stop");
            }
            Err(e) => self.run.halt_with(HarvestError::State(e)).await,
        }
        self.enter(WorkerState::Idle, &job.id);
    }
}
