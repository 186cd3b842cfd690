//! Startup repair before any worker runs.
//!
//! Re-validates every Completed job's artifact, requeues interrupted work,
//! removes leftover temp files, and rebuilds progress counters from the
//! repaired queue. After `prepare` the queue only claims Pending work and
//! every Completed job has a verified artifact.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;

use crate::job::{Job, JobKind, JobStatus};
use crate::progress::ProgressTracker;
use crate::queue::JobQueue;
use crate::storage::Storage;
use crate::validator::{DataValidator, Integrity};

#[derive(Debug, Clone, Copy, Default)]
pub struct ResumeOptions {
    /// Give Failed jobs a fresh retry budget.
    pub retry_failed: bool,
}

/// A Completed job sent back to Pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemotedJob {
    pub job_id: String,
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ResumeReport {
    /// Completed jobs whose artifact still matches the ledger.
    pub verified: u64,
    pub demoted: Vec<DemotedJob>,
    /// InProgress jobs from an interrupted run, now Pending again.
    pub requeued_interrupted: u64,
    pub partials_removed: u64,
    pub failed_reset: u64,
}

impl ResumeReport {
    /// True when nothing had to be repaired.
    pub fn is_clean(&self) -> bool {
        self.demoted.is_empty() && self.requeued_interrupted == 0 && self.partials_removed == 0
    }
}

pub struct ResumeManager {
    queue: JobQueue,
    progress: ProgressTracker,
    validator: Arc<DataValidator>,
    storage: Arc<dyn Storage>,
}

impl ResumeManager {
    pub fn new(
        queue: JobQueue,
        progress: ProgressTracker,
        validator: Arc<DataValidator>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            queue,
            progress,
            validator,
            storage,
        }
    }

    pub async fn prepare(&self, opts: ResumeOptions) -> Result<ResumeReport> {
        let mut report = ResumeReport::default();
        if opts.retry_failed {
            report.failed_reset = self.queue.reset_failed().await?;
            if report.failed_reset > 0 {
                tracing::info!(jobs = report.failed_reset, "failed jobs reset for retry");
            }
        }

        for job in self.queue.snapshot().await? {
            match job.status {
                JobStatus::Completed => self.verify_completed(&job, &mut report).await?,
                JobStatus::InProgress => {
                    self.remove_partial(&job, &mut report).await;
                    if self
                        .queue
                        .demote(&job.id, "interrupted before completion")
                        .await?
                    {
                        report.requeued_interrupted += 1;
                        tracing::info!(job_id = %job.id, "requeued interrupted job");
                    }
                }
                JobStatus::Pending | JobStatus::Failed => {
                    self.remove_partial(&job, &mut report).await;
                }
            }
        }

        self.reconcile_progress().await?;
        tracing::info!(
            verified = report.verified,
            demoted = report.demoted.len(),
            requeued = report.requeued_interrupted,
            partials_removed = report.partials_removed,
            "resume check finished"
        );
        Ok(report)
    }

    async fn verify_completed(&self, job: &Job, report: &mut ResumeReport) -> Result<()> {
        let key = job.artifact_key();
        let integrity = match self.validator.validate_existing(&key).await {
            Ok(integrity) => integrity,
            Err(e) => {
                tracing::warn!(job_id = %job.id, %key, error = %e, "could not read artifact");
                Integrity::Missing
            }
        };
        if integrity.is_valid() {
            report.verified += 1;
            return Ok(());
        }
        let reason = integrity.describe();
        tracing::warn!(job_id = %job.id, %key, %reason, "completed artifact failed integrity; requeueing");
        if self.queue.demote(&job.id, &reason).await? {
            report.demoted.push(DemotedJob {
                job_id: job.id.clone(),
                key,
                reason,
            });
        }
        Ok(())
    }

    async fn remove_partial(&self, job: &Job, report: &mut ResumeReport) {
        let key = job.artifact_key();
        match self.storage.remove_partial(&key).await {
            Ok(true) => {
                report.partials_removed += 1;
                tracing::debug!(job_id = %job.id, %key, "removed partial artifact");
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(job_id = %job.id, %key, error = %e, "could not remove partial artifact"),
        }
    }

    /// `completed` = Completed jobs, `total` = known jobs (never below a total
    /// reported by the source), per (kind, congress).
    async fn reconcile_progress(&self) -> Result<()> {
        let mut per_target: BTreeMap<(JobKind, u32), (u64, u64)> = BTreeMap::new();
        for job in self.queue.snapshot().await? {
            let entry = per_target.entry((job.kind, job.congress)).or_default();
            if job.status == JobStatus::Completed {
                entry.0 += 1;
            }
            entry.1 += 1;
        }
        for ((kind, congress), (completed, jobs)) in per_target {
            let known_total = self
                .progress
                .get(kind, congress)
                .await?
                .map(|r| r.total)
                .unwrap_or(0);
            self.progress
                .reconcile(kind, congress, completed, jobs.max(known_total))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
