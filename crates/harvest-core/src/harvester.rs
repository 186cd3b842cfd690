//! Operational entry point: wires the components together for each command.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::compress::{AutoCompressReport, CompressedStorage};
use crate::config::{HarvestConfig, StatePaths};
use crate::db::{StateDb, STATE_DB_FILE};
use crate::job::{FailureNote, JobKind, JobMetadata, JobStatus, StatusCounts};
use crate::progress::{OverallProgress, ProgressRecord, ProgressTracker};
use crate::queue::JobQueue;
use crate::rate_limiter::RateLimiter;
use crate::resume::{ResumeManager, ResumeOptions, ResumeReport};
use crate::scheduler::{CancelToken, FetchContext, ParallelFetcher, RunSummary};
use crate::source::Source;
use crate::storage::{FsStorage, Storage};
use crate::validator::{DataValidator, Integrity};

/// Jobs added by [`Harvester::seed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub created: u64,
    pub existing: u64,
}

/// Everything one `run` or `resume` did.
#[derive(Debug)]
pub struct HarvestOutcome {
    pub resume: ResumeReport,
    pub seeded: Option<SeedReport>,
    pub summary: RunSummary,
}

/// Snapshot for the `status` command.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub counts: StatusCounts,
    pub overall: OverallProgress,
    pub records: Vec<ProgressRecord>,
    pub recent_failures: Vec<FailureNote>,
}

/// A Completed job whose artifact does not verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityFailure {
    pub job_id: String,
    pub key: String,
    pub integrity: Integrity,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub checked: u64,
    pub failures: Vec<IntegrityFailure>,
}

/// Owns the state database, artifact store, and checksum ledger for one
/// state directory. Rate limiter and worker pool are built per run.
pub struct Harvester {
    cfg: HarvestConfig,
    paths: StatePaths,
    db: StateDb,
    queue: JobQueue,
    storage: Arc<FsStorage>,
    validator: Arc<DataValidator>,
    source: Arc<dyn Source>,
    cancel: CancelToken,
}

impl Harvester {
    pub async fn open(cfg: HarvestConfig, source: Arc<dyn Source>, paths: StatePaths) -> Result<Self> {
        cfg.validate()?;
        let policy = cfg.retry_policy()?;
        tokio::fs::create_dir_all(&paths.state_dir)
            .await
            .with_context(|| format!("create state dir {}", paths.state_dir.display()))?;
        tokio::fs::create_dir_all(&paths.data_dir)
            .await
            .with_context(|| format!("create data dir {}", paths.data_dir.display()))?;

        let db = StateDb::open_at(paths.state_dir.join(STATE_DB_FILE))
            .await
            .context("open state database")?;
        let queue = JobQueue::new(db.clone(), policy);
        let storage = Arc::new(FsStorage::new(&paths.data_dir));
        let validator = Arc::new(DataValidator::open(&paths.state_dir, storage.clone()).await?);
        tracing::debug!(
            state_dir = %paths.state_dir.display(),
            data_dir = %paths.data_dir.display(),
            "harvester opened"
        );
        Ok(Self {
            cfg,
            paths,
            db,
            queue,
            storage,
            validator,
            source,
            cancel: CancelToken::new(),
        })
    }

    /// Token that stops the worker pool cooperatively (wired to Ctrl-C by the CLI).
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn paths(&self) -> &StatePaths {
        &self.paths
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.cfg
    }

    /// Progress tracker whose ETA clock starts now.
    pub async fn progress_tracker(&self) -> Result<ProgressTracker> {
        ProgressTracker::start(&self.db).await
    }

    /// Repair state left by a previous run. See [`ResumeManager::prepare`].
    pub async fn prepare(&self, opts: ResumeOptions) -> Result<ResumeReport> {
        let manager = ResumeManager::new(
            self.queue.clone(),
            self.progress_tracker().await?,
            self.validator.clone(),
            self.storage.clone(),
        );
        manager.prepare(opts).await
    }

    /// Enqueue the first page of every (kind, congress) pair.
    pub async fn seed(&self, congresses: &[u32], kinds: &[JobKind]) -> Result<SeedReport> {
        let progress = self.progress_tracker().await?;
        let mut report = SeedReport::default();
        for &congress in congresses {
            for &kind in kinds {
                let e = self
                    .queue
                    .enqueue(kind, congress, JobMetadata::default())
                    .await?;
                if e.created {
                    progress.grow_total(kind, congress, 1).await?;
                    report.created += 1;
                } else {
                    report.existing += 1;
                }
            }
        }
        tracing::info!(created = report.created, existing = report.existing, "seeded jobs");
        Ok(report)
    }

    /// Drain the queue with `max_workers` workers. `progress` is the tracker
    /// workers update; pass the same one to any progress display.
    pub async fn execute(&self, max_workers: usize, progress: ProgressTracker) -> RunSummary {
        let ctx = FetchContext {
            queue: self.queue.clone(),
            limiter: Arc::new(RateLimiter::new(&self.cfg.rate_limit)),
            source: Arc::clone(&self.source),
            storage: self.storage.clone() as Arc<dyn Storage>,
            validator: self.validator.clone(),
            progress,
            shape: self.cfg.shape.clone(),
            request_timeout: self.cfg.request_timeout(),
            max_consecutive_storage_failures: self.cfg.max_consecutive_storage_failures,
        };
        ParallelFetcher::new(ctx, self.cancel.clone())
            .run(max_workers)
            .await
    }

    /// Repair, seed, and drain.
    pub async fn run(
        &self,
        max_workers: usize,
        congresses: &[u32],
        kinds: &[JobKind],
    ) -> Result<HarvestOutcome> {
        let resume = self.prepare(ResumeOptions::default()).await?;
        let seeded = self.seed(congresses, kinds).await?;
        let summary = self.execute(max_workers, self.progress_tracker().await?).await;
        Ok(HarvestOutcome {
            resume,
            seeded: Some(seeded),
            summary,
        })
    }

    /// Repair and drain whatever is left in the queue.
    pub async fn resume(&self, max_workers: usize, retry_failed: bool) -> Result<HarvestOutcome> {
        let resume = self.prepare(ResumeOptions { retry_failed }).await?;
        let summary = self.execute(max_workers, self.progress_tracker().await?).await;
        Ok(HarvestOutcome {
            resume,
            seeded: None,
            summary,
        })
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let progress = self.progress_tracker().await?;
        Ok(StatusReport {
            counts: self.queue.counts().await?,
            overall: progress.overall_progress().await?,
            records: progress.records().await?,
            recent_failures: self.queue.recent_failures(self.cfg.recent_failures).await?,
        })
    }

    /// Re-verify every Completed job's artifact. Read-only: nothing is demoted.
    pub async fn validate_all(&self) -> Result<ValidationReport> {
        let mut report = ValidationReport::default();
        for job in self.queue.snapshot().await? {
            if job.status != JobStatus::Completed {
                continue;
            }
            report.checked += 1;
            let key = job.artifact_key();
            let integrity = self
                .validator
                .validate_existing(&key)
                .await
                .with_context(|| format!("validate {}", key))?;
            if !integrity.is_valid() {
                tracing::warn!(job_id = %job.id, %key, integrity = %integrity.describe(), "integrity failure");
                report.failures.push(IntegrityFailure {
                    job_id: job.id,
                    key,
                    integrity,
                });
            }
        }
        tracing::info!(checked = report.checked, failures = report.failures.len(), "validation finished");
        Ok(report)
    }

    /// Gzip verified artifacts not modified for `age`.
    pub async fn compress_aged(&self, age: Duration) -> Result<AutoCompressReport> {
        CompressedStorage::new(
            self.storage.clone(),
            self.validator.clone(),
            self.cfg.compression.level,
        )
        .auto_compress_older_than(age)
        .await
    }
}
