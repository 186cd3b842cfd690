//! Worker pool that drains the job queue.
//!
//! Each worker loops: claim a job, wait for the rate limiter, fetch, validate,
//! persist, record the checksum, bump progress, complete. Failures are mapped
//! to queue transitions through [`FailureKind`](crate::retry::FailureKind);
//! a single failed job never stops the pool. Only systemic conditions
//! (upstream throttling pinned at the backoff ceiling, repeated storage
//! failures, an unusable state database) halt the run.

mod cancel;
mod persist;
mod run_state;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use crate::config::ShapeConfig;
use crate::error::HarvestError;
use crate::job::StatusCounts;
use crate::progress::ProgressTracker;
use crate::queue::JobQueue;
use crate::rate_limiter::RateLimiter;
use crate::source::Source;
use crate::storage::Storage;
use crate::validator::DataValidator;

pub use cancel::CancelToken;
pub use worker::WorkerState;

use run_state::RunState;

/// Everything a worker needs. Built once per run.
pub struct FetchContext {
    pub queue: JobQueue,
    pub limiter: Arc<RateLimiter>,
    pub source: Arc<dyn Source>,
    pub storage: Arc<dyn Storage>,
    pub validator: Arc<DataValidator>,
    pub progress: ProgressTracker,
    pub shape: ShapeConfig,
    /// Upper bound on one `Source::fetch`; expiry is a transient failure.
    pub request_timeout: Duration,
    /// Distinct jobs failing on storage in a row before the run halts.
    pub max_consecutive_storage_failures: u32,
}

/// Outcome of one run of the pool.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub completed: u64,
    /// Failed attempts that went back to Pending.
    pub retried: u64,
    pub throttled: u64,
    /// Jobs that became Failed in this run.
    pub failed: u64,
    /// Follow-up pages discovered and enqueued.
    pub follow_ups: u64,
    /// Claimed jobs handed back untouched because of cancel or halt.
    pub released: u64,
    pub cancelled: bool,
    /// Set when the run was halted.
    pub fatal: Option<HarvestError>,
    /// Queue counts after the pool stopped.
    pub counts: StatusCounts,
}

impl RunSummary {
    /// Jobs this run fetched to an outcome (success, retry, or failure).
    pub fn processed(&self) -> u64 {
        self.completed + self.retried + self.failed
    }
}

/// Fixed-size pool of fetch workers.
pub struct ParallelFetcher {
    ctx: Arc<FetchContext>,
    cancel: CancelToken,
}

impl ParallelFetcher {
    pub fn new(ctx: FetchContext, cancel: CancelToken) -> Self {
        Self {
            ctx: Arc::new(ctx),
            cancel,
        }
    }

    /// Run `max_workers` workers until the queue is drained (no Pending jobs
    /// and nothing in flight that could enqueue more), the token is cancelled,
    /// or a fatal condition halts the run.
    pub async fn run(&self, max_workers: usize) -> RunSummary {
        let max_workers = max_workers.max(1);
        let run = Arc::new(RunState::new());
        tracing::info!(workers = max_workers, "starting fetch pool");

        let mut join_set = tokio::task::JoinSet::new();
        for worker_id in 0..max_workers {
            let ctx = Arc::clone(&self.ctx);
            let run = Arc::clone(&run);
            let cancel = self.cancel.clone();
            join_set.spawn(async move { worker::run_worker(worker_id, ctx, run, cancel).await });
        }
        while let Some(res) = join_set.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = %e, "worker task ended abnormally");
            }
        }

        let counts = match self.ctx.queue.counts().await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "could not read queue counts after run");
                StatusCounts::default()
            }
        };
        let summary = run.summary(self.cancel.is_cancelled(), counts).await;
        tracing::info!(
            completed = summary.completed,
            retried = summary.retried,
            throttled = summary.throttled,
            failed = summary.failed,
            follow_ups = summary.follow_ups,
            cancelled = summary.cancelled,
            fatal = summary.fatal.is_some(),
            "fetch pool stopped"
        );
        summary
    }
}
