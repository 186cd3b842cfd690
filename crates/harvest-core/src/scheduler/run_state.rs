//! State shared by the workers of one run.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{Mutex, Notify};

use super::{CancelToken, RunSummary};
use crate::error::HarvestError;
use crate::job::{JobId, StatusCounts};

#[derive(Default)]
pub(super) struct Counters {
    pub(super) completed: AtomicU64,
    pub(super) retried: AtomicU64,
    pub(super) throttled: AtomicU64,
    pub(super) failed: AtomicU64,
    pub(super) follow_ups: AtomicU64,
    pub(super) released: AtomicU64,
}

impl Counters {
    pub(super) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub(super) struct RunState {
    /// Workers between claim attempt and the end of their job.
    in_flight: AtomicUsize,
    /// Signalled whenever a worker leaves flight (its job may have added work).
    wake: Notify,
    /// Internal stop signal for fatal conditions.
    pub(super) halt: CancelToken,
    fatal: Mutex<Option<HarvestError>>,
    pub(super) counters: Counters,
    /// Distinct jobs that failed on storage since the last success.
    storage_streak: Mutex<HashSet<JobId>>,
}

impl RunState {
    pub(super) fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            wake: Notify::new(),
            halt: CancelToken::new(),
            fatal: Mutex::new(None),
            counters: Counters::default(),
            storage_streak: Mutex::new(HashSet::new()),
        }
    }

    pub(super) fn wake(&self) -> &Notify {
        &self.wake
    }

    /// Record a fatal condition (the first one wins) and stop claiming.
    pub(super) async fn halt_with(&self, err: HarvestError) {
        let mut slot = self.fatal.lock().await;
        if slot.is_none() {
            tracing::error!(error = %err, "halting run");
            *slot = Some(err);
        }
        drop(slot);
        self.halt.cancel();
        self.wake.notify_waiters();
    }

    /// Add `job_id` to the storage failure streak; returns the streak length.
    pub(super) async fn storage_failed(&self, job_id: &str) -> u32 {
        let mut streak = self.storage_streak.lock().await;
        streak.insert(job_id.to_string());
        streak.len() as u32
    }

    pub(super) async fn storage_ok(&self) {
        self.storage_streak.lock().await.clear();
    }

    pub(super) async fn summary(&self, cancelled: bool, counts: StatusCounts) -> RunSummary {
        let c = &self.counters;
        RunSummary {
            completed: c.completed.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            throttled: c.throttled.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            follow_ups: c.follow_ups.load(Ordering::Relaxed),
            released: c.released.load(Ordering::Relaxed),
            cancelled,
            fatal: self.fatal.lock().await.take(),
            counts,
        }
    }
}

/// Marks a worker as in flight. Dropping the guard leaves flight and wakes
/// idle workers, since the finished job may have enqueued follow-ups.
pub(super) struct InFlight<'a> {
    run: &'a RunState,
    active: bool,
}

impl<'a> InFlight<'a> {
    pub(super) fn enter(run: &'a RunState) -> Self {
        run.in_flight.fetch_add(1, Ordering::SeqCst);
        Self { run, active: true }
    }

    /// Leave flight after finding no job. Idle workers are only woken if this
    /// was the last worker in flight, so they can re-check the queue.
    /// Returns true in that case; the caller must look for Pending work
    /// before exiting, since a job may have been added after its claim.
    pub(super) fn leave_idle(mut self) -> bool {
        self.active = false;
        let last = self.run.in_flight.fetch_sub(1, Ordering::SeqCst) == 1;
        if last {
            self.run.wake.notify_waiters();
        }
        last
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.active {
            self.run.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.run.wake.notify_waiters();
        }
    }
}
