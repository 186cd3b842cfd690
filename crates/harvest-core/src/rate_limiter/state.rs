//! Mutable limiter state; only touched under the limiter's lock.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub(super) struct LimiterState {
    /// Admission times inside the current window, oldest first.
    pub(super) admitted: VecDeque<Instant>,
    pub(super) backoff_until: Option<Instant>,
    pub(super) backoff_multiplier: u32,
    pub(super) ceiling_streak: u32,
}

impl LimiterState {
    pub(super) fn new() -> Self {
        Self {
            admitted: VecDeque::new(),
            backoff_until: None,
            backoff_multiplier: 1,
            ceiling_streak: 0,
        }
    }

    /// Drop admissions that have left the window `(now - window, now]`.
    pub(super) fn purge(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.admitted.front() {
            if *front + window <= now {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    /// Admit a request at `now`, or return the instant to retry at.
    pub(super) fn try_admit(
        &mut self,
        now: Instant,
        max_requests: usize,
        window: Duration,
    ) -> Option<Instant> {
        if let Some(until) = self.backoff_until {
            if now < until {
                return Some(until);
            }
        }
        self.purge(now, window);
        if self.admitted.len() >= max_requests {
            // Oldest admission leaves the window at front + window.
            return self.admitted.front().map(|front| *front + window);
        }
        self.admitted.push_back(now);
        None
    }

    pub(super) fn extend_backoff(&mut self, until: Instant) {
        self.backoff_until = Some(match self.backoff_until {
            Some(current) if current > until => current,
            _ => until,
        });
    }
}
