//! Shared admission control for outbound requests.
//!
//! One [`RateLimiter`] is constructed per run and handed to every worker as an
//! `Arc`. It enforces a rolling-window quota and a global backoff: a worker that
//! sees upstream throttling pushes `backoff_until` forward for all of its
//! siblings, because the quota is enforced by the server for the whole client.
//! Dropping the limiter at the end of the run is the only teardown; backoff
//! state simply expires.

mod state;

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

use state::LimiterState;

/// Point-in-time view of the limiter, for logs and status lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterSnapshot {
    /// Admissions inside the current window.
    pub in_window: usize,
    /// Remaining backoff, if one is active.
    pub backoff_remaining: Option<Duration>,
    pub backoff_multiplier: u32,
    /// Consecutive throttles that hit the backoff ceiling.
    pub ceiling_streak: u32,
}

/// Rolling-window quota plus shared exponential backoff.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    max_requests: usize,
    window: Duration,
    base_backoff: Duration,
    max_backoff: Duration,
    max_multiplier: u32,
    max_throttles_at_ceiling: u32,
}

impl RateLimiter {
    pub fn new(cfg: &RateLimitConfig) -> Self {
        Self {
            state: Mutex::new(LimiterState::new()),
            max_requests: (cfg.max_requests as usize).max(1),
            window: cfg.window(),
            base_backoff: cfg.base_backoff(),
            max_backoff: cfg.max_backoff(),
            max_multiplier: cfg.max_multiplier.max(1),
            max_throttles_at_ceiling: cfg.max_throttles_at_ceiling,
        }
    }

    /// Wait until a request may be sent: outside any backoff and with a free
    /// slot in the rolling window. The lock is never held while sleeping.
    pub async fn acquire(&self) {
        loop {
            let wait_until = {
                let mut state = self.state.lock().await;
                match state.try_admit(Instant::now(), self.max_requests, self.window) {
                    None => return,
                    Some(until) => until,
                }
            };
            tracing::trace!(
                wait_ms = wait_until
                    .saturating_duration_since(Instant::now())
                    .as_millis() as u64,
                "rate limiter: waiting for slot"
            );
            tokio::time::sleep_until(wait_until).await;
        }
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// A request succeeded: breaks the ceiling streak. The backoff multiplier
    /// and any active backoff are kept.
    pub async fn record_success(&self) {
        self.state.lock().await.ceiling_streak = 0;
    }

    /// Upstream throttled us. Pushes the shared backoff forward and returns the
    /// delay that was applied.
    ///
    /// With `retry_after`, the server's hint is used (clamped to `max_backoff`).
    /// Without it, the delay is `min(max_backoff, base_backoff * multiplier)` and
    /// the multiplier doubles up to its cap. `backoff_until` never moves backwards.
    pub async fn record_throttled(&self, retry_after: Option<Duration>) -> Duration {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let delay = match retry_after {
            Some(hint) if hint > self.max_backoff => {
                tracing::warn!(
                    retry_after_secs = hint.as_secs(),
                    max_backoff_secs = self.max_backoff.as_secs(),
                    "retry-after exceeds max backoff; clamping"
                );
                self.max_backoff
            }
            Some(hint) => hint,
            None => {
                let d = self
                    .base_backoff
                    .saturating_mul(state.backoff_multiplier)
                    .min(self.max_backoff);
                state.backoff_multiplier = state
                    .backoff_multiplier
                    .saturating_mul(2)
                    .min(self.max_multiplier);
                d
            }
        };

        if delay >= self.max_backoff {
            state.ceiling_streak = state.ceiling_streak.saturating_add(1);
        } else {
            state.ceiling_streak = 0;
        }
        state.extend_backoff(now + delay);
        tracing::info!(
            delay_ms = delay.as_millis() as u64,
            multiplier = state.backoff_multiplier,
            "upstream throttled; backing off all workers"
        );
        delay
    }

    /// When the current backoff ends, if one is active.
    pub async fn backoff_until(&self) -> Option<Instant> {
        let state = self.state.lock().await;
        state.backoff_until.filter(|until| *until > Instant::now())
    }

    /// True once throttling has pinned the backoff at its ceiling more than
    /// `max_throttles_at_ceiling` times in a row. The scheduler treats this as fatal.
    pub async fn is_exhausted(&self) -> bool {
        let state = self.state.lock().await;
        state.ceiling_streak > self.max_throttles_at_ceiling
    }

    pub async fn snapshot(&self) -> RateLimiterSnapshot {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.purge(now, self.window);
        RateLimiterSnapshot {
            in_window: state.admitted.len(),
            backoff_remaining: state
                .backoff_until
                .filter(|until| *until > now)
                .map(|until| until - now),
            backoff_multiplier: state.backoff_multiplier,
            ceiling_streak: state.ceiling_streak,
        }
    }
}
