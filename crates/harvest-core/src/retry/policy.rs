use std::time::Duration;

use super::error::FetchError;

/// High-level classification of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Upstream throttling (429/503). Drives the shared backoff.
    Throttled,
    /// Timeout, connection reset, 5xx.
    TransientNetwork,
    /// 404 / invalid parameters: the target will never succeed.
    PermanentUpstream,
    /// Payload failed the shape check or the written artifact failed its checksum.
    IntegrityFailure,
    /// Disk full, permission denied, ledger write failed.
    StorageFailure,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Throttled => "throttled",
            FailureKind::TransientNetwork => "transient_network",
            FailureKind::PermanentUpstream => "permanent_upstream",
            FailureKind::IntegrityFailure => "integrity",
            FailureKind::StorageFailure => "storage",
        }
    }

    /// Queue transition the scheduler requests for a failure of this kind.
    pub fn queue_action(self) -> QueueAction {
        match self {
            FailureKind::Throttled => QueueAction::Release,
            FailureKind::TransientNetwork
            | FailureKind::IntegrityFailure
            | FailureKind::StorageFailure => QueueAction::Fail { permanent: false },
            FailureKind::PermanentUpstream => QueueAction::Fail { permanent: true },
        }
    }
}

impl From<&FetchError> for FailureKind {
    fn from(e: &FetchError) -> Self {
        match e {
            FetchError::Throttled { .. } => FailureKind::Throttled,
            FetchError::Transient { .. } => FailureKind::TransientNetwork,
            FetchError::Permanent { .. } => FailureKind::PermanentUpstream,
        }
    }
}

/// What the scheduler asks the queue to do with a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueAction {
    /// Back to Pending without consuming a retry.
    Release,
    /// Consume a retry (or fail terminally when `permanent`).
    Fail { permanent: bool },
}

/// Retry budget per job, and the spacing between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles with each further retry.
    pub base_delay: Duration,
    /// Upper bound on the delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// True if one more failure on a job that has already been retried
    /// `retries` times must be terminal.
    pub fn exhausted(&self, retries: u32) -> bool {
        retries.saturating_add(1) > self.max_retries
    }

    /// How long a job that has been retried `retries` times waits before its
    /// next attempt: `base * 2^retries`, capped at `max_delay`.
    pub fn retry_delay(&self, retries: u32) -> Duration {
        let exp = 1u32 << retries.min(16);
        self.base_delay.saturating_mul(exp).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_never_consumes_a_retry() {
        assert_eq!(FailureKind::Throttled.queue_action(), QueueAction::Release);
    }

    #[test]
    fn permanent_upstream_fails_immediately() {
        assert_eq!(
            FailureKind::PermanentUpstream.queue_action(),
            QueueAction::Fail { permanent: true }
        );
    }

    #[test]
    fn integrity_is_retried_like_transient() {
        assert_eq!(
            FailureKind::IntegrityFailure.queue_action(),
            FailureKind::TransientNetwork.queue_action()
        );
    }

    #[test]
    fn fetch_error_maps_to_kind() {
        let e = FetchError::Throttled {
            retry_after: Some(Duration::from_secs(1)),
        };
        assert_eq!(FailureKind::from(&e), FailureKind::Throttled);
        assert_eq!(
            FailureKind::from(&FetchError::transient("reset")),
            FailureKind::TransientNetwork
        );
        assert_eq!(
            FailureKind::from(&FetchError::permanent("404")),
            FailureKind::PermanentUpstream
        );
    }

    #[test]
    fn respects_max_retries() {
        let p = RetryPolicy {
            max_retries: 3,
            ..RetryPolicy::default()
        };
        assert!(!p.exhausted(0));
        assert!(!p.exhausted(2));
        assert!(p.exhausted(3));
        let none = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        assert!(none.exhausted(0));
    }

    #[test]
    fn retry_delay_doubles_up_to_the_cap() {
        let p = RetryPolicy {
            max_retries: 8,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };
        let delays: Vec<u64> = (0..6).map(|r| p.retry_delay(r).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
        assert_eq!(p.retry_delay(u32::MAX), Duration::from_secs(10));
    }
}
