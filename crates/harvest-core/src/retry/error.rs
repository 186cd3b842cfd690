//! Error returned by a `Source` fetch.

use std::time::Duration;

/// Tagged fetch failure. The scheduler's retry policy is a total function over this tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Upstream asked us to slow down (HTTP 429/503). Not counted against job retries.
    #[error("throttled by upstream (retry after {retry_after:?})")]
    Throttled { retry_after: Option<Duration> },
    /// Timeout, connection reset, 5xx. Retried; counts against `max_retries`.
    #[error("transient failure (HTTP {status:?}): {reason}")]
    Transient { status: Option<u16>, reason: String },
    /// The target does not exist or the request is invalid (e.g. 404). Never retried.
    #[error("permanent failure (HTTP {status:?}): {reason}")]
    Permanent { status: Option<u16>, reason: String },
}

impl FetchError {
    pub fn transient(reason: impl Into<String>) -> Self {
        FetchError::Transient {
            status: None,
            reason: reason.into(),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        FetchError::Permanent {
            status: None,
            reason: reason.into(),
        }
    }
}
