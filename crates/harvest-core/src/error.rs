//! Conditions that stop a whole run rather than a single job.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Upstream kept throttling with the backoff pinned at its ceiling.
    #[error("upstream throttled {streak} times in a row at the {max_backoff:?} backoff ceiling")]
    BackoffExhausted { streak: u32, max_backoff: Duration },
    /// Storage failed for this many distinct jobs with no success in between.
    #[error("storage failed for {count} consecutive jobs; last error: {last}")]
    RepeatedStorageFailure { count: u32, last: String },
    /// The job queue or progress store could not be updated.
    #[error("state database: {0:#}")]
    State(#[from] anyhow::Error),
}
