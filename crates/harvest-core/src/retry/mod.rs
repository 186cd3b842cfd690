//! Failure classification and retry policy.
//!
//! This module maps every way a job can fail (upstream throttling, network
//! trouble, permanent upstream errors, integrity and storage failures) onto a
//! single [`FailureKind`], and maps each kind onto the queue action the
//! scheduler takes. The mapping is a total `match`, so adding a kind forces
//! every caller to decide what to do with it.

mod classify;
mod error;
mod policy;

pub use classify::{classify_curl_error, classify_http_status, parse_retry_after};
pub use error::FetchError;
pub use policy::{FailureKind, QueueAction, RetryPolicy};
