//! Job model: kinds, statuses, per-job metadata, and artifact keys.
//!
//! A job is one unit of fetch work for a `(kind, congress, page)` target.
//! Jobs are owned by the [`JobQueue`](crate::queue::JobQueue); everything
//! else only sees copies.

mod key;
mod types;

pub use key::{artifact_key, page_slug};
pub use types::*;
