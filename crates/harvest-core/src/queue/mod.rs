//! Durable job queue backed by the `jobs` table of the state database.
//!
//! Every mutating call is a single committed statement and
//! runs under an in-process write lock, so concurrent workers see a
//! linearizable sequence of transitions. The read side takes no lock.

mod read;
mod row;
mod write;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::StateDb;
use crate::job::JobId;
use crate::retry::RetryPolicy;

/// Result of [`JobQueue::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueued {
    pub id: JobId,
    /// False when a job for the same target already existed.
    pub created: bool,
}

/// Handle to the job queue. Cheap to clone; clones share the write lock.
#[derive(Clone)]
pub struct JobQueue {
    db: StateDb,
    policy: RetryPolicy,
    write_lock: Arc<Mutex<()>>,
}

impl JobQueue {
    pub fn new(db: StateDb, policy: RetryPolicy) -> Self {
        Self {
            db,
            policy,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}
