//! Validate and persist one fetched payload.

use std::time::Duration;

use crate::job::Job;
use crate::retry::{FailureKind, FetchError};
use crate::storage::StorageError;
use crate::validator::{validate_shape, DataValidator, Integrity, IntegrityError};

use super::FetchContext;

/// A classified job failure, ready to be turned into a queue transition.
#[derive(Debug, Clone)]
pub(super) struct JobFailure {
    pub(super) kind: FailureKind,
    pub(super) reason: String,
    pub(super) retry_after: Option<Duration>,
}

impl JobFailure {
    pub(super) fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            retry_after: None,
        }
    }
}

impl From<FetchError> for JobFailure {
    fn from(e: FetchError) -> Self {
        let retry_after = match &e {
            FetchError::Throttled { retry_after } => *retry_after,
            _ => None,
        };
        Self {
            kind: FailureKind::from(&e),
            reason: e.to_string(),
            retry_after,
        }
    }
}

impl From<StorageError> for JobFailure {
    fn from(e: StorageError) -> Self {
        JobFailure::new(FailureKind::StorageFailure, e.to_string())
    }
}

impl From<IntegrityError> for JobFailure {
    fn from(e: IntegrityError) -> Self {
        let kind = match e {
            IntegrityError::Conflict { .. } => FailureKind::IntegrityFailure,
            IntegrityError::Persist { .. } => FailureKind::StorageFailure,
        };
        JobFailure::new(kind, e.to_string())
    }
}

/// Shape check only; the payload is not touched on failure.
pub(super) fn check_shape(ctx: &FetchContext, job: &Job, bytes: &[u8]) -> Result<(), JobFailure> {
    let check = validate_shape(bytes, ctx.shape.required_keys(job.kind));
    match check.reason() {
        None => Ok(()),
        Some(reason) => Err(JobFailure::new(FailureKind::IntegrityFailure, reason)),
    }
}

/// Write the artifact, record its digest, and read it back.
///
/// A job that has failed or been demoted before (it carries `last_error`) is
/// a refetch and may replace the recorded digest. A first fetch whose bytes
/// disagree with an existing ledger entry is an integrity failure and nothing
/// is written.
pub(super) async fn persist(ctx: &FetchContext, job: &Job, bytes: &[u8]) -> Result<String, JobFailure> {
    let key = job.artifact_key();
    let digest = DataValidator::checksum(bytes);
    let replace = job.last_error.is_some();

    if !replace {
        if let Some(recorded) = ctx.validator.expected(&key).await {
            if recorded != digest {
                return Err(JobFailure::new(
                    FailureKind::IntegrityFailure,
                    format!(
                        "{} conflicts with recorded checksum {} (got {})",
                        key, recorded, digest
                    ),
                ));
            }
        }
    }

    ctx.storage.write(&key, bytes).await?;
    ctx.validator.record(&key, &digest, replace).await?;

    match ctx.validator.validate_existing(&key).await? {
        Integrity::Valid => Ok(digest),
        other => Err(JobFailure::new(
            FailureKind::IntegrityFailure,
            format!("{} after write: {}", key, other.describe()),
        )),
    }
}
