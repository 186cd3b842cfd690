//! Artifact integrity: content checksums, the checksum ledger, and shape checks.
//!
//! Once a digest is recorded for a key it is never silently overwritten; a
//! later artifact with a different digest is reported as a mismatch.

mod checksum;
mod ledger;
mod shape;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::storage::{Storage, StorageError};

pub use checksum::{sha256_bytes, sha256_path};
pub use ledger::{ChecksumEntry, ChecksumLedger, IntegrityError, RecordOutcome, LEDGER_FILE};
pub use shape::{validate_shape, ShapeCheck};

/// Integrity of a stored artifact relative to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integrity {
    Valid,
    Mismatch { expected: String, actual: String },
    Missing,
    /// Artifact exists but no digest was ever recorded; not trusted.
    Unrecorded,
}

impl Integrity {
    pub fn is_valid(&self) -> bool {
        matches!(self, Integrity::Valid)
    }

    pub fn describe(&self) -> String {
        match self {
            Integrity::Valid => "valid".to_string(),
            Integrity::Mismatch { expected, actual } => {
                format!("checksum mismatch (expected {}, got {})", expected, actual)
            }
            Integrity::Missing => "artifact missing".to_string(),
            Integrity::Unrecorded => "no recorded checksum".to_string(),
        }
    }
}

/// Checksums artifacts and compares them against the ledger.
pub struct DataValidator {
    ledger: ChecksumLedger,
    storage: Arc<dyn Storage>,
}

impl DataValidator {
    pub fn new(ledger: ChecksumLedger, storage: Arc<dyn Storage>) -> Self {
        Self { ledger, storage }
    }

    /// Open the ledger under `state_dir`.
    pub async fn open(state_dir: &Path, storage: Arc<dyn Storage>) -> Result<Self> {
        let ledger = ChecksumLedger::open(state_dir.join(LEDGER_FILE)).await?;
        Ok(Self::new(ledger, storage))
    }

    pub fn checksum(bytes: &[u8]) -> String {
        sha256_bytes(bytes)
    }

    pub fn ledger(&self) -> &ChecksumLedger {
        &self.ledger
    }

    /// Recorded digest for `key`, if any.
    pub async fn expected(&self, key: &str) -> Option<String> {
        self.ledger.get(key).await.map(|e| e.sha256)
    }

    /// Re-read the artifact for `key` and compare its digest to the ledger.
    pub async fn validate_existing(&self, key: &str) -> Result<Integrity, StorageError> {
        let bytes = match self.storage.read(key).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(_)) => return Ok(Integrity::Missing),
            Err(e) => return Err(e),
        };
        let actual = tokio::task::spawn_blocking(move || sha256_bytes(&bytes))
            .await
            .map_err(|e| StorageError::io(key, std::io::Error::other(e)))?;
        Ok(match self.ledger.get(key).await {
            None => Integrity::Unrecorded,
            Some(entry) if entry.sha256 == actual => Integrity::Valid,
            Some(entry) => Integrity::Mismatch {
                expected: entry.sha256,
                actual,
            },
        })
    }

    /// Record the digest of a freshly written artifact. See [`ChecksumLedger::record`].
    pub async fn record(
        &self,
        key: &str,
        digest: &str,
        replace: bool,
    ) -> Result<RecordOutcome, IntegrityError> {
        let outcome = self.ledger.record(key, digest, replace).await?;
        if outcome == RecordOutcome::Replaced {
            tracing::info!(key, digest, "replaced recorded checksum after refetch");
        }
        Ok(outcome)
    }
}
