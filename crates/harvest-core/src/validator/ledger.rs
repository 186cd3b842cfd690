//! Checksum ledger: artifact key -> recorded SHA-256, persisted as JSON.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::db::unix_timestamp;

/// File name of the ledger inside the state directory.
pub const LEDGER_FILE: &str = "checksums.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumEntry {
    pub sha256: String,
    /// Unix seconds when the digest was recorded.
    pub verified_at: i64,
}

/// What [`ChecksumLedger::record`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    New,
    /// Same digest was already recorded.
    Unchanged,
    /// A different digest was replaced (refetch after demotion).
    Replaced,
}

#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    #[error("checksum conflict for {key}: ledger has {recorded}, artifact is {actual}")]
    Conflict {
        key: String,
        recorded: String,
        actual: String,
    },
    #[error("failed to persist checksum ledger {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    entries: BTreeMap<String, ChecksumEntry>,
}

/// In-memory ledger guarded by an async mutex; every change is flushed to disk
/// (temp file + rename) before the lock is released.
#[derive(Debug)]
pub struct ChecksumLedger {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, ChecksumEntry>>,
}

impl ChecksumLedger {
    /// Load the ledger at `path`, or start empty if the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(data) => {
                let file: LedgerFile = serde_json::from_slice(&data)
                    .with_context(|| format!("parse checksum ledger {}", path.display()))?;
                file.entries
            }
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("read checksum ledger {}", path.display()))
            }
        };
        tracing::debug!(path = %path.display(), entries = entries.len(), "checksum ledger loaded");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, key: &str) -> Option<ChecksumEntry> {
        self.entries.lock().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Record `digest` for `key`. An existing different digest is a
    /// [`IntegrityError::Conflict`] unless `replace` is set.
    pub async fn record(
        &self,
        key: &str,
        digest: &str,
        replace: bool,
    ) -> Result<RecordOutcome, IntegrityError> {
        let mut entries = self.entries.lock().await;
        let outcome = match entries.get(key) {
            Some(existing) if existing.sha256 == digest => return Ok(RecordOutcome::Unchanged),
            Some(existing) if !replace => {
                return Err(IntegrityError::Conflict {
                    key: key.to_string(),
                    recorded: existing.sha256.clone(),
                    actual: digest.to_string(),
                })
            }
            Some(_) => RecordOutcome::Replaced,
            None => RecordOutcome::New,
        };
        let previous = entries.insert(
            key.to_string(),
            ChecksumEntry {
                sha256: digest.to_string(),
                verified_at: unix_timestamp(),
            },
        );
        if let Err(e) = self.persist(&entries).await {
            // Keep memory and disk in agreement.
            match previous {
                Some(prev) => entries.insert(key.to_string(), prev),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(outcome)
    }

    async fn persist(
        &self,
        entries: &BTreeMap<String, ChecksumEntry>,
    ) -> Result<(), IntegrityError> {
        let to_err = |source: std::io::Error| IntegrityError::Persist {
            path: self.path.clone(),
            source,
        };
        let body = serde_json::to_vec_pretty(&LedgerFileRef { entries })
            .map_err(|e| to_err(std::io::Error::other(e)))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(to_err)?;
        }
        let tmp = crate::storage::temp_path(&self.path);
        tokio::fs::write(&tmp, body).await.map_err(to_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(to_err)?;
        Ok(())
    }
}

#[derive(Serialize)]
struct LedgerFileRef<'a> {
    entries: &'a BTreeMap<String, ChecksumEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE);
        let ledger = ChecksumLedger::open(&path).await.unwrap();
        assert!(ledger.is_empty().await);

        let outcome = ledger.record("bills/110/page-first.json", "aa", false).await.unwrap();
        assert_eq!(outcome, RecordOutcome::New);
        assert!(path.exists());

        let reopened = ChecksumLedger::open(&path).await.unwrap();
        assert_eq!(
            reopened.get("bills/110/page-first.json").await.unwrap().sha256,
            "aa"
        );
    }

    #[tokio::test]
    async fn conflicting_digest_needs_replace() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ChecksumLedger::open(dir.path().join(LEDGER_FILE)).await.unwrap();
        let key = "members/99/page-first.json";
        ledger.record(key, "aa", false).await.unwrap();
        assert_eq!(
            ledger.record(key, "aa", false).await.unwrap(),
            RecordOutcome::Unchanged
        );

        let err = ledger.record(key, "bb", false).await.unwrap_err();
        assert!(matches!(err, IntegrityError::Conflict { .. }));
        assert_eq!(ledger.get(key).await.unwrap().sha256, "aa");

        assert_eq!(
            ledger.record(key, "bb", true).await.unwrap(),
            RecordOutcome::Replaced
        );
        assert_eq!(ledger.get(key).await.unwrap().sha256, "bb");
    }

    #[tokio::test]
    async fn corrupt_ledger_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE);
        std::fs::write(&path, b"{not json").unwrap();
        assert!(ChecksumLedger::open(&path).await.is_err());
    }
}
