//! Artifact storage.
//!
//! The engine only ever sees the [`Storage`] trait: opaque keys in, bytes out.
//! [`FsStorage`] maps keys to files under a root directory and writes
//! atomically (temp file with `.part` suffix, fsync, rename).

mod fs;

use async_trait::async_trait;

pub use fs::FsStorage;

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path (e.g. `page-first.json` → `page-first.json.part`).
pub fn temp_path(final_path: &std::path::Path) -> std::path::PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    std::path::PathBuf::from(o)
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Key is empty, absolute, or escapes the storage root.
    #[error("invalid storage key {0:?}")]
    InvalidKey(String),
    #[error("artifact {0} not found")]
    NotFound(String),
    #[error("storage I/O on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub(crate) fn io(key: &str, source: std::io::Error) -> Self {
        StorageError::Io {
            key: key.to_string(),
            source,
        }
    }
}

/// Keyed byte store for fetched artifacts.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist `bytes` under `key`, replacing any previous artifact. Readers
    /// never observe a partially written artifact.
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Delete a leftover temp file for `key`. Returns true if one was removed.
    async fn remove_partial(&self, key: &str) -> Result<bool, StorageError>;
}
