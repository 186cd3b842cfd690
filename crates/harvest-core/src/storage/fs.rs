use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{temp_path, Storage, StorageError};
use crate::compress::{gunzip_bytes, gz_path};

/// Filesystem storage rooted at a directory. Keys are relative paths.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `key` under the root. Rejects absolute keys and `..`.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(key);
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(StorageError::InvalidKey(key.to_string())),
            }
        }
        Ok(self.root.join(rel))
    }
}

async fn path_exists(path: &Path, key: &str) -> Result<bool, StorageError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| StorageError::io(key, e))
}

#[async_trait]
impl Storage for FsStorage {
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let final_path = self.path_for(key)?;
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(key, e))?;
        }
        let tmp = temp_path(&final_path);
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| StorageError::io(key, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| StorageError::io(key, e))?;
        file.sync_all().await.map_err(|e| StorageError::io(key, e))?;
        drop(file);
        tokio::fs::rename(&tmp, &final_path)
            .await
            .map_err(|e| StorageError::io(key, e))?;

        // A fresh raw copy supersedes an older compressed one.
        let gz = gz_path(&final_path);
        match tokio::fs::remove_file(&gz).await {
            Ok(()) => tracing::debug!(key, "removed stale compressed artifact"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io(key, e)),
        }
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io(key, e)),
        }
        let gz = gz_path(&path);
        let compressed = match tokio::fs::read(&gz).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(StorageError::io(key, e)),
        };
        tokio::task::spawn_blocking(move || gunzip_bytes(&compressed))
            .await
            .map_err(|e| StorageError::io(key, std::io::Error::other(e)))?
            .map_err(|e| StorageError::io(key, e))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        if path_exists(&path, key).await? {
            return Ok(true);
        }
        path_exists(&gz_path(&path), key).await
    }

    async fn remove_partial(&self, key: &str) -> Result<bool, StorageError> {
        let tmp = temp_path(&self.path_for(key)?);
        match tokio::fs::remove_file(&tmp).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_path_appends_part() {
        let p = temp_path(Path::new("bills/110/page-first.json"));
        assert_eq!(p.to_string_lossy(), "bills/110/page-first.json.part");
    }

    #[test]
    fn path_for_rejects_escapes() {
        let s = FsStorage::new("/data");
        assert_eq!(
            s.path_for("bills/110/page-first.json").unwrap(),
            PathBuf::from("/data/bills/110/page-first.json")
        );
        assert!(matches!(s.path_for("../etc/passwd"), Err(StorageError::InvalidKey(_))));
        assert!(matches!(s.path_for("/etc/passwd"), Err(StorageError::InvalidKey(_))));
        assert!(matches!(s.path_for(""), Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn write_read_exists() {
        let dir = tempfile::tempdir().unwrap();
        let s = FsStorage::new(dir.path());
        let key = "members/117/page-first.json";
        assert!(!s.exists(key).await.unwrap());
        assert!(matches!(s.read(key).await, Err(StorageError::NotFound(_))));

        s.write(key, b"{\"members\":[]}").await.unwrap();
        assert!(s.exists(key).await.unwrap());
        assert_eq!(s.read(key).await.unwrap(), b"{\"members\":[]}");
        assert!(!temp_path(&s.path_for(key).unwrap()).exists());

        s.write(key, b"{}").await.unwrap();
        assert_eq!(s.read(key).await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn remove_partial_deletes_temp_only() {
        let dir = tempfile::tempdir().unwrap();
        let s = FsStorage::new(dir.path());
        let key = "bills/100/page-first.json";
        s.write(key, b"{}").await.unwrap();
        let tmp = temp_path(&s.path_for(key).unwrap());
        std::fs::write(&tmp, b"{\"trunc").unwrap();

        assert!(s.remove_partial(key).await.unwrap());
        assert!(!tmp.exists());
        assert!(s.exists(key).await.unwrap());
        assert!(!s.remove_partial(key).await.unwrap());
    }

    #[tokio::test]
    async fn reads_compressed_copy_when_raw_is_gone() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let s = FsStorage::new(dir.path());
        let key = "house_votes/101/page-first.json";
        let path = s.path_for(key).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"{\"votes\":[1,2,3]}").unwrap();
        std::fs::write(gz_path(&path), enc.finish().unwrap()).unwrap();

        assert!(s.exists(key).await.unwrap());
        assert_eq!(s.read(key).await.unwrap(), b"{\"votes\":[1,2,3]}");

        // Rewriting the raw artifact drops the stale gzip copy.
        s.write(key, b"{}").await.unwrap();
        assert!(!gz_path(&path).exists());
    }
}
