//! Gzip compression of aged artifacts.
//!
//! Raw artifacts are only removed after the compressed copy has been read
//! back and matched against the digest recorded in the ledger. Storage reads
//! fall back to `<key>.gz`, so compressed artifacts still validate.

mod codec;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{bail, Context, Result};

use crate::storage::{temp_path, FsStorage, TEMP_SUFFIX};
use crate::validator::{sha256_bytes, DataValidator, Integrity};

pub use codec::{gz_path, GZ_SUFFIX};
pub(crate) use codec::gunzip_bytes;

/// Sizes for one compressed artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionStats {
    pub raw_bytes: u64,
    pub compressed_bytes: u64,
    /// `compressed_bytes / raw_bytes`; 0 for empty input.
    pub ratio: f64,
    pub compressed_path: PathBuf,
}

/// An artifact left uncompressed and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedArtifact {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct AutoCompressReport {
    pub compressed: Vec<CompressionStats>,
    pub skipped: Vec<SkippedArtifact>,
}

impl AutoCompressReport {
    pub fn bytes_saved(&self) -> u64 {
        self.compressed
            .iter()
            .map(|s| s.raw_bytes.saturating_sub(s.compressed_bytes))
            .sum()
    }
}

/// Compresses artifacts under a [`FsStorage`] root.
pub struct CompressedStorage {
    storage: Arc<FsStorage>,
    validator: Arc<DataValidator>,
    level: u32,
}

impl CompressedStorage {
    pub fn new(storage: Arc<FsStorage>, validator: Arc<DataValidator>, level: u32) -> Self {
        Self {
            storage,
            validator,
            level: level.min(9),
        }
    }

    /// Write `<path>.gz` next to `path` (atomically). The raw file is kept.
    pub async fn compress(&self, path: &Path) -> Result<CompressionStats> {
        let path = path.to_path_buf();
        let level = self.level;
        tokio::task::spawn_blocking(move || compress_file(&path, level))
            .await
            .context("compress task panicked")?
    }

    /// Restore the raw file from `path` (a `.gz` artifact) and remove the
    /// compressed copy. Returns the raw path.
    pub async fn decompress(&self, path: &Path) -> Result<PathBuf> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || decompress_file(&path))
            .await
            .context("decompress task panicked")?
    }

    /// Compress every raw artifact whose mtime is older than `age`. Only
    /// artifacts that validate against the ledger are touched; the raw copy is
    /// removed once the gzip output is verified to decode to the same digest.
    pub async fn auto_compress_older_than(&self, age: Duration) -> Result<AutoCompressReport> {
        let root = self.storage.root().to_path_buf();
        let cutoff = SystemTime::now()
            .checked_sub(age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let candidates = tokio::task::spawn_blocking(move || aged_artifacts(&root, cutoff))
            .await
            .context("artifact scan panicked")??;

        let mut report = AutoCompressReport::default();
        for (key, path) in candidates {
            match self.validator.validate_existing(&key).await {
                Ok(Integrity::Valid) => {}
                Ok(other) => {
                    tracing::warn!(%key, integrity = %other.describe(), "not compressing unverified artifact");
                    report.skipped.push(SkippedArtifact {
                        key,
                        reason: other.describe(),
                    });
                    continue;
                }
                Err(e) => {
                    report.skipped.push(SkippedArtifact {
                        key,
                        reason: e.to_string(),
                    });
                    continue;
                }
            }
            let Some(expected) = self.validator.expected(&key).await else {
                continue;
            };

            let level = self.level;
            let result = tokio::task::spawn_blocking(move || {
                compress_verified(&path, level, &expected)
            })
            .await
            .context("compress task panicked")?;
            match result {
                Ok(stats) => {
                    tracing::debug!(
                        %key,
                        raw = stats.raw_bytes,
                        compressed = stats.compressed_bytes,
                        "compressed artifact"
                    );
                    report.compressed.push(stats);
                }
                Err(e) => {
                    tracing::warn!(%key, error = %format!("{:#}", e), "compression failed; raw artifact kept");
                    report.skipped.push(SkippedArtifact {
                        key,
                        reason: format!("{:#}", e),
                    });
                }
            }
        }
        tracing::info!(
            compressed = report.compressed.len(),
            skipped = report.skipped.len(),
            bytes_saved = report.bytes_saved(),
            "auto-compress finished"
        );
        Ok(report)
    }
}

fn compress_file(path: &Path, level: u32) -> Result<CompressionStats> {
    let raw = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let gz = codec::gzip_bytes(&raw, level).context("gzip encode")?;
    let out = gz_path(path);
    let tmp = temp_path(&out);
    std::fs::write(&tmp, &gz).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, &out).with_context(|| format!("rename to {}", out.display()))?;
    let raw_bytes = raw.len() as u64;
    let compressed_bytes = gz.len() as u64;
    Ok(CompressionStats {
        raw_bytes,
        compressed_bytes,
        ratio: if raw_bytes == 0 {
            0.0
        } else {
            compressed_bytes as f64 / raw_bytes as f64
        },
        compressed_path: out,
    })
}

fn decompress_file(path: &Path) -> Result<PathBuf> {
    let name = path.to_string_lossy();
    let Some(raw_name) = name.strip_suffix(GZ_SUFFIX) else {
        bail!("{} is not a {} file", path.display(), GZ_SUFFIX);
    };
    let raw_path = PathBuf::from(raw_name);
    let gz = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let raw = gunzip_bytes(&gz).with_context(|| format!("gunzip {}", path.display()))?;
    let tmp = temp_path(&raw_path);
    std::fs::write(&tmp, &raw).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, &raw_path)
        .with_context(|| format!("rename to {}", raw_path.display()))?;
    std::fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
    Ok(raw_path)
}

/// Compress, read the gzip back, and only then drop the raw file.
fn compress_verified(path: &Path, level: u32, expected: &str) -> Result<CompressionStats> {
    let stats = compress_file(path, level)?;
    let gz = std::fs::read(&stats.compressed_path)?;
    let roundtrip = sha256_bytes(&gunzip_bytes(&gz)?);
    if roundtrip != expected {
        let _ = std::fs::remove_file(&stats.compressed_path);
        bail!("compressed copy decodes to {}, expected {}", roundtrip, expected);
    }
    std::fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
    Ok(stats)
}

/// Raw artifacts under `root` last modified before `cutoff`, as (key, path).
fn aged_artifacts(root: &Path, cutoff: SystemTime) -> Result<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    if !root.exists() {
        return Ok(out);
    }
    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.ends_with(GZ_SUFFIX) || name.ends_with(TEMP_SUFFIX) {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if modified > cutoff {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        out.push((key, entry.path().to_path_buf()));
    }
    Ok(out)
}
