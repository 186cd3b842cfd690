//! `harvest checksum <path>` – SHA-256 of a file, in the ledger's format.

use anyhow::Result;
use harvest_core::validator;
use std::path::Path;

/// Compute and print SHA-256 of the given file.
pub async fn run_checksum(path: &Path) -> Result<()> {
    let owned = path.to_path_buf();
    let digest = tokio::task::spawn_blocking(move || validator::sha256_path(&owned)).await??;
    println!("{}  {}", digest, path.display());
    Ok(())
}
