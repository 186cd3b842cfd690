//! `harvest compress` – gzip verified artifacts older than N days.

use anyhow::Result;
use harvest_core::config::{HarvestConfig, StatePaths};
use std::time::Duration;

use super::open_harvester;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

pub async fn run_compress(cfg: HarvestConfig, paths: StatePaths, older_than_days: u64) -> Result<()> {
    let harvester = open_harvester(cfg, paths).await?;
    let age = Duration::from_secs(older_than_days.saturating_mul(SECS_PER_DAY));
    let report = harvester.compress_aged(age).await?;
    for s in &report.skipped {
        println!("skipped {}: {}", s.key, s.reason);
    }
    println!(
        "Compressed {} artifact(s), saved {:.1} MiB.",
        report.compressed.len(),
        report.bytes_saved() as f64 / 1_048_576.0
    );
    Ok(())
}
