//! `harvest resume` – repair interrupted state and keep draining the queue.

use anyhow::Result;
use harvest_core::config::{HarvestConfig, StatePaths};
use harvest_core::resume::ResumeOptions;

use super::open_harvester;
use super::run::{drain, finish, print_repairs};

pub async fn run_resume(
    cfg: HarvestConfig,
    paths: StatePaths,
    workers: usize,
    retry_failed: bool,
) -> Result<()> {
    let harvester = open_harvester(cfg, paths).await?;
    let repaired = harvester.prepare(ResumeOptions { retry_failed }).await?;
    if repaired.failed_reset > 0 {
        println!("Reset {} failed job(s) for retry.", repaired.failed_reset);
    }
    print_repairs(&repaired);

    let pending = harvester.queue().counts().await?.pending;
    if pending == 0 {
        println!("No pending jobs.");
        return Ok(());
    }
    let summary = drain(&harvester, workers).await?;
    finish(summary)
}
