//! `harvest status` – queue counts, per-congress progress, recent failures.

use anyhow::Result;
use harvest_core::config::{HarvestConfig, StatePaths};

use super::open_harvester;

pub async fn run_status(cfg: HarvestConfig, paths: StatePaths) -> Result<()> {
    let harvester = open_harvester(cfg, paths).await?;
    let report = harvester.status().await?;
    let c = report.counts;
    if c.total() == 0 {
        println!("No jobs in database.");
        return Ok(());
    }

    println!(
        "Jobs: {} completed, {} pending, {} in progress, {} failed ({} total)",
        c.completed,
        c.pending,
        c.in_progress,
        c.failed,
        c.total()
    );
    let o = &report.overall;
    println!("Pages: {} / {} ({:.1}%)", o.completed, o.total, o.percentage);

    println!();
    println!("{:<14} {:<9} {:>10} {:>8}", "KIND", "CONGRESS", "PAGES", "DONE");
    for r in &report.records {
        println!(
            "{:<14} {:<9} {:>10} {:>7.1}%",
            r.kind.as_str(),
            r.congress,
            format!("{}/{}", r.completed, r.total),
            r.percentage()
        );
    }

    if !report.recent_failures.is_empty() {
        println!();
        println!("Recent failures:");
        for f in &report.recent_failures {
            println!(
                "  {} {} {} [{}, {} retries]: {}",
                f.job_id,
                f.kind,
                f.congress,
                f.status.as_str(),
                f.retries,
                f.reason
            );
        }
    }
    Ok(())
}
