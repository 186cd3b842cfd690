//! `harvest validate` – re-verify every completed artifact.

use anyhow::{bail, Result};
use harvest_core::config::{HarvestConfig, StatePaths};

use super::open_harvester;

pub async fn run_validate(cfg: HarvestConfig, paths: StatePaths) -> Result<()> {
    let harvester = open_harvester(cfg, paths).await?;
    let report = harvester.validate_all().await?;
    for f in &report.failures {
        println!("FAIL {} {}: {}", f.job_id, f.key, f.integrity.describe());
    }
    println!(
        "Checked {} artifact(s), {} failure(s).",
        report.checked,
        report.failures.len()
    );
    if !report.failures.is_empty() {
        bail!(
            "{} artifact(s) failed verification; `harvest resume` requeues them",
            report.failures.len()
        );
    }
    Ok(())
}
