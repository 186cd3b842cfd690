//! `harvest run` – seed jobs and fetch until the queue drains.

use anyhow::{bail, Result};
use harvest_core::config::{HarvestConfig, StatePaths};
use harvest_core::job::JobKind;
use harvest_core::resume::{ResumeOptions, ResumeReport};
use harvest_core::scheduler::RunSummary;
use harvest_core::Harvester;

use super::open_harvester;
use super::progress::spawn_printer;

pub async fn run_harvest(
    cfg: HarvestConfig,
    paths: StatePaths,
    workers: usize,
    congresses: &[u32],
    kinds: &[JobKind],
) -> Result<()> {
    let harvester = open_harvester(cfg, paths).await?;
    let repaired = harvester.prepare(ResumeOptions::default()).await?;
    print_repairs(&repaired);

    let seeded = harvester.seed(congresses, kinds).await?;
    println!(
        "Seeded {} new job(s) ({} already queued) for {} congress(es).",
        seeded.created,
        seeded.existing,
        congresses.len()
    );
    let summary = drain(&harvester, workers).await?;
    finish(summary)
}

pub(super) fn print_repairs(report: &ResumeReport) {
    if report.is_clean() {
        return;
    }
    println!(
        "Repaired previous state: {} interrupted job(s) requeued, {} artifact(s) failed verification, {} partial file(s) removed.",
        report.requeued_interrupted,
        report.demoted.len(),
        report.partials_removed
    );
    for d in &report.demoted {
        println!("  requeued {} ({}): {}", d.job_id, d.key, d.reason);
    }
}

/// Run the worker pool with Ctrl-C cancellation and a progress line.
pub(super) async fn drain(harvester: &Harvester, workers: usize) -> Result<RunSummary> {
    let cancel = harvester.cancel_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancel requested; finishing in-flight jobs (run `harvest resume` to continue).");
            cancel.cancel();
        }
    });

    let tracker = harvester.progress_tracker().await?;
    let printer = spawn_printer(tracker.clone());
    let summary = harvester.execute(workers, tracker).await;
    printer.abort();
    ctrl_c.abort();
    Ok(summary)
}

/// Print the run summary; non-zero exit when the run halted or left Failed jobs.
pub(super) fn finish(summary: RunSummary) -> Result<()> {
    println!(
        "Completed {} job(s), {} retried, {} throttled, {} failed, {} follow-up page(s).",
        summary.completed, summary.retried, summary.throttled, summary.failed, summary.follow_ups
    );
    let c = summary.counts;
    println!(
        "Queue: {} completed, {} pending, {} in progress, {} failed.",
        c.completed, c.pending, c.in_progress, c.failed
    );
    if summary.cancelled {
        println!("Cancelled; {} claimed job(s) returned to the queue.", summary.released);
    }
    if let Some(fatal) = summary.fatal {
        return Err(anyhow::Error::new(fatal).context("run halted"));
    }
    if c.failed > 0 {
        bail!(
            "{} job(s) failed; see `harvest status`, then `harvest resume --retry-failed`",
            c.failed
        );
    }
    Ok(())
}
