//! Periodic progress line printed while workers run.

use harvest_core::progress::ProgressTracker;
use std::time::Duration;
use tokio::task::JoinHandle;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// `1h02m`, `3m05s`, `42s`.
pub(super) fn fmt_eta(eta: Duration) -> String {
    let secs = eta.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h{:02}m", h, m)
    } else if m > 0 {
        format!("{}m{:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Print overall progress every couple of seconds until aborted.
pub(super) fn spawn_printer(tracker: ProgressTracker) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match tracker.overall_progress().await {
                Ok(p) => {
                    let eta = p.eta.map(fmt_eta).unwrap_or_else(|| "?".to_string());
                    println!(
                        "  {} / {} pages ({:.1}%)  ETA {}",
                        p.completed, p.total, p.percentage, eta
                    );
                }
                Err(e) => tracing::debug!("progress read failed: {:#}", e),
            }
        }
    })
}
