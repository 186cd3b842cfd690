//! CLI for the congress-harvest batch collector.

mod commands;
mod congress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use harvest_core::config::{self, StatePaths};
use harvest_core::job::JobKind;
use harvest_core::logging;
use std::path::PathBuf;

use commands::{run_checksum, run_compress, run_harvest, run_resume, run_status, run_validate};
pub use congress::{parse_congresses, CongressList};

/// Top-level CLI for the harvest collector.
#[derive(Debug, Parser)]
#[command(name = "harvest")]
#[command(about = "Resumable, rate-limited batch collection of congressional data", long_about = None)]
pub struct Cli {
    /// State directory (state.db, checksums.json, harvest.log). Defaults to $XDG_STATE_HOME/harvest.
    #[arg(long, global = true, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Artifact root. Overrides `data_dir` from config.toml.
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Seed jobs for the given congresses and kinds, then fetch until the queue drains.
    Run {
        /// Congress numbers: single values, ranges, or a comma list (e.g. 110-118 or 93,95,100-102).
        #[arg(long, value_name = "LIST", value_parser = parse_congresses)]
        congress: CongressList,
        /// Data kinds to fetch (default: all).
        #[arg(long, value_delimiter = ',', value_name = "KIND")]
        kind: Vec<JobKind>,
        /// Concurrent fetch workers (default: max_workers from config).
        #[arg(long, value_name = "N")]
        workers: Option<usize>,
    },

    /// Repair state from an interrupted run and continue draining the queue.
    Resume {
        /// Concurrent fetch workers (default: max_workers from config).
        #[arg(long, value_name = "N")]
        workers: Option<usize>,
        /// Give Failed jobs a fresh retry budget.
        #[arg(long)]
        retry_failed: bool,
    },

    /// Show job counts, per-congress progress, and recent failures.
    Status,

    /// Re-verify every completed artifact against its recorded checksum.
    Validate,

    /// Gzip verified artifacts that have not changed for a while.
    Compress {
        /// Minimum artifact age in days.
        #[arg(long, default_value = "30", value_name = "D")]
        older_than_days: u64,
    },

    /// Compute SHA-256 of a file.
    Checksum {
        /// Path to the file.
        path: PathBuf,
    },
}

impl Cli {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        if let CliCommand::Checksum { path } = &cli.command {
            logging::init_logging_stderr();
            return run_checksum(path).await;
        }

        let cfg = config::load_or_init()?;
        let mut paths = StatePaths::from_config(&cfg)?;
        if let Some(dir) = cli.state_dir {
            paths.state_dir = dir;
        }
        if let Some(dir) = cli.data_dir {
            paths.data_dir = dir;
        }
        if let Err(e) = logging::init_logging(&paths.state_dir) {
            logging::init_logging_stderr();
            tracing::warn!("file logging unavailable ({:#}); logging to stderr", e);
        }
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Run {
                congress,
                kind,
                workers,
            } => {
                let kinds = if kind.is_empty() {
                    JobKind::ALL.to_vec()
                } else {
                    kind
                };
                let workers = workers.unwrap_or(cfg.max_workers);
                run_harvest(cfg, paths, workers, &congress.0, &kinds).await
            }
            CliCommand::Resume {
                workers,
                retry_failed,
            } => {
                let workers = workers.unwrap_or(cfg.max_workers);
                run_resume(cfg, paths, workers, retry_failed).await
            }
            CliCommand::Status => run_status(cfg, paths).await,
            CliCommand::Validate => run_validate(cfg, paths).await,
            CliCommand::Compress { older_than_days } => {
                run_compress(cfg, paths, older_than_days).await
            }
            // Handled before config and logging are set up.
            CliCommand::Checksum { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests;
