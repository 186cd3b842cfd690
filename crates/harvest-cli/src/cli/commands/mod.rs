//! CLI command handlers, one file per command.

mod checksum;
mod compress;
mod progress;
mod resume;
mod run;
mod status;
mod validate;

pub use checksum::run_checksum;
pub use compress::run_compress;
pub use resume::run_resume;
pub use run::run_harvest;
pub use status::run_status;
pub use validate::run_validate;

use anyhow::Result;
use harvest_core::config::{HarvestConfig, StatePaths};
use harvest_core::source::HttpSource;
use harvest_core::Harvester;
use std::sync::Arc;

/// Harvester over the configured HTTP source.
async fn open_harvester(cfg: HarvestConfig, paths: StatePaths) -> Result<Harvester> {
    let source = Arc::new(HttpSource::new(cfg.source.clone(), cfg.request_timeout()));
    Harvester::open(cfg, source, paths).await
}
