pub mod config;
pub mod logging;

// State
pub mod db;
pub mod job;
pub mod progress;
pub mod queue;

// Fetching
pub mod error;
pub mod rate_limiter;
pub mod retry;
pub mod scheduler;
pub mod source;

// Artifacts
pub mod compress;
pub mod storage;
pub mod validator;

pub mod harvester;
pub mod resume;

pub use harvester::Harvester;
