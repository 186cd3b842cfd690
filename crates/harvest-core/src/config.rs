use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::job::JobKind;
use crate::retry::RetryPolicy;

/// Whole or fractional seconds from config; rejects negative, NaN and infinite values.
fn secs_f64(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| anyhow!("{} = {}: {}", name, secs, e))
}

/// Admission control for outbound requests (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per rolling window.
    pub max_requests: u32,
    /// Length of the rolling window in seconds.
    pub window_secs: u64,
    /// First backoff step in seconds when upstream throttles without `Retry-After`.
    pub base_backoff_secs: f64,
    /// Upper bound on any single backoff, including server-provided `Retry-After`.
    pub max_backoff_secs: u64,
    /// Cap on the doubling backoff multiplier.
    pub max_multiplier: u32,
    /// Consecutive throttles at the backoff ceiling before the run is halted.
    pub max_throttles_at_ceiling: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 80,
            window_secs: 60,
            base_backoff_secs: 2.0,
            max_backoff_secs: 300,
            max_multiplier: 256,
            max_throttles_at_ceiling: 10,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.max(1))
    }

    /// Falls back to `max_backoff` for values [`HarvestConfig::validate`] rejects.
    pub fn base_backoff(&self) -> Duration {
        secs_f64("rate_limit.base_backoff_secs", self.base_backoff_secs)
            .unwrap_or_else(|_| self.max_backoff())
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

/// Spacing between attempts of a failing job (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry in seconds; doubles with each further retry.
    pub base_delay_secs: f64,
    /// Upper bound on the delay between retries, in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 2.0,
            max_delay_secs: 120,
        }
    }
}

/// Gzip settings for aged artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Gzip level 0-9.
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { level: 6 }
    }
}

/// Per-kind path segment substituted for `{kind}` in the URL template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindPaths {
    pub bills: String,
    pub members: String,
    pub house_votes: String,
    pub senate_votes: String,
}

impl Default for KindPaths {
    fn default() -> Self {
        Self {
            bills: "bill".to_string(),
            members: "member/congress".to_string(),
            house_votes: "house-vote".to_string(),
            senate_votes: "senate-vote".to_string(),
        }
    }
}

impl KindPaths {
    pub fn for_kind(&self, kind: JobKind) -> &str {
        match kind {
            JobKind::Bills => &self.bills,
            JobKind::Members => &self.members,
            JobKind::HouseVotes => &self.house_votes,
            JobKind::SenateVotes => &self.senate_votes,
        }
    }
}

/// Generic HTTP source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// URL with `{kind}` and `{congress}` placeholders.
    pub url_template: String,
    /// Environment variable holding the API key; unset means no key is sent.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Query parameter name used for the API key.
    pub api_key_param: String,
    /// Query parameter used when a page token is not itself a URL.
    pub page_param: String,
    /// JSON pointer to the next page URL in a response (e.g. `/pagination/next`).
    #[serde(default)]
    pub next_page_pointer: Option<String>,
    /// JSON pointer to the total record count in a response (e.g. `/pagination/count`).
    #[serde(default)]
    pub count_pointer: Option<String>,
    /// Records per page; with `count_pointer` gives the page total for progress.
    pub page_size: u64,
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub paths: KindPaths,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url_template: "https://api.congress.gov/v3/{kind}/{congress}?format=json&limit=250"
                .to_string(),
            api_key_env: Some("CONGRESS_API_KEY".to_string()),
            api_key_param: "api_key".to_string(),
            page_param: "offset".to_string(),
            next_page_pointer: Some("/pagination/next".to_string()),
            count_pointer: Some("/pagination/count".to_string()),
            page_size: 250,
            connect_timeout_secs: 15,
            paths: KindPaths::default(),
        }
    }
}

/// Required top-level JSON keys per kind. Empty means "any JSON object".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapeConfig {
    pub bills: Vec<String>,
    pub members: Vec<String>,
    pub house_votes: Vec<String>,
    pub senate_votes: Vec<String>,
}

fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|k| k.to_string()).collect()
}

impl Default for ShapeConfig {
    /// Keys every congress.gov list response carries.
    fn default() -> Self {
        Self {
            bills: keys(&["pagination", "bills"]),
            members: keys(&["pagination", "members"]),
            house_votes: keys(&["pagination", "houseRollCallVotes"]),
            senate_votes: keys(&["pagination", "senateRollCallVotes"]),
        }
    }
}

impl ShapeConfig {
    pub fn required_keys(&self, kind: JobKind) -> &[String] {
        match kind {
            JobKind::Bills => &self.bills,
            JobKind::Members => &self.members,
            JobKind::HouseVotes => &self.house_votes,
            JobKind::SenateVotes => &self.senate_votes,
        }
    }
}

/// Global configuration loaded from `~/.config/harvest/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Worker tasks in the fetch pool.
    pub max_workers: usize,
    /// Retries per job after the first attempt; beyond this a job is Failed.
    pub max_retries: u32,
    /// Per-call fetch timeout in seconds; a timeout is a transient failure.
    pub request_timeout_secs: u64,
    /// Distinct jobs failing on storage in a row before the run is halted.
    pub max_consecutive_storage_failures: u32,
    /// Failure reasons listed by `status`.
    pub recent_failures: usize,
    /// Artifact root; defaults to `~/.local/share/harvest/data`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub shape: ShapeConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_retries: 3,
            request_timeout_secs: 45,
            max_consecutive_storage_failures: 5,
            recent_failures: 10,
            data_dir: None,
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            compression: CompressionConfig::default(),
            source: SourceConfig::default(),
            shape: ShapeConfig::default(),
        }
    }
}

impl HarvestConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Reject values that cannot be turned into durations.
    pub fn validate(&self) -> Result<()> {
        secs_f64("rate_limit.base_backoff_secs", self.rate_limit.base_backoff_secs)?;
        secs_f64("retry.base_delay_secs", self.retry.base_delay_secs)?;
        Ok(())
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        Ok(RetryPolicy {
            max_retries: self.max_retries,
            base_delay: secs_f64("retry.base_delay_secs", self.retry.base_delay_secs)?,
            max_delay: Duration::from_secs(self.retry.max_delay_secs),
        })
    }
}

/// On-disk locations used by one harvester instance.
#[derive(Debug, Clone)]
pub struct StatePaths {
    /// Holds `state.db`, `checksums.json`, and the log file.
    pub state_dir: PathBuf,
    /// Root of the artifact tree.
    pub data_dir: PathBuf,
}

impl StatePaths {
    /// XDG defaults: `~/.local/state/harvest` and `~/.local/share/harvest/data`,
    /// with `data_dir` from config taking precedence.
    pub fn from_config(cfg: &HarvestConfig) -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("harvest")?;
        let state_dir = xdg_dirs.get_state_home();
        let data_dir = match &cfg.data_dir {
            Some(dir) => dir.clone(),
            None => xdg_dirs.get_data_home().join("data"),
        };
        Ok(Self {
            state_dir,
            data_dir,
        })
    }

    /// Both directories under one root (tests, ad-hoc runs).
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            state_dir: root.join("state"),
            data_dir: root.join("data"),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("harvest")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<HarvestConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = HarvestConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: HarvestConfig = toml::from_str(&data)?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = HarvestConfig::default();
        assert_eq!(cfg.max_workers, 4);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.rate_limit.max_requests, 80);
        assert_eq!(cfg.rate_limit.max_backoff(), Duration::from_secs(300));
        assert_eq!(cfg.compression.level, 6);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = HarvestConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: HarvestConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_workers, cfg.max_workers);
        assert_eq!(parsed.request_timeout_secs, cfg.request_timeout_secs);
        assert_eq!(parsed.source.url_template, cfg.source.url_template);
        assert_eq!(parsed.rate_limit.window_secs, cfg.rate_limit.window_secs);
    }

    #[test]
    fn config_toml_sections_are_optional() {
        let toml = r#"
            max_workers = 2
            max_retries = 5
            request_timeout_secs = 30
            max_consecutive_storage_failures = 3
            recent_failures = 20
        "#;
        let cfg: HarvestConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_workers, 2);
        assert_eq!(cfg.max_retries, 5);
        assert!(cfg.data_dir.is_none());
        assert_eq!(cfg.rate_limit.max_requests, 80);
        assert_eq!(cfg.retry.max_delay_secs, 120);
        assert_eq!(
            cfg.shape.required_keys(JobKind::Bills),
            &["pagination".to_string(), "bills".to_string()]
        );
    }

    #[test]
    fn config_toml_custom_sections() {
        let toml = r#"
            max_workers = 8
            max_retries = 2
            request_timeout_secs = 60
            max_consecutive_storage_failures = 4
            recent_failures = 5
            data_dir = "/srv/harvest"

            [rate_limit]
            max_requests = 100
            window_secs = 60
            base_backoff_secs = 0.5
            max_backoff_secs = 120
            max_multiplier = 64
            max_throttles_at_ceiling = 3

            [retry]
            base_delay_secs = 0.25
            max_delay_secs = 10

            [shape]
            bills = ["bills", "pagination"]
            members = []
        "#;
        let cfg: HarvestConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.data_dir.as_deref(), Some(std::path::Path::new("/srv/harvest")));
        assert_eq!(cfg.rate_limit.max_requests, 100);
        assert_eq!(cfg.rate_limit.base_backoff(), Duration::from_millis(500));
        assert_eq!(
            cfg.shape.required_keys(JobKind::Bills),
            &["bills".to_string(), "pagination".to_string()]
        );
        assert!(cfg.shape.required_keys(JobKind::Members).is_empty());
        assert_eq!(
            cfg.shape.required_keys(JobKind::SenateVotes),
            &["pagination".to_string(), "senateRollCallVotes".to_string()]
        );
        let policy = cfg.retry_policy().unwrap();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn unrepresentable_durations_are_config_errors() {
        let mut cfg = HarvestConfig::default();
        cfg.rate_limit.base_backoff_secs = f64::INFINITY;
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("rate_limit.base_backoff_secs"), "{}", err);
        // Never panics, even unvalidated.
        assert_eq!(cfg.rate_limit.base_backoff(), cfg.rate_limit.max_backoff());

        let mut cfg = HarvestConfig::default();
        cfg.retry.base_delay_secs = -1.0;
        assert!(cfg.validate().is_err());
        assert!(cfg.retry_policy().is_err());

        let mut cfg = HarvestConfig::default();
        cfg.rate_limit.base_backoff_secs = f64::NAN;
        assert!(cfg.validate().is_err());
        assert!(HarvestConfig::default().validate().is_ok());
    }

    #[test]
    fn state_paths_under_root() {
        let paths = StatePaths::under("/tmp/h");
        assert_eq!(paths.state_dir, PathBuf::from("/tmp/h/state"));
        assert_eq!(paths.data_dir, PathBuf::from("/tmp/h/data"));
    }
}
