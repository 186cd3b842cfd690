//! Shared fixtures: a scripted in-memory `Source` and a fast test config.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use harvest_core::config::{HarvestConfig, RateLimitConfig, RetryConfig, StatePaths};
use harvest_core::job::JobKind;
use harvest_core::retry::FetchError;
use harvest_core::source::{FetchRequest, Payload, Source};
use harvest_core::Harvester;

type Target = (JobKind, u32, Option<String>);

/// Answers each target from a per-target script; once a script runs out, the
/// target gets a single-page JSON listing.
#[derive(Default)]
pub struct ScriptedSource {
    script: Mutex<HashMap<Target, VecDeque<Result<Payload, FetchError>>>>,
    calls: Mutex<HashMap<Target, usize>>,
    stalls: Mutex<HashMap<Target, Duration>>,
    total: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(
        &self,
        kind: JobKind,
        congress: u32,
        page: Option<&str>,
        response: Result<Payload, FetchError>,
    ) {
        self.script
            .lock()
            .unwrap()
            .entry((kind, congress, page.map(str::to_string)))
            .or_default()
            .push_back(response);
    }

    /// Every fetch of the target sleeps for `by` before answering.
    pub fn stall(&self, kind: JobKind, congress: u32, page: Option<&str>, by: Duration) {
        self.stalls
            .lock()
            .unwrap()
            .insert((kind, congress, page.map(str::to_string)), by);
    }

    /// Fetches issued for one target.
    pub fn calls_for(&self, kind: JobKind, congress: u32, page: Option<&str>) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&(kind, congress, page.map(str::to_string)))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for ScriptedSource {
    async fn fetch(&self, request: &FetchRequest) -> Result<Payload, FetchError> {
        let target = (request.kind, request.congress, request.page_token.clone());
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().unwrap().entry(target.clone()).or_default() += 1;
        let stall = self.stalls.lock().unwrap().get(&target).copied();
        if let Some(by) = stall {
            tokio::time::sleep(by).await;
        }
        let scripted = self
            .script
            .lock()
            .unwrap()
            .get_mut(&target)
            .and_then(|q| q.pop_front());
        scripted.unwrap_or_else(|| {
            Ok(Payload::new(page_body(
                request.kind,
                request.congress,
                request.page_token.as_deref(),
            )))
        })
    }
}

/// Top-level key a congress.gov listing of `kind` carries.
pub fn list_key(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Bills => "bills",
        JobKind::Members => "members",
        JobKind::HouseVotes => "houseRollCallVotes",
        JobKind::SenateVotes => "senateRollCallVotes",
    }
}

/// Listing body that passes the default shape check for `kind`.
pub fn page_body(kind: JobKind, congress: u32, page: Option<&str>) -> Vec<u8> {
    serde_json::json!({
        (list_key(kind)): [{ "congress": congress, "page": page.unwrap_or("first") }],
        "pagination": { "count": 1 }
    })
    .to_string()
    .into_bytes()
}

/// Page with a continuation token.
pub fn paged(kind: JobKind, congress: u32, page: Option<&str>, next: &str, total: u64) -> Payload {
    Payload {
        bytes: page_body(kind, congress, page),
        next_page: Some(next.to_string()),
        total_pages: Some(total),
    }
}

/// Generous quota, millisecond-scale backoff and retry spacing so runs finish quickly.
pub fn test_config() -> HarvestConfig {
    HarvestConfig {
        max_workers: 3,
        max_retries: 3,
        retry: RetryConfig {
            base_delay_secs: 0.005,
            max_delay_secs: 1,
        },
        rate_limit: RateLimitConfig {
            max_requests: 10_000,
            window_secs: 60,
            base_backoff_secs: 0.005,
            max_backoff_secs: 1,
            max_multiplier: 4,
            max_throttles_at_ceiling: 3,
        },
        ..HarvestConfig::default()
    }
}

pub async fn open(root: &Path, cfg: HarvestConfig, source: Arc<ScriptedSource>) -> Harvester {
    Harvester::open(cfg, source, StatePaths::under(root))
        .await
        .unwrap()
}
