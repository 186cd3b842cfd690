//! Upstream data sources.
//!
//! The scheduler only knows the [`Source`] trait: a request for one page of
//! one (kind, congress) listing, answered with raw bytes or a tagged
//! [`FetchError`]. [`HttpSource`] is the generic curl-based implementation.

mod http;

use async_trait::async_trait;

use crate::job::{Job, JobKind};
use crate::retry::FetchError;

pub use http::HttpSource;

/// One page of one listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub kind: JobKind,
    pub congress: u32,
    /// `None` for the first page.
    pub page_token: Option<String>,
}

impl From<&Job> for FetchRequest {
    fn from(job: &Job) -> Self {
        Self {
            kind: job.kind,
            congress: job.congress,
            page_token: job.metadata.page_token.clone(),
        }
    }
}

/// A fetched page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub bytes: Vec<u8>,
    /// Token of the following page, if the listing continues.
    pub next_page: Option<String>,
    /// Number of pages in the whole listing, when the source can tell.
    pub total_pages: Option<u64>,
}

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            next_page: None,
            total_pages: None,
        }
    }
}

/// Something that can fetch pages.
#[async_trait]
pub trait Source: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Payload, FetchError>;
}
