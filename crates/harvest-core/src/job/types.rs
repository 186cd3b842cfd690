//! Types shared by the queue, scheduler, and resume logic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque job identifier (UUID v4 string).
pub type JobId = String;

/// Earliest congress the collector enumerates.
pub const MIN_CONGRESS: u32 = 93;
/// Latest congress the collector enumerates.
pub const MAX_CONGRESS: u32 = 118;

/// True if `congress` is inside the supported range.
pub fn congress_in_range(congress: u32) -> bool {
    (MIN_CONGRESS..=MAX_CONGRESS).contains(&congress)
}

/// Category of legislative data fetched by a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Bills,
    Members,
    HouseVotes,
    SenateVotes,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::Bills,
        JobKind::Members,
        JobKind::HouseVotes,
        JobKind::SenateVotes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Bills => "bills",
            JobKind::Members => "members",
            JobKind::HouseVotes => "house_votes",
            JobKind::SenateVotes => "senate_votes",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "bills" | "bill" => Ok(JobKind::Bills),
            "members" | "member" => Ok(JobKind::Members),
            "house_votes" | "house_vote" => Ok(JobKind::HouseVotes),
            "senate_votes" | "senate_vote" => Ok(JobKind::SenateVotes),
            other => Err(format!(
                "unknown kind '{}' (expected bills, members, house_votes, senate_votes)",
                other
            )),
        }
    }
}

/// Lifecycle status of a job, stored as a string in the state database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Unknown strings map to `Failed` so a damaged row is never silently re-run.
    pub fn from_db(s: &str) -> Self {
        match s {
            "pending" => JobStatus::Pending,
            "in_progress" => JobStatus::InProgress,
            "completed" => JobStatus::Completed,
            _ => JobStatus::Failed,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-job metadata, stored as JSON next to the typed columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JobMetadata {
    /// Page of a multi-page listing; `None` is the first page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl JobMetadata {
    pub fn page(token: impl Into<String>) -> Self {
        Self {
            page_token: Some(token.into()),
            note: None,
        }
    }

    /// Key used for idempotent enqueue: two jobs with the same kind, congress
    /// and dedupe key describe the same fetch target.
    pub fn dedupe_key(&self) -> &str {
        self.page_token.as_deref().unwrap_or("")
    }
}

/// Full job record as held by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub congress: u32,
    pub status: JobStatus,
    pub retries: u32,
    pub metadata: JobMetadata,
    /// Reason for the most recent failure, if any.
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl Job {
    /// Storage key of the artifact this job produces.
    pub fn artifact_key(&self) -> String {
        super::artifact_key(self.kind, self.congress, self.metadata.page_token.as_deref())
    }
}

/// Per-status job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.in_progress + self.completed + self.failed
    }
}

/// One recorded failure reason, newest first in `status` output.
#[derive(Debug, Clone)]
pub struct FailureNote {
    pub job_id: JobId,
    pub kind: JobKind,
    pub congress: u32,
    pub status: JobStatus,
    pub retries: u32,
    pub reason: String,
    pub at: i64,
}
