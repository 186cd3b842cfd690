use anyhow::{anyhow, Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::job::{Job, JobKind, JobMetadata, JobStatus};

/// Columns selected by every query that maps to [`Job`].
pub(super) const JOB_COLUMNS: &str = "id, kind, congress, metadata_json, status, retries, \
     last_error, created_at, updated_at, completed_at";

pub(super) fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let id: String = row.get("id");
    let kind_str: String = row.get("kind");
    let kind: JobKind = kind_str
        .parse()
        .map_err(|e: String| anyhow!(e))
        .with_context(|| format!("job {}", id))?;
    let metadata_json: String = row.get("metadata_json");
    let metadata: JobMetadata = serde_json::from_str(&metadata_json)
        .with_context(|| format!("job {}: bad metadata_json", id))?;
    let status_str: String = row.get("status");
    let congress: i64 = row.get("congress");
    let retries: i64 = row.get("retries");

    Ok(Job {
        id,
        kind,
        congress: congress as u32,
        status: JobStatus::from_db(&status_str),
        retries: retries.max(0) as u32,
        metadata,
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
    })
}
