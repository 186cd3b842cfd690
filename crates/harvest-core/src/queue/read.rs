//! Queue reads: snapshot, get, counts, recent failures.

use std::time::Duration;

use anyhow::Result;
use sqlx::Row;

use super::row::{job_from_row, JOB_COLUMNS};
use super::JobQueue;
use crate::db::unix_millis;
use crate::job::{FailureNote, Job, JobStatus, StatusCounts};

impl JobQueue {
    /// Copy of every job, oldest first.
    pub async fn snapshot(&self) -> Result<Vec<Job>> {
        let sql = format!("SELECT {} FROM jobs ORDER BY rowid ASC", JOB_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.db.pool).await?;
        rows.iter().map(job_from_row).collect()
    }

    pub async fn get(&self, id: &str) -> Result<Option<Job>> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.db.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    pub async fn counts(&self) -> Result<StatusCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs GROUP BY status")
            .fetch_all(&self.db.pool)
            .await?;
        let mut counts = StatusCounts::default();
        for row in rows {
            let n = row.get::<i64, _>("n").max(0) as u64;
            match JobStatus::from_db(&row.get::<String, _>("status")) {
                JobStatus::Pending => counts.pending += n,
                JobStatus::InProgress => counts.in_progress += n,
                JobStatus::Completed => counts.completed += n,
                JobStatus::Failed => counts.failed += n,
            }
        }
        Ok(counts)
    }

    /// Time until some Pending job can be claimed: zero if one is ready now,
    /// the shortest remaining retry delay otherwise. `None` when nothing is
    /// Pending.
    pub async fn next_claimable_in(&self) -> Result<Option<Duration>> {
        let earliest: Option<i64> =
            sqlx::query_scalar("SELECT MIN(not_before) FROM jobs WHERE status = 'pending'")
                .fetch_one(&self.db.pool)
                .await?;
        Ok(earliest.map(|at| Duration::from_millis((at - unix_millis()).max(0) as u64)))
    }

    /// The `limit` most recently updated jobs that carry a failure reason,
    /// newest first. Includes jobs still being retried.
    pub async fn recent_failures(&self, limit: usize) -> Result<Vec<FailureNote>> {
        let sql = format!(
            r#"
            SELECT {} FROM jobs
            WHERE last_error IS NOT NULL AND status != 'completed'
            ORDER BY updated_at DESC, rowid DESC
            LIMIT ?1
            "#,
            JOB_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.db.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let job = job_from_row(row)?;
            out.push(FailureNote {
                reason: job.last_error.clone().unwrap_or_default(),
                job_id: job.id,
                kind: job.kind,
                congress: job.congress,
                status: job.status,
                retries: job.retries,
                at: job.updated_at,
            });
        }
        Ok(out)
    }
}
