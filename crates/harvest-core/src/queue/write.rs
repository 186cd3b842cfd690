//! Queue transitions: enqueue, claim, complete, fail, release, demote, reset.

use anyhow::{bail, Result};
use sqlx::Row;

use super::row::{job_from_row, JOB_COLUMNS};
use super::{Enqueued, JobQueue};
use crate::db::{unix_millis, unix_timestamp};
use crate::job::{congress_in_range, Job, JobKind, JobMetadata, JobStatus, MAX_CONGRESS, MIN_CONGRESS};

impl JobQueue {
    /// Add a Pending job for `(kind, congress, metadata)` unless one already
    /// exists for the same target, in which case its id is returned.
    pub async fn enqueue(
        &self,
        kind: JobKind,
        congress: u32,
        metadata: JobMetadata,
    ) -> Result<Enqueued> {
        if !congress_in_range(congress) {
            bail!(
                "congress {} out of range ({}-{})",
                congress,
                MIN_CONGRESS,
                MAX_CONGRESS
            );
        }
        let _guard = self.write_lock.lock().await;
        let meta_key = metadata.dedupe_key().to_string();
        let existing = sqlx::query(
            "SELECT id FROM jobs WHERE kind = ?1 AND congress = ?2 AND meta_key = ?3",
        )
        .bind(kind.as_str())
        .bind(congress as i64)
        .bind(&meta_key)
        .fetch_optional(&self.db.pool)
        .await?;
        if let Some(row) = existing {
            return Ok(Enqueued {
                id: row.get("id"),
                created: false,
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = unix_timestamp();
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, kind, congress, meta_key, metadata_json,
                status, retries, last_error, created_at, updated_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, NULL, ?7, ?7, NULL)
            "#,
        )
        .bind(&id)
        .bind(kind.as_str())
        .bind(congress as i64)
        .bind(&meta_key)
        .bind(serde_json::to_string(&metadata)?)
        .bind(JobStatus::Pending.as_str())
        .bind(now)
        .execute(&self.db.pool)
        .await?;
        tracing::debug!(job_id = %id, %kind, congress, page = %meta_key, "enqueued job");
        Ok(Enqueued { id, created: true })
    }

    /// Atomically move the oldest ready Pending job to InProgress and return
    /// it. Jobs waiting out a retry delay are skipped. Select and update are
    /// one statement, so two callers can never claim the same job.
    pub async fn claim_next(&self) -> Result<Option<Job>> {
        let _guard = self.write_lock.lock().await;
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'in_progress', updated_at = ?1
            WHERE rowid = (
                SELECT rowid FROM jobs
                WHERE status = 'pending' AND not_before <= ?2
                ORDER BY rowid ASC
                LIMIT 1
            )
            RETURNING {}
            "#,
            JOB_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(unix_timestamp())
            .bind(unix_millis())
            .fetch_optional(&self.db.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    /// InProgress -> Completed. Returns false (and warns) if the job was not
    /// InProgress; the call is then a no-op.
    pub async fn complete(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let now = unix_timestamp();
        let done = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', completed_at = ?1, updated_at = ?1, last_error = NULL
            WHERE id = ?2 AND status = 'in_progress'
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.db.pool)
        .await?
        .rows_affected();
        if done == 0 {
            tracing::warn!(job_id = %id, "complete: job is not in progress; ignoring");
        }
        Ok(done > 0)
    }

    /// Record a failed attempt. Permanent failures and exhausted jobs become
    /// Failed with `retries` unchanged; otherwise `retries` is incremented and
    /// the job goes back to Pending, claimable again after the policy's retry
    /// delay. Returns the resulting status, or `None` if the job was not
    /// InProgress.
    ///
    /// The decision is made inside a single UPDATE so no read transaction has
    /// to be upgraded while other writers hold the database. The delay column
    /// follows [`crate::retry::RetryPolicy::retry_delay`].
    pub async fn fail(&self, id: &str, permanent: bool, reason: &str) -> Result<Option<JobStatus>> {
        let _guard = self.write_lock.lock().await;
        let base_ms = self.policy.base_delay.as_millis().min(i64::MAX as u128) as i64;
        let max_ms = self.policy.max_delay.as_millis().min(i64::MAX as u128) as i64;
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = CASE WHEN ?1 OR retries >= ?2 THEN 'failed' ELSE 'pending' END,
                not_before = CASE WHEN ?1 OR retries >= ?2 THEN 0
                    ELSE ?3 + MIN(?5, ?4 << MIN(retries, 16)) END,
                retries = CASE WHEN ?1 OR retries >= ?2 THEN retries ELSE retries + 1 END,
                last_error = ?6,
                updated_at = ?7
            WHERE id = ?8 AND status = 'in_progress'
            RETURNING status, retries
            "#,
        )
        .bind(permanent)
        .bind(self.policy.max_retries as i64)
        .bind(unix_millis())
        .bind(base_ms)
        .bind(max_ms)
        .bind(reason)
        .bind(unix_timestamp())
        .bind(id)
        .fetch_optional(&self.db.pool)
        .await?;
        let Some(row) = row else {
            tracing::warn!(job_id = %id, "fail: job is unknown or not in progress; ignoring");
            return Ok(None);
        };
        let next = JobStatus::from_db(&row.get::<String, _>("status"));
        if next == JobStatus::Pending {
            let retries = row.get::<i64, _>("retries").max(1) as u32;
            tracing::debug!(
                job_id = %id,
                retries,
                retry_in_ms = self.policy.retry_delay(retries - 1).as_millis() as u64,
                "retry scheduled"
            );
        }
        Ok(Some(next))
    }

    /// InProgress -> Pending without consuming a retry (throttling, cancellation).
    pub async fn release(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let n = sqlx::query(
            "UPDATE jobs SET status = 'pending', not_before = 0, updated_at = ?1 WHERE id = ?2 AND status = 'in_progress'",
        )
        .bind(unix_timestamp())
        .bind(id)
        .execute(&self.db.pool)
        .await?
        .rows_affected();
        Ok(n > 0)
    }

    /// Completed or InProgress -> Pending, keeping `retries`. Used at startup
    /// for artifacts that failed integrity and for interrupted work.
    pub async fn demote(&self, id: &str, reason: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let n = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', completed_at = NULL, not_before = 0, last_error = ?1, updated_at = ?2
            WHERE id = ?3 AND status IN ('completed', 'in_progress')
            "#,
        )
        .bind(reason)
        .bind(unix_timestamp())
        .bind(id)
        .execute(&self.db.pool)
        .await?
        .rows_affected();
        Ok(n > 0)
    }

    /// Failed -> Pending with retries reset. Operator-driven only.
    pub async fn reset_failed(&self) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let n = sqlx::query(
            "UPDATE jobs SET status = 'pending', retries = 0, not_before = 0, updated_at = ?1 WHERE status = 'failed'",
        )
        .bind(unix_timestamp())
        .execute(&self.db.pool)
        .await?
        .rows_affected();
        Ok(n)
    }
}
