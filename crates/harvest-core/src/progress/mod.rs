//! Durable per-(kind, congress) progress counters and ETA.
//!
//! Counters live in the `progress` table of the state database. Workers
//! update them with single upsert statements, so concurrent increments never
//! lose a count.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use sqlx::{Pool, Row, Sqlite};

use crate::db::{unix_timestamp, StateDb};
use crate::job::JobKind;

/// Progress for one (kind, congress).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRecord {
    pub kind: JobKind,
    pub congress: u32,
    pub completed: u64,
    pub total: u64,
    pub last_updated: i64,
}

impl ProgressRecord {
    /// `completed / total * 100`, or 0 when total is 0.
    pub fn percentage(&self) -> f64 {
        percentage(self.completed, self.total)
    }
}

/// Totals across all records plus an ETA for the current session.
#[derive(Debug, Clone, PartialEq)]
pub struct OverallProgress {
    pub completed: u64,
    pub total: u64,
    pub percentage: f64,
    /// `None` until this session has completed something.
    pub eta: Option<Duration>,
}

fn percentage(completed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (completed as f64 / total as f64 * 100.0).min(100.0)
}

/// `elapsed * (100 - pct) / pct`; unknown while `pct` is 0.
pub fn eta_from(elapsed: Duration, pct: f64) -> Option<Duration> {
    if pct <= 0.0 || !pct.is_finite() {
        return None;
    }
    if pct >= 100.0 {
        return Some(Duration::ZERO);
    }
    Some(elapsed.mul_f64((100.0 - pct) / pct))
}

/// Progress counters. Cheap to clone.
#[derive(Clone)]
pub struct ProgressTracker {
    pool: Pool<Sqlite>,
    started: Instant,
    /// Completed count when this session started; ETA only counts work done since.
    baseline: u64,
}

impl ProgressTracker {
    /// Tracker whose ETA clock starts now.
    pub async fn start(db: &StateDb) -> Result<Self> {
        let mut tracker = Self {
            pool: db.pool.clone(),
            started: Instant::now(),
            baseline: 0,
        };
        tracker.baseline = tracker.sums().await?.0;
        Ok(tracker)
    }

    /// Raise the known total for (kind, congress). Totals only grow; a smaller
    /// value is logged and ignored.
    pub async fn set_total(&self, kind: JobKind, congress: u32, total: u64) -> Result<()> {
        if let Some(current) = self.get(kind, congress).await? {
            if total < current.total {
                tracing::warn!(
                    %kind,
                    congress,
                    current = current.total,
                    requested = total,
                    "progress total may not decrease; ignoring"
                );
                return Ok(());
            }
        }
        sqlx::query(
            r#"
            INSERT INTO progress (kind, congress, completed, total, last_updated)
            VALUES (?1, ?2, 0, ?3, ?4)
            ON CONFLICT (kind, congress) DO UPDATE
            SET total = MAX(total, excluded.total), last_updated = excluded.last_updated
            "#,
        )
        .bind(kind.as_str())
        .bind(congress as i64)
        .bind(total as i64)
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Add `delta` to the total (a new page was discovered).
    pub async fn grow_total(&self, kind: JobKind, congress: u32, delta: u64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO progress (kind, congress, completed, total, last_updated)
            VALUES (?1, ?2, 0, ?3, ?4)
            ON CONFLICT (kind, congress) DO UPDATE
            SET total = total + excluded.total, last_updated = excluded.last_updated
            "#,
        )
        .bind(kind.as_str())
        .bind(congress as i64)
        .bind(delta as i64)
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically add `delta` completed units. The total is raised if needed so
    /// `completed <= total` always holds.
    pub async fn record_completed(&self, kind: JobKind, congress: u32, delta: u64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO progress (kind, congress, completed, total, last_updated)
            VALUES (?1, ?2, ?3, ?3, ?4)
            ON CONFLICT (kind, congress) DO UPDATE
            SET completed = completed + excluded.completed,
                total = MAX(total, completed + excluded.completed),
                last_updated = excluded.last_updated
            "#,
        )
        .bind(kind.as_str())
        .bind(congress as i64)
        .bind(delta as i64)
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Overwrite a record with counts derived from the job queue. Only used at
    /// startup after resume repairs; a drop in `completed` is logged.
    pub async fn reconcile(
        &self,
        kind: JobKind,
        congress: u32,
        completed: u64,
        total: u64,
    ) -> Result<()> {
        let total = total.max(completed);
        if let Some(current) = self.get(kind, congress).await? {
            if current.completed == completed && current.total == total {
                return Ok(());
            }
            if completed < current.completed {
                tracing::info!(
                    %kind,
                    congress,
                    from = current.completed,
                    to = completed,
                    "progress rolled back after resume repairs"
                );
            }
        }
        sqlx::query(
            r#"
            INSERT INTO progress (kind, congress, completed, total, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (kind, congress) DO UPDATE
            SET completed = excluded.completed,
                total = excluded.total,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(kind.as_str())
        .bind(congress as i64)
        .bind(completed as i64)
        .bind(total as i64)
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, kind: JobKind, congress: u32) -> Result<Option<ProgressRecord>> {
        let row = sqlx::query(
            "SELECT kind, congress, completed, total, last_updated FROM progress WHERE kind = ?1 AND congress = ?2",
        )
        .bind(kind.as_str())
        .bind(congress as i64)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| record_from_row(&r)).transpose()
    }

    pub async fn records(&self) -> Result<Vec<ProgressRecord>> {
        let rows = sqlx::query(
            "SELECT kind, congress, completed, total, last_updated FROM progress ORDER BY kind, congress",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    pub async fn overall_progress(&self) -> Result<OverallProgress> {
        let (completed, total) = self.sums().await?;
        let pct = percentage(completed, total);
        let done_now = completed.saturating_sub(self.baseline);
        let left_now = total.saturating_sub(self.baseline);
        let eta = eta_from(self.started.elapsed(), percentage(done_now, left_now));
        Ok(OverallProgress {
            completed,
            total,
            percentage: pct,
            eta,
        })
    }

    async fn sums(&self) -> Result<(u64, u64)> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(completed), 0) AS c, COALESCE(SUM(total), 0) AS t FROM progress",
        )
        .fetch_one(&self.pool)
        .await?;
        let c: i64 = row.get("c");
        let t: i64 = row.get("t");
        Ok((c.max(0) as u64, t.max(0) as u64))
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ProgressRecord> {
    let kind_str: String = row.get("kind");
    let kind: JobKind = kind_str.parse().map_err(|e: String| anyhow!(e))?;
    let congress: i64 = row.get("congress");
    let completed: i64 = row.get("completed");
    let total: i64 = row.get("total");
    Ok(ProgressRecord {
        kind,
        congress: congress as u32,
        completed: completed.max(0) as u64,
        total: total.max(0) as u64,
        last_updated: row.get("last_updated"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory;

    #[test]
    fn eta_formula() {
        assert_eq!(eta_from(Duration::from_secs(60), 0.0), None);
        assert_eq!(
            eta_from(Duration::from_secs(60), 25.0),
            Some(Duration::from_secs(180))
        );
        assert_eq!(eta_from(Duration::from_secs(60), 100.0), Some(Duration::ZERO));
    }

    #[test]
    fn percentage_of_empty_total_is_zero() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(1, 4), 25.0);
    }

    #[tokio::test]
    async fn totals_only_increase() {
        let db = open_memory().await.unwrap();
        let p = ProgressTracker::start(&db).await.unwrap();
        p.set_total(JobKind::Bills, 110, 10).await.unwrap();
        p.set_total(JobKind::Bills, 110, 4).await.unwrap();
        let rec = p.get(JobKind::Bills, 110).await.unwrap().unwrap();
        assert_eq!(rec.total, 10);
        assert_eq!(rec.completed, 0);

        p.grow_total(JobKind::Bills, 110, 2).await.unwrap();
        assert_eq!(p.get(JobKind::Bills, 110).await.unwrap().unwrap().total, 12);
    }

    #[tokio::test]
    async fn completed_never_exceeds_total() {
        let db = open_memory().await.unwrap();
        let p = ProgressTracker::start(&db).await.unwrap();
        p.set_total(JobKind::Members, 100, 2).await.unwrap();
        for _ in 0..3 {
            p.record_completed(JobKind::Members, 100, 1).await.unwrap();
        }
        let rec = p.get(JobKind::Members, 100).await.unwrap().unwrap();
        assert_eq!(rec.completed, 3);
        assert_eq!(rec.total, 3);
        assert_eq!(rec.percentage(), 100.0);

        // Without a prior total, the record is created on first completion.
        p.record_completed(JobKind::HouseVotes, 101, 1).await.unwrap();
        let rec = p.get(JobKind::HouseVotes, 101).await.unwrap().unwrap();
        assert_eq!((rec.completed, rec.total), (1, 1));
    }

    #[tokio::test]
    async fn overall_progress_sums_records() {
        let db = open_memory().await.unwrap();
        let p = ProgressTracker::start(&db).await.unwrap();
        p.set_total(JobKind::Bills, 110, 3).await.unwrap();
        p.set_total(JobKind::Bills, 111, 1).await.unwrap();
        let empty = p.overall_progress().await.unwrap();
        assert_eq!((empty.completed, empty.total), (0, 4));
        assert_eq!(empty.eta, None);

        p.record_completed(JobKind::Bills, 110, 1).await.unwrap();
        let overall = p.overall_progress().await.unwrap();
        assert_eq!(overall.completed, 1);
        assert_eq!(overall.percentage, 25.0);
        assert!(overall.eta.is_some());
        assert_eq!(p.records().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reconcile_overwrites_counts() {
        let db = open_memory().await.unwrap();
        let p = ProgressTracker::start(&db).await.unwrap();
        p.set_total(JobKind::SenateVotes, 115, 5).await.unwrap();
        p.record_completed(JobKind::SenateVotes, 115, 5).await.unwrap();

        p.reconcile(JobKind::SenateVotes, 115, 3, 5).await.unwrap();
        let rec = p.get(JobKind::SenateVotes, 115).await.unwrap().unwrap();
        assert_eq!((rec.completed, rec.total), (3, 5));

        // Later sessions measure ETA from their own starting point.
        let later = ProgressTracker::start(&db).await.unwrap();
        assert_eq!(later.overall_progress().await.unwrap().eta, None);
    }

    #[tokio::test]
    async fn eta_counts_only_this_sessions_share_of_the_work() {
        let db = open_memory().await.unwrap();
        let first = ProgressTracker::start(&db).await.unwrap();
        first.set_total(JobKind::Bills, 110, 10).await.unwrap();
        first.record_completed(JobKind::Bills, 110, 8).await.unwrap();

        let resumed = ProgressTracker::start(&db).await.unwrap();
        resumed.record_completed(JobKind::Bills, 110, 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let overall = resumed.overall_progress().await.unwrap();
        assert_eq!(overall.percentage, 90.0);
        // Half of what was left at session start is done, so about as long
        // again remains; the all-time 90% would claim a ninth of that.
        let eta = overall.eta.unwrap();
        assert!(eta >= Duration::from_millis(45), "{:?}", eta);
    }
}
