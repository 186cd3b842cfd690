//! Restart behavior: corrupted artifacts, interrupted jobs, failed-job retry.

mod common;

use common::{open, page_body, test_config, ScriptedSource};
use harvest_core::job::{JobKind, JobStatus};
use harvest_core::retry::FetchError;
use harvest_core::source::Payload;
use harvest_core::storage::temp_path;
use harvest_core::validator::Integrity;
use tempfile::tempdir;

#[tokio::test]
async fn corrupted_artifact_is_detected_and_refetched() {
    let dir = tempdir().unwrap();
    let source = ScriptedSource::new();
    {
        let h = open(dir.path(), test_config(), source.clone()).await;
        h.run(2, &[110], &[JobKind::Bills, JobKind::Members])
            .await
            .unwrap();
    }

    // Flip one byte of a stored artifact between runs.
    let h = open(dir.path(), test_config(), source.clone()).await;
    let bills = h
        .queue()
        .snapshot()
        .await
        .unwrap()
        .into_iter()
        .find(|j| j.kind == JobKind::Bills)
        .unwrap();
    let path = h.paths().data_dir.join(bills.artifact_key());
    let mut raw = std::fs::read(&path).unwrap();
    raw[0] ^= 0x20;
    std::fs::write(&path, raw).unwrap();

    let report = h.validate_all().await.unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].job_id, bills.id);
    assert!(matches!(report.failures[0].integrity, Integrity::Mismatch { .. }));

    // Upstream content changed since the first fetch; the refetch may replace it.
    let fresh = r#"{"bills":[],"pagination":{"count":0},"revised":true}"#.to_string();
    source.push(JobKind::Bills, 110, None, Ok(Payload::new(fresh.clone().into_bytes())));
    let outcome = h.resume(2, false).await.unwrap();
    assert_eq!(outcome.resume.demoted.len(), 1);
    assert_eq!(outcome.resume.verified, 1);
    assert_eq!(outcome.summary.completed, 1);
    assert_eq!(source.calls_for(JobKind::Bills, 110, None), 2);
    assert_eq!(source.calls_for(JobKind::Members, 110, None), 1);

    assert_eq!(std::fs::read(&path).unwrap(), fresh.into_bytes());
    assert!(h.validate_all().await.unwrap().failures.is_empty());
    let status = h.status().await.unwrap();
    assert_eq!((status.overall.completed, status.overall.total), (2, 2));
}

#[tokio::test]
async fn interrupted_job_is_requeued_and_its_partial_removed() {
    let dir = tempdir().unwrap();
    let source = ScriptedSource::new();
    {
        let h = open(dir.path(), test_config(), source.clone()).await;
        h.seed(&[118], &[JobKind::SenateVotes]).await.unwrap();
        // Simulate a crash mid-write: claimed, temp file on disk, never finished.
        let job = h.queue().claim_next().await.unwrap().unwrap();
        let part = temp_path(&h.paths().data_dir.join(job.artifact_key()));
        std::fs::create_dir_all(part.parent().unwrap()).unwrap();
        std::fs::write(&part, b"{\"senate_vo").unwrap();
    }

    let h = open(dir.path(), test_config(), source.clone()).await;
    let outcome = h.resume(1, false).await.unwrap();
    assert_eq!(outcome.resume.requeued_interrupted, 1);
    assert_eq!(outcome.resume.partials_removed, 1);
    assert_eq!(outcome.summary.completed, 1);

    let job = h.queue().snapshot().await.unwrap().remove(0);
    assert_eq!(job.status, JobStatus::Completed);
    let path = h.paths().data_dir.join(job.artifact_key());
    assert_eq!(
        std::fs::read(&path).unwrap(),
        page_body(JobKind::SenateVotes, 118, None)
    );
    assert!(!temp_path(&path).exists());
}

#[tokio::test]
async fn failed_jobs_wait_for_an_explicit_retry() {
    let dir = tempdir().unwrap();
    let source = ScriptedSource::new();
    source.push(
        JobKind::Members,
        99,
        None,
        Err(FetchError::permanent("HTTP 404: not found")),
    );
    let h = open(dir.path(), test_config(), source.clone()).await;
    h.run(1, &[99], &[JobKind::Members]).await.unwrap();

    let plain = h.resume(1, false).await.unwrap();
    assert_eq!(plain.resume.failed_reset, 0);
    assert_eq!(plain.summary.counts.failed, 1);
    assert_eq!(source.calls_for(JobKind::Members, 99, None), 1);

    let retried = h.resume(1, true).await.unwrap();
    assert_eq!(retried.resume.failed_reset, 1);
    assert_eq!(retried.summary.completed, 1);
    assert_eq!(retried.summary.counts.failed, 0);
    assert_eq!(source.calls_for(JobKind::Members, 99, None), 2);
}
