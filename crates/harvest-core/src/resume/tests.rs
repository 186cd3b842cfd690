use super::*;
use crate::db::open_memory;
use crate::job::JobMetadata;
use crate::retry::RetryPolicy;
use crate::storage::{temp_path, FsStorage};

struct Fixture {
    _dir: tempfile::TempDir,
    queue: JobQueue,
    progress: ProgressTracker,
    storage: Arc<FsStorage>,
    validator: Arc<DataValidator>,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db = open_memory().await.unwrap();
    let storage = Arc::new(FsStorage::new(dir.path().join("data")));
    let validator = Arc::new(
        DataValidator::open(&dir.path().join("state"), storage.clone())
            .await
            .unwrap(),
    );
    Fixture {
        _dir: dir,
        queue: JobQueue::new(db.clone(), RetryPolicy::default()),
        progress: ProgressTracker::start(&db).await.unwrap(),
        storage,
        validator,
    }
}

impl Fixture {
    fn manager(&self) -> ResumeManager {
        ResumeManager::new(
            self.queue.clone(),
            self.progress.clone(),
            self.validator.clone(),
            self.storage.clone(),
        )
    }

    /// Enqueue, claim, store, record, and complete one job.
    async fn completed_job(&self, kind: JobKind, congress: u32) -> Job {
        let e = self
            .queue
            .enqueue(kind, congress, JobMetadata::default())
            .await
            .unwrap();
        let job = self.queue.claim_next().await.unwrap().unwrap();
        assert_eq!(job.id, e.id);
        let body = format!("{{\"congress\":{}}}", congress);
        self.storage
            .write(&job.artifact_key(), body.as_bytes())
            .await
            .unwrap();
        self.validator
            .record(&job.artifact_key(), &DataValidator::checksum(body.as_bytes()), false)
            .await
            .unwrap();
        self.progress
            .record_completed(kind, congress, 1)
            .await
            .unwrap();
        self.queue.complete(&job.id).await.unwrap();
        job
    }
}

#[tokio::test]
async fn repairs_corrupt_missing_and_interrupted_jobs() {
    let f = fixture().await;
    let good = f.completed_job(JobKind::Bills, 110).await;
    let corrupt = f.completed_job(JobKind::Bills, 111).await;
    let missing = f.completed_job(JobKind::Members, 110).await;

    let corrupt_path = f.storage.path_for(&corrupt.artifact_key()).unwrap();
    let mut raw = std::fs::read(&corrupt_path).unwrap();
    raw[1] ^= 0x01;
    std::fs::write(&corrupt_path, raw).unwrap();
    std::fs::remove_file(f.storage.path_for(&missing.artifact_key()).unwrap()).unwrap();

    // Interrupted mid-write: InProgress with a leftover temp file.
    f.queue
        .enqueue(JobKind::HouseVotes, 112, JobMetadata::default())
        .await
        .unwrap();
    let interrupted = f.queue.claim_next().await.unwrap().unwrap();
    let part = temp_path(&f.storage.path_for(&interrupted.artifact_key()).unwrap());
    std::fs::create_dir_all(part.parent().unwrap()).unwrap();
    std::fs::write(&part, b"{\"trunc").unwrap();

    let report = f.manager().prepare(ResumeOptions::default()).await.unwrap();
    assert_eq!(report.verified, 1);
    assert_eq!(report.requeued_interrupted, 1);
    assert_eq!(report.partials_removed, 1);
    let mut demoted: Vec<&str> = report.demoted.iter().map(|d| d.job_id.as_str()).collect();
    demoted.sort();
    let mut expected = vec![corrupt.id.as_str(), missing.id.as_str()];
    expected.sort();
    assert_eq!(demoted, expected);
    assert!(!part.exists());
    assert!(!report.is_clean());

    assert_eq!(
        f.queue.get(&good.id).await.unwrap().unwrap().status,
        JobStatus::Completed
    );
    for id in [&corrupt.id, &missing.id, &interrupted.id] {
        assert_eq!(
            f.queue.get(id).await.unwrap().unwrap().status,
            JobStatus::Pending
        );
    }

    // Progress follows the repaired queue.
    let bills_111 = f.progress.get(JobKind::Bills, 111).await.unwrap().unwrap();
    assert_eq!((bills_111.completed, bills_111.total), (0, 1));
    let bills_110 = f.progress.get(JobKind::Bills, 110).await.unwrap().unwrap();
    assert_eq!((bills_110.completed, bills_110.total), (1, 1));
    let votes = f.progress.get(JobKind::HouseVotes, 112).await.unwrap().unwrap();
    assert_eq!((votes.completed, votes.total), (0, 1));
}

#[tokio::test]
async fn clean_state_is_left_alone() {
    let f = fixture().await;
    let job = f.completed_job(JobKind::SenateVotes, 100).await;
    let report = f.manager().prepare(ResumeOptions::default()).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.verified, 1);
    assert_eq!(
        f.queue.get(&job.id).await.unwrap().unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn failed_jobs_only_reset_on_request() {
    let f = fixture().await;
    f.queue
        .enqueue(JobKind::Bills, 93, JobMetadata::default())
        .await
        .unwrap();
    let job = f.queue.claim_next().await.unwrap().unwrap();
    f.queue.fail(&job.id, true, "HTTP 404").await.unwrap();

    let report = f.manager().prepare(ResumeOptions::default()).await.unwrap();
    assert_eq!(report.failed_reset, 0);
    assert_eq!(
        f.queue.get(&job.id).await.unwrap().unwrap().status,
        JobStatus::Failed
    );

    let report = f
        .manager()
        .prepare(ResumeOptions { retry_failed: true })
        .await
        .unwrap();
    assert_eq!(report.failed_reset, 1);
    assert_eq!(
        f.queue.get(&job.id).await.unwrap().unwrap().status,
        JobStatus::Pending
    );
}

#[tokio::test]
async fn reconcile_keeps_source_reported_totals() {
    let f = fixture().await;
    f.completed_job(JobKind::Bills, 115).await;
    f.progress.set_total(JobKind::Bills, 115, 8).await.unwrap();
    f.manager().prepare(ResumeOptions::default()).await.unwrap();
    let rec = f.progress.get(JobKind::Bills, 115).await.unwrap().unwrap();
    assert_eq!((rec.completed, rec.total), (1, 8));
}
