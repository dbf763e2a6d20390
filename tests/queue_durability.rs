//! Integration tests for queue durability across process restarts.
//!
//! These tests verify the job queue against a real SQLite database file,
//! reopening the file to simulate a new process.

use libharvest::queue::{JobQueue, JobState, QueueMetrics};
use libharvest::search::CandidateBook;
use libharvest::Database;
use tempfile::TempDir;

fn candidate(title: &str) -> CandidateBook {
    CandidateBook {
        title: title.to_string(),
        author: "A. Perera".to_string(),
        download_url: format!("https://example.com/{title}.pdf"),
        source_url: None,
        abstract_text: None,
        year: Some(2024),
        source: "core",
        source_id: None,
    }
}

/// Helper to create a test database file with migrations applied.
async fn setup_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("harvest.db");

    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");

    (db, temp_dir)
}

// ==================== Restart Survival ====================

#[tokio::test]
async fn test_jobs_survive_database_reopen() {
    let (db, temp_dir) = setup_test_db().await;
    let db_path = temp_dir.path().join("harvest.db");

    let queue = JobQueue::new(db.clone());
    queue
        .enqueue_bulk("JR", &[candidate("alpha"), candidate("beta")])
        .await
        .expect("Failed to enqueue");
    db.close().await;

    // A new process opens the same file; migrations are a no-op.
    let db = Database::new(&db_path)
        .await
        .expect("Failed to reopen database");
    let queue = JobQueue::new(db);

    let metrics = queue.metrics().await.expect("Failed to read metrics");
    assert_eq!(
        metrics,
        QueueMetrics {
            waiting: 2,
            ..QueueMetrics::default()
        }
    );

    let job = queue
        .pull_next()
        .await
        .expect("Failed to pull")
        .expect("expected a claimable job");
    assert_eq!(job.cand_title, "alpha");
    assert_eq!(job.cand_author, "A. Perera");
}

#[tokio::test]
async fn test_crash_recovery_reclaims_active_jobs_after_reopen() {
    let (db, temp_dir) = setup_test_db().await;
    let db_path = temp_dir.path().join("harvest.db");

    let queue = JobQueue::new(db.clone());
    queue
        .enqueue_bulk("RBOOK", &[candidate("alpha"), candidate("beta")])
        .await
        .expect("Failed to enqueue");

    // Claim one job and "crash" without resolving it.
    let claimed = queue
        .pull_next()
        .await
        .expect("Failed to pull")
        .expect("expected a claimable job");
    db.close().await;

    let db = Database::new(&db_path)
        .await
        .expect("Failed to reopen database");
    let queue = JobQueue::new(db);

    let metrics = queue.metrics().await.expect("Failed to read metrics");
    assert_eq!(metrics.active, 1);
    assert_eq!(metrics.waiting, 1);

    // Worker startup recovery makes the orphan claimable again.
    let reset = queue.reset_active().await.expect("Failed to reset");
    assert_eq!(reset, 1);

    let first = queue.pull_next().await.expect("Failed to pull").unwrap();
    let second = queue.pull_next().await.expect("Failed to pull").unwrap();
    assert!(
        first.id == claimed.id || second.id == claimed.id,
        "the orphaned job must be claimable again"
    );
    // The reclaimed orphan keeps its attempt history.
    let orphan = if first.id == claimed.id { first } else { second };
    assert_eq!(orphan.attempts, 2);
}

#[tokio::test]
async fn test_terminal_states_persist_across_reopen() {
    let (db, temp_dir) = setup_test_db().await;
    let db_path = temp_dir.path().join("harvest.db");

    let queue = JobQueue::new(db.clone());
    queue
        .enqueue_bulk("JR", &[candidate("done"), candidate("dead")])
        .await
        .expect("Failed to enqueue");

    let done = queue.pull_next().await.expect("Failed to pull").unwrap();
    queue
        .ack(done.id, "acquired BK1")
        .await
        .expect("Failed to ack");
    let dead = queue.pull_next().await.expect("Failed to pull").unwrap();
    queue
        .fail(dead.id, "validation failed: missing PDF signature")
        .await
        .expect("Failed to fail");
    db.close().await;

    let db = Database::new(&db_path)
        .await
        .expect("Failed to reopen database");
    let queue = JobQueue::new(db);

    let done = queue.get(done.id).await.expect("Failed to get").unwrap();
    assert_eq!(done.job_state(), Some(JobState::Completed));
    assert_eq!(done.outcome.as_deref(), Some("acquired BK1"));

    let dead = queue.get(dead.id).await.expect("Failed to get").unwrap();
    assert_eq!(dead.job_state(), Some(JobState::Failed));
    assert_eq!(
        dead.last_error.as_deref(),
        Some("validation failed: missing PDF signature")
    );
    assert!(queue.pull_next().await.expect("Failed to pull").is_none());
}

// ==================== Concurrent Claims ====================

#[tokio::test]
async fn test_concurrent_pulls_never_share_a_job() {
    let (db, _temp_dir) = setup_test_db().await;
    let queue = JobQueue::new(db);

    let candidates: Vec<_> = (0..8).map(|i| candidate(&format!("book-{i}"))).collect();
    queue
        .enqueue_bulk("JR", &candidates)
        .await
        .expect("Failed to enqueue");

    // Hammer the queue from several tasks at once; every claimed id must
    // be distinct.
    let mut handles = Vec::new();
    for _ in 0..4 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            while let Some(job) = queue.pull_next().await.expect("Failed to pull") {
                ids.push(job.id);
            }
            ids
        }));
    }

    let mut all_ids = Vec::new();
    for handle in handles {
        all_ids.extend(handle.await.expect("task panicked"));
    }

    all_ids.sort_unstable();
    let before = all_ids.len();
    all_ids.dedup();
    assert_eq!(before, 8, "every job claimed exactly once");
    assert_eq!(all_ids.len(), 8, "no job delivered to two claimants");
}
