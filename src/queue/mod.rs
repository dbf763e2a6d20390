//! Durable acquisition job queue.
//!
//! SQLite-backed queue that survives process restarts. Jobs move through
//! `waiting -> active -> completed | failed`; retryable failures return to
//! `waiting` with an exponentially backed-off `available_at`, and claims
//! use atomic `UPDATE ... RETURNING` so a job id is only ever delivered to
//! one worker at a time.
//!
//! # Overview
//!
//! - [`JobQueue`] - main interface for queue operations
//! - [`Job`] - one persisted acquisition job with its candidate payload
//! - [`JobState`] - lifecycle states
//! - [`QueueError`] - operation error types
//!
//! # Example
//!
//! ```ignore
//! use libharvest::queue::JobQueue;
//! use libharvest::Database;
//!
//! let db = Database::new(Path::new("harvest.db")).await?;
//! let queue = JobQueue::new(db);
//!
//! let enqueued = queue.enqueue_bulk("JR", &candidates).await?;
//! while let Some(job) = queue.pull_next().await? {
//!     // ... run the pipeline ...
//!     queue.ack(job.id, "acquired BK123").await?;
//! }
//! ```

mod error;
mod job;

pub use error::QueueError;
pub use job::{Job, JobState};

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sqlx::Row;
use tracing::{debug, instrument, warn};

use crate::db::Database;
use crate::search::CandidateBook;

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Default ceiling on claims per job before terminal failure.
pub const DEFAULT_MAX_ATTEMPTS: i64 = 4;

/// Base of the queue-level retry backoff (1 minute).
const RETRY_BASE_DELAY_SECS: i64 = 60;

/// Cap on the queue-level retry backoff (1 hour).
const RETRY_MAX_DELAY_SECS: i64 = 3600;

/// Default retention for completed jobs (1 day).
pub const DEFAULT_COMPLETED_TTL: Duration = Duration::from_secs(24 * 3600);

/// Default retention for failed jobs (7 days).
pub const DEFAULT_FAILED_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Returns `Ok(())` if at least one row was affected; otherwise [`QueueError::JobNotFound`].
fn check_affected(id: i64, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(QueueError::JobNotFound(id))
    } else {
        Ok(())
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// What [`JobQueue::retry_or_fail`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Returned to waiting; claimable again at the embedded unix time.
    Requeued {
        /// Unix seconds the job becomes claimable.
        available_at: i64,
    },
    /// Attempt budget exhausted; the job is now terminally failed.
    FailedTerminal,
}

/// Point-in-time job counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueMetrics {
    /// Jobs waiting to be claimed (including backoff-delayed ones).
    pub waiting: i64,
    /// Jobs currently owned by a worker.
    pub active: i64,
    /// Terminally completed jobs still within retention.
    pub completed: i64,
    /// Terminally failed jobs still within retention.
    pub failed: i64,
}

/// Durable queue manager for acquisition jobs.
#[derive(Debug, Clone)]
pub struct JobQueue {
    db: Database,
    max_attempts: i64,
}

impl JobQueue {
    /// Creates a queue manager with the default attempt ceiling.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Overrides the per-job attempt ceiling.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: i64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Enqueues a batch of candidates for a category in one statement.
    ///
    /// Each job gets a key derived from the category, the batch instant and
    /// its index, so re-running the same batch in a different instant never
    /// collides while an accidental double-insert of one batch does (and is
    /// ignored). Zero candidates is a no-op, not an error.
    ///
    /// # Returns
    ///
    /// The number of jobs actually inserted.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the insert fails.
    #[instrument(skip(self, candidates), fields(count = candidates.len()))]
    pub async fn enqueue_bulk(
        &self,
        category: &str,
        candidates: &[CandidateBook],
    ) -> Result<usize> {
        if candidates.is_empty() {
            debug!(category, "no candidates to enqueue");
            return Ok(0);
        }

        let batch_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);

        let mut builder = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
            "INSERT OR IGNORE INTO jobs (
                job_key, category, batch_index,
                cand_title, cand_author, cand_download_url, cand_source_url,
                cand_abstract, cand_year, cand_source, cand_source_id
            ) ",
        );

        builder.push_values(candidates.iter().enumerate(), |mut row, (index, cand)| {
            row.push_bind(format!("{category}-{batch_millis}-{index}"))
                .push_bind(category)
                .push_bind(i64::try_from(index).unwrap_or(i64::MAX))
                .push_bind(&cand.title)
                .push_bind(&cand.author)
                .push_bind(&cand.download_url)
                .push_bind(&cand.source_url)
                .push_bind(&cand.abstract_text)
                .push_bind(cand.year)
                .push_bind(cand.source)
                .push_bind(&cand.source_id);
        });

        let result = builder.build().execute(self.db.pool()).await?;
        let inserted = usize::try_from(result.rows_affected()).unwrap_or(0);
        debug!(category, inserted, "enqueued candidate batch");
        Ok(inserted)
    }

    /// Claims the oldest due waiting job, if any.
    ///
    /// Atomic `UPDATE ... RETURNING` moves the job to active and bumps its
    /// attempt count in one statement, so no two workers can claim the same
    /// job. Jobs inside their backoff window (`available_at` in the future)
    /// are not eligible.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn pull_next(&self) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r"UPDATE jobs
              SET state = 'active', attempts = attempts + 1, updated_at = datetime('now')
              WHERE id = (
                  SELECT id FROM jobs
                  WHERE state = 'waiting' AND available_at <= ?
                  ORDER BY created_at ASC, id ASC
                  LIMIT 1
              )
              RETURNING *",
        )
        .bind(unix_now())
        .fetch_optional(self.db.pool())
        .await?;

        Ok(job)
    }

    /// Marks a job terminally completed with its outcome description.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::JobNotFound`] if no job exists with the id,
    /// or [`QueueError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn ack(&self, id: i64, outcome: &str) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE jobs
              SET state = 'completed', outcome = ?, progress = 100,
                  finished_at = ?, updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(outcome)
        .bind(unix_now())
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Marks a job terminally failed.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::JobNotFound`] if no job exists with the id,
    /// or [`QueueError::Database`] if the update fails.
    #[instrument(skip(self), fields(error = %error))]
    pub async fn fail(&self, id: i64, error: &str) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE jobs
              SET state = 'failed', last_error = ?,
                  finished_at = ?, updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(error)
        .bind(unix_now())
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Requeues a job after a retryable failure, or terminally fails it
    /// once its attempt budget is spent.
    ///
    /// The backoff delay doubles with each attempt already made,
    /// `min(1h, 60s * 2^(attempts - 1))`, applied through `available_at`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::JobNotFound`] if no job exists with the id,
    /// or [`QueueError::Database`] on query failure.
    #[instrument(skip(self), fields(error = %error))]
    pub async fn retry_or_fail(&self, id: i64, error: &str) -> Result<RetryDisposition> {
        let attempts: i64 = sqlx::query(r"SELECT attempts FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(QueueError::JobNotFound(id))?
            .get("attempts");

        if attempts >= self.max_attempts {
            warn!(id, attempts, "attempt budget exhausted, failing job");
            self.fail(id, error).await?;
            return Ok(RetryDisposition::FailedTerminal);
        }

        let exponent = u32::try_from(attempts.max(1) - 1).unwrap_or(0);
        let delay = RETRY_BASE_DELAY_SECS
            .saturating_mul(1i64 << exponent.min(30))
            .min(RETRY_MAX_DELAY_SECS);
        let available_at = unix_now() + delay;

        let result = sqlx::query(
            r"UPDATE jobs
              SET state = 'waiting', last_error = ?, available_at = ?,
                  updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(error)
        .bind(available_at)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())?;
        debug!(id, attempts, delay, "requeued job with backoff");
        Ok(RetryDisposition::Requeued { available_at })
    }

    /// Records pipeline progress for a job. Observability only; callers
    /// treat failures as non-fatal.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::JobNotFound`] if no job exists with the id,
    /// or [`QueueError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn update_progress(&self, id: i64, progress: i64) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE jobs SET progress = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(progress.clamp(0, 100))
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Gets a job by id.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(r"SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(job)
    }

    /// Counts jobs in every state at once.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn metrics(&self) -> Result<QueueMetrics> {
        let rows = sqlx::query(r"SELECT state, COUNT(*) as count FROM jobs GROUP BY state")
            .fetch_all(self.db.pool())
            .await?;

        let mut metrics = QueueMetrics::default();
        for row in rows {
            let count: i64 = row.get("count");
            match JobState::parse(row.get("state")) {
                Some(JobState::Waiting) => metrics.waiting = count,
                Some(JobState::Active) => metrics.active = count,
                Some(JobState::Completed) => metrics.completed = count,
                Some(JobState::Failed) => metrics.failed = count,
                None => {}
            }
        }

        Ok(metrics)
    }

    /// Deletes terminal jobs past their retention window.
    ///
    /// Completed jobs are kept for `completed_ttl`, failed jobs for
    /// `failed_ttl` (kept longer for diagnosis). Waiting and active jobs
    /// are never touched.
    ///
    /// # Returns
    ///
    /// The number of jobs deleted.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn sweep_expired(
        &self,
        completed_ttl: Duration,
        failed_ttl: Duration,
    ) -> Result<u64> {
        let now = unix_now();
        let completed_cutoff = now - i64::try_from(completed_ttl.as_secs()).unwrap_or(i64::MAX);
        let failed_cutoff = now - i64::try_from(failed_ttl.as_secs()).unwrap_or(i64::MAX);

        let result = sqlx::query(
            r"DELETE FROM jobs
              WHERE (state = 'completed' AND finished_at <= ?)
                 OR (state = 'failed' AND finished_at <= ?)",
        )
        .bind(completed_cutoff)
        .bind(failed_cutoff)
        .execute(self.db.pool())
        .await?;

        let swept = result.rows_affected();
        if swept > 0 {
            debug!(swept, "swept expired terminal jobs");
        }
        Ok(swept)
    }

    /// Returns orphaned active jobs to waiting.
    ///
    /// Called at worker startup for crash recovery: any job left active by
    /// a previous process is made claimable again immediately.
    ///
    /// # Returns
    ///
    /// The number of jobs reset.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn reset_active(&self) -> Result<u64> {
        let result = sqlx::query(
            r"UPDATE jobs
              SET state = 'waiting', updated_at = datetime('now')
              WHERE state = 'active'",
        )
        .execute(self.db.pool())
        .await?;

        let reset = result.rows_affected();
        if reset > 0 {
            warn!(reset, "reset orphaned active jobs to waiting");
        }
        Ok(reset)
    }
}
