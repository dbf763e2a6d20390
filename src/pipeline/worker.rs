//! Bounded worker pool driving the acquisition pipeline.
//!
//! The pool claims jobs from the queue and runs each through the pipeline
//! on its own task. Concurrency is bounded by a semaphore; job *starts* are
//! additionally gated by the shared [`JobRateLimiter`], which is a separate
//! knob from concurrency. Outcomes are reported to the injected
//! [`MetricsCollector`].
//!
//! In-flight jobs always run to a terminal disposition; the pool never
//! cancels a job mid-pipeline.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use super::{AcquisitionPipeline, JobOutcome};
use crate::metrics::MetricsCollector;
use crate::queue::{Job, JobQueue, QueueError, RetryDisposition};
use crate::rate_limit::JobRateLimiter;

/// Fixed-size worker pool over one queue.
pub struct WorkerPool {
    queue: JobQueue,
    pipeline: Arc<AcquisitionPipeline>,
    rate_limiter: Arc<JobRateLimiter>,
    metrics: Arc<dyn MetricsCollector>,
    concurrency: usize,
}

impl WorkerPool {
    /// Wires a pool from its collaborators.
    #[must_use]
    pub fn new(
        queue: JobQueue,
        pipeline: Arc<AcquisitionPipeline>,
        rate_limiter: Arc<JobRateLimiter>,
        metrics: Arc<dyn MetricsCollector>,
        concurrency: usize,
    ) -> Self {
        Self {
            queue,
            pipeline,
            rate_limiter,
            metrics,
            concurrency: concurrency.max(1),
        }
    }

    /// Processes jobs until no claimable work remains.
    ///
    /// Drains the queue of every due waiting job and waits for all
    /// in-flight jobs to finish. Jobs a finishing task requeues with a
    /// backoff window in the future are left for a later run; they are
    /// not busy-waited on.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if claiming from the queue fails. In-flight
    /// jobs still run to completion before the error propagates.
    #[instrument(skip(self))]
    pub async fn run_until_drained(&self) -> Result<(), QueueError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<()> = JoinSet::new();

        let result = loop {
            // Reap finished tasks so the set does not grow unboundedly.
            while let Some(joined) = tasks.try_join_next() {
                if let Err(error) = joined {
                    warn!(error = %error, "worker task panicked");
                }
            }

            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                // Semaphore is never closed; treat as drained.
                Err(_) => break Ok(()),
            };

            match self.queue.pull_next().await {
                Ok(Some(job)) => {
                    self.rate_limiter.acquire().await;
                    debug!(job_id = job.id, attempts = job.attempts, "claimed job");

                    let pipeline = Arc::clone(&self.pipeline);
                    let queue = self.queue.clone();
                    let metrics = Arc::clone(&self.metrics);
                    tasks.spawn(async move {
                        let _permit = permit;
                        run_job(&pipeline, &queue, metrics.as_ref(), &job).await;
                    });
                }
                Ok(None) => {
                    drop(permit);
                    // Nothing claimable: done once the last in-flight job
                    // (which may requeue work) has finished.
                    match tasks.join_next().await {
                        Some(Err(error)) => warn!(error = %error, "worker task panicked"),
                        Some(Ok(())) => {}
                        None => break Ok(()),
                    }
                }
                Err(error) => break Err(error),
            }
        };

        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                warn!(error = %error, "worker task panicked");
            }
        }

        result
    }
}

/// Runs one claimed job to a terminal disposition and records the outcome.
async fn run_job(
    pipeline: &AcquisitionPipeline,
    queue: &JobQueue,
    metrics: &dyn MetricsCollector,
    job: &Job,
) {
    match pipeline.process(job).await {
        Ok(outcome) => {
            if let Err(error) = queue.ack(job.id, &outcome.describe()).await {
                warn!(job_id = job.id, error = %error, "failed to ack completed job");
            }
            match outcome {
                JobOutcome::Acquired { barcode } => {
                    info!(job_id = job.id, barcode = %barcode, "job completed");
                    metrics.record_completed();
                }
                JobOutcome::SkippedDuplicate => {
                    info!(job_id = job.id, "job skipped as duplicate");
                    metrics.record_skipped();
                }
            }
        }
        Err(stage_error) if stage_error.is_retryable() => {
            match queue.retry_or_fail(job.id, &stage_error.to_string()).await {
                Ok(RetryDisposition::Requeued { available_at }) => {
                    info!(job_id = job.id, available_at, error = %stage_error, "job requeued");
                    metrics.record_retried();
                }
                Ok(RetryDisposition::FailedTerminal) => {
                    warn!(job_id = job.id, error = %stage_error, "job failed terminally");
                    metrics.record_failed();
                }
                Err(error) => {
                    warn!(job_id = job.id, error = %error, "failed to requeue job");
                }
            }
        }
        Err(stage_error) => {
            warn!(job_id = job.id, error = %stage_error, "permanent failure, failing job");
            if let Err(error) = queue.fail(job.id, &stage_error.to_string()).await {
                warn!(job_id = job.id, error = %error, "failed to mark job failed");
            }
            metrics.record_failed();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}
