//! Run counters for the worker pool.
//!
//! The pool reports job outcomes through the [`MetricsCollector`] trait
//! rather than ambient globals, so tests can inject a collector and assert
//! on exact counts. [`AtomicMetrics`] is the standard implementation; a run
//! summary is read back through [`AtomicMetrics::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome counters reported by the worker pool.
///
/// Implementations must be cheap and non-blocking; these are called on the
/// hot path of every job.
pub trait MetricsCollector: Send + Sync {
    /// A job produced a catalog record.
    fn record_completed(&self);

    /// A job was skipped as a duplicate (no side effects).
    fn record_skipped(&self);

    /// A job failed retryably and was returned to the queue.
    fn record_retried(&self);

    /// A job reached terminal failure.
    fn record_failed(&self);
}

/// Point-in-time copy of the run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Jobs that produced a catalog record.
    pub completed: u64,
    /// Jobs skipped as duplicates.
    pub skipped: u64,
    /// Retryable failures returned to the queue.
    pub retried: u64,
    /// Terminal failures.
    pub failed: u64,
}

impl MetricsSnapshot {
    /// Total outcomes recorded (retries count each time they occur).
    #[must_use]
    pub fn total(&self) -> u64 {
        self.completed + self.skipped + self.retried + self.failed
    }
}

/// Lock-free collector backed by atomic counters.
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    completed: AtomicU64,
    skipped: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
}

impl AtomicMetrics {
    /// Creates a collector with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads all counters at once.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            completed: self.completed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            retried: self.retried.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

impl MetricsCollector for AtomicMetrics {
    fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_new_collector_is_zeroed() {
        let metrics = AtomicMetrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
        assert_eq!(metrics.snapshot().total(), 0);
    }

    #[test]
    fn test_counters_increment_independently() {
        let metrics = AtomicMetrics::new();
        metrics.record_completed();
        metrics.record_completed();
        metrics.record_skipped();
        metrics.record_retried();
        metrics.record_retried();
        metrics.record_retried();
        metrics.record_failed();

        let snap = metrics.snapshot();
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.skipped, 1);
        assert_eq!(snap.retried, 3);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.total(), 7);
    }

    #[tokio::test]
    async fn test_concurrent_recording_loses_nothing() {
        let metrics = Arc::new(AtomicMetrics::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let metrics = Arc::clone(&metrics);
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    metrics.record_completed();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(metrics.snapshot().completed, 800);
    }
}
