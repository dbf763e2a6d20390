//! Rolling-window rate limiting for job starts.
//!
//! The worker pool bounds how many jobs may run at once with a semaphore;
//! [`JobRateLimiter`] independently bounds how many jobs may *start* within
//! a rolling time window so a freshly populated queue does not hammer the
//! upstream archives the moment the pool spins up.
//!
//! # Overview
//!
//! The limiter is a token bucket over a rolling window: at most `max_starts`
//! starts are permitted within any `window`-long span. [`acquire`] blocks
//! (via `tokio::time::sleep`) until a slot frees up, which keeps the limiter
//! fully deterministic under `tokio::time::pause` in tests.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use libharvest::rate_limit::JobRateLimiter;
//!
//! # async fn example() {
//! // At most 10 job starts per minute.
//! let limiter = Arc::new(JobRateLimiter::new(10, Duration::from_secs(60)));
//!
//! let limiter_clone = Arc::clone(&limiter);
//! tokio::spawn(async move {
//!     limiter_clone.acquire().await;
//!     // ... run the job
//! });
//! # }
//! ```
//!
//! [`acquire`]: JobRateLimiter::acquire

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Rolling-window limiter on job starts.
///
/// Designed to be wrapped in `Arc` and shared across worker tasks. Holds a
/// `tokio::sync::Mutex` over the start history so a waiting task never
/// blocks the runtime thread.
#[derive(Debug)]
pub struct JobRateLimiter {
    /// Maximum starts permitted within any rolling window.
    max_starts: usize,

    /// Length of the rolling window.
    window: Duration,

    /// Whether limiting is disabled (rate of 0 means unlimited).
    disabled: bool,

    /// Start instants within the current window, oldest first.
    starts: Mutex<VecDeque<Instant>>,
}

impl JobRateLimiter {
    /// Creates a limiter permitting `max_starts` job starts per `window`.
    ///
    /// A `max_starts` of 0 is treated as unlimited, mirroring the CLI
    /// convention where a rate of zero disables limiting.
    #[must_use]
    pub fn new(max_starts: usize, window: Duration) -> Self {
        Self {
            max_starts,
            window,
            disabled: max_starts == 0 || window.is_zero(),
            starts: Mutex::new(VecDeque::new()),
        }
    }

    /// Creates a disabled limiter that never delays.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_starts: 0,
            window: Duration::ZERO,
            disabled: true,
            starts: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns whether limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Waits until a start slot is available, then consumes it.
    ///
    /// Holds the history lock across the sleep so starts are granted in
    /// arrival order; the wait itself never occupies a runtime thread.
    #[instrument(skip(self))]
    pub async fn acquire(&self) {
        if self.disabled {
            return;
        }

        let mut starts = self.starts.lock().await;

        loop {
            let now = Instant::now();

            // Drop starts that have aged out of the window.
            while let Some(&oldest) = starts.front() {
                if now.duration_since(oldest) >= self.window {
                    starts.pop_front();
                } else {
                    break;
                }
            }

            if starts.len() < self.max_starts {
                starts.push_back(now);
                return;
            }

            // Window is full; sleep until the oldest start expires.
            if let Some(&oldest) = starts.front() {
                let wait = self.window.saturating_sub(now.duration_since(oldest));
                debug!(wait_ms = wait.as_millis(), "rate limit window full, waiting");
                tokio::time::sleep(wait).await;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Constructor Tests ====================

    #[test]
    fn test_zero_rate_is_disabled() {
        assert!(JobRateLimiter::new(0, Duration::from_secs(60)).is_disabled());
        assert!(JobRateLimiter::new(5, Duration::ZERO).is_disabled());
        assert!(JobRateLimiter::disabled().is_disabled());
        assert!(!JobRateLimiter::new(5, Duration::from_secs(60)).is_disabled());
    }

    // ==================== Acquisition Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_disabled_limiter_never_delays() {
        let limiter = JobRateLimiter::disabled();
        let start = Instant::now();

        for _ in 0..100 {
            limiter.acquire().await;
        }

        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_within_budget_are_immediate() {
        let limiter = JobRateLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_beyond_budget_waits_for_window() {
        let limiter = JobRateLimiter::new(2, Duration::from_secs(10));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;

        // Third start must wait until the first has aged out.
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_rolls_rather_than_resets() {
        let limiter = JobRateLimiter::new(2, Duration::from_secs(10));

        limiter.acquire().await; // t = 0
        tokio::time::advance(Duration::from_secs(6)).await;
        limiter.acquire().await; // t = 6

        // t = 6, window holds starts at 0 and 6. Next slot frees at t = 10,
        // not at t = 16.
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(4));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_refreshes_after_quiet_period() {
        let limiter = JobRateLimiter::new(2, Duration::from_secs(10));

        limiter.acquire().await;
        limiter.acquire().await;

        tokio::time::advance(Duration::from_secs(11)).await;

        // Whole window elapsed; both slots free again.
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }
}
