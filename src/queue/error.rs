//! Error types for queue operations.

use thiserror::Error;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Database operation failed.
    #[error("queue database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The referenced job does not exist.
    #[error("job not found: {0}")]
    JobNotFound(i64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_not_found_display() {
        let error = QueueError::JobNotFound(42);
        assert!(error.to_string().contains("42"));
    }
}
