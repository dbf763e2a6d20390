//! Acquisition job row and lifecycle states.

use sqlx::FromRow;

use crate::search::CandidateBook;

/// Lifecycle states of an acquisition job.
///
/// Jobs move `waiting -> active -> completed | failed`; a retryable failure
/// returns the job to `waiting` with a backoff-delayed `available_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Enqueued and claimable once `available_at` has passed.
    Waiting,
    /// Claimed by exactly one worker.
    Active,
    /// Terminal: produced a catalog record or a duplicate skip.
    Completed,
    /// Terminal: gave up after a permanent error or exhausted attempts.
    Failed,
}

impl JobState {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One persisted acquisition job.
///
/// The candidate payload is flattened into `cand_*` columns so the job row
/// is self-contained: a worker needs nothing but this row to run the full
/// pipeline.
#[derive(Debug, Clone, FromRow)]
pub struct Job {
    /// Row id.
    pub id: i64,
    /// Unique key derived from (category, batch instant, batch index).
    pub job_key: String,
    /// Material type this job was enqueued under.
    pub category: String,
    /// Position within its enqueue batch.
    pub batch_index: i64,
    /// Candidate title.
    pub cand_title: String,
    /// Candidate author.
    pub cand_author: String,
    /// Candidate binary URL.
    pub cand_download_url: String,
    /// Candidate landing page.
    pub cand_source_url: Option<String>,
    /// Candidate abstract.
    pub cand_abstract: Option<String>,
    /// Candidate publication year.
    pub cand_year: Option<i64>,
    /// Provider the candidate came from.
    pub cand_source: String,
    /// Provider-scoped identifier.
    pub cand_source_id: Option<String>,
    /// Lifecycle state string (see [`JobState`]).
    pub state: String,
    /// Number of times this job has been claimed.
    pub attempts: i64,
    /// Pipeline progress 0-100, observability only.
    pub progress: i64,
    /// Terminal outcome description, set on completion.
    pub outcome: Option<String>,
    /// Most recent error message.
    pub last_error: Option<String>,
    /// Unix seconds; the job is claimable once this has passed.
    pub available_at: i64,
    /// Unix seconds; set when the job reaches a terminal state.
    pub finished_at: Option<i64>,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

impl Job {
    /// Parsed lifecycle state, `None` for an unrecognized value.
    #[must_use]
    pub fn job_state(&self) -> Option<JobState> {
        JobState::parse(&self.state)
    }

    /// Reassembles the candidate payload for the pipeline.
    #[must_use]
    pub fn candidate(&self) -> CandidateBook {
        CandidateBook {
            title: self.cand_title.clone(),
            author: self.cand_author.clone(),
            download_url: self.cand_download_url.clone(),
            source_url: self.cand_source_url.clone(),
            abstract_text: self.cand_abstract.clone(),
            year: self.cand_year,
            source: source_name(&self.cand_source),
            source_id: self.cand_source_id.clone(),
        }
    }
}

/// Maps a stored provider name back to its static form.
fn source_name(source: &str) -> &'static str {
    match source {
        "core" => "core",
        "archive" => "archive",
        "openlibrary" => "openlibrary",
        _ => "unknown",
    }
}
