//! Per-job acquisition pipeline.
//!
//! [`AcquisitionPipeline::process`] runs one claimed job through the fixed
//! stage sequence: duplicate check, barcode allocation, fetch + validation,
//! artifact storage, access-URL signing, QR artifact, catalog insert.
//! Progress checkpoints are written back to the job row after each stage
//! for observability only; they carry no recovery semantics.
//!
//! Stage failures are typed through [`StageError`], and
//! [`StageError::is_retryable`] decides whether the worker returns the job
//! to the queue or fails it terminally. A duplicate discovered at any point
//! resolves to [`JobOutcome::SkippedDuplicate`], never an error.

mod worker;

pub use worker::WorkerPool;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::barcode::{BarcodeAllocator, BarcodeError};
use crate::catalog::{Catalog, CatalogError, NewRecord, WriteOutcome};
use crate::fetch::{FetchError, HttpFetcher};
use crate::qr;
use crate::queue::{Job, JobQueue};
use crate::retry::{RetryError, RetryExecutor};
use crate::storage::{ObjectStore, StorageError, artifact_path, qr_path};
use crate::validate::{ValidationError, validate};

/// Progress checkpoints written after each stage.
mod progress {
    pub const DUPLICATE_CHECKED: i64 = 10;
    pub const BARCODE_ALLOCATED: i64 = 20;
    pub const FETCHED: i64 = 50;
    pub const VALIDATED: i64 = 60;
    pub const STORED: i64 = 75;
    pub const SIGNED: i64 = 85;
    pub const QR_DONE: i64 = 90;
}

/// A stage failure with enough type structure to classify it.
#[derive(Debug, Error)]
pub enum StageError {
    /// Barcode allocation failed.
    #[error("barcode allocation: {0}")]
    Barcode(#[from] BarcodeError),

    /// The size probe reported a binary over the configured ceiling.
    #[error("binary size {size} exceeds limit of {limit} bytes")]
    Oversize {
        /// Advertised size in bytes.
        size: u64,
        /// Configured ceiling.
        limit: u64,
    },

    /// The fetch stage exhausted its retry budget (or hit a permanent
    /// HTTP error).
    #[error("fetch: {0}")]
    Fetch(#[from] RetryError<FetchError>),

    /// The downloaded binary failed validation.
    #[error("validation failed: {}", format_validation(.0))]
    Validation(Vec<ValidationError>),

    /// Artifact upload exhausted its retry budget.
    #[error("storage: {0}")]
    Store(#[from] RetryError<StorageError>),

    /// Signing the access URL failed.
    #[error("signing: {0}")]
    Sign(#[from] StorageError),

    /// A catalog operation failed.
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
}

fn format_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl StageError {
    /// Whether the job should return to the queue for another attempt.
    ///
    /// Permanent: a rejected binary (validation, oversize), a permanent
    /// HTTP answer, and barcode exhaustion. Everything else is assumed
    /// transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Barcode(BarcodeError::Exhausted { .. }) => false,
            Self::Barcode(BarcodeError::Catalog(_)) => true,
            Self::Oversize { .. } | Self::Validation(_) => false,
            Self::Fetch(retry) => retry.source.is_retryable(),
            Self::Store(_) | Self::Sign(_) | Self::Catalog(_) => true,
        }
    }
}

/// Terminal success of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// A catalog record was created under this barcode.
    Acquired {
        /// The allocated barcode.
        barcode: String,
    },
    /// An equivalent record already existed; nothing was written.
    SkippedDuplicate,
}

impl JobOutcome {
    /// Short description stored on the job row.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Acquired { barcode } => format!("acquired {barcode}"),
            Self::SkippedDuplicate => "skipped duplicate".to_string(),
        }
    }
}

/// Tunables for one pipeline instance.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Size ceiling for fetched binaries, in bytes.
    pub max_size_bytes: u64,
    /// TTL of issued signed access URLs.
    pub signed_url_ttl: Duration,
    /// Barcode candidates tried before giving up.
    pub barcode_max_attempts: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_size_bytes: 50 * 1024 * 1024,
            signed_url_ttl: Duration::from_secs(7 * 24 * 3600),
            barcode_max_attempts: crate::barcode::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Runs claimed jobs through the acquisition stage sequence.
pub struct AcquisitionPipeline {
    catalog: Arc<dyn Catalog>,
    allocator: BarcodeAllocator,
    store: Arc<dyn ObjectStore>,
    fetcher: HttpFetcher,
    retry: RetryExecutor,
    queue: JobQueue,
    settings: PipelineSettings,
}

impl AcquisitionPipeline {
    /// Wires a pipeline from its collaborators.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn Catalog>,
        store: Arc<dyn ObjectStore>,
        fetcher: HttpFetcher,
        retry: RetryExecutor,
        queue: JobQueue,
        settings: PipelineSettings,
    ) -> Self {
        let allocator = BarcodeAllocator::new(Arc::clone(&catalog));
        Self {
            catalog,
            allocator,
            store,
            fetcher,
            retry,
            queue,
            settings,
        }
    }

    /// Best-effort progress checkpoint; failures are logged and ignored.
    async fn checkpoint(&self, job_id: i64, pct: i64) {
        if let Err(error) = self.queue.update_progress(job_id, pct).await {
            debug!(job_id, pct, error = %error, "progress checkpoint failed");
        }
    }

    /// Runs one job to a terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns [`StageError`] for the first failing stage; the caller maps
    /// it to a queue retry or terminal failure via
    /// [`StageError::is_retryable`].
    #[instrument(skip(self, job), fields(job_id = job.id, title = %job.cand_title))]
    pub async fn process(&self, job: &Job) -> Result<JobOutcome, StageError> {
        let candidate = job.candidate();

        // Stage 1: duplicate check, before any side effects.
        if self
            .catalog
            .find_by_title_author(&candidate.title, &candidate.author)
            .await?
            .is_some()
        {
            info!("record already cataloged, skipping");
            return Ok(JobOutcome::SkippedDuplicate);
        }
        self.checkpoint(job.id, progress::DUPLICATE_CHECKED).await;

        // Stage 2: barcode allocation.
        let barcode = self
            .allocator
            .allocate_unique(self.settings.barcode_max_attempts)
            .await?;
        self.checkpoint(job.id, progress::BARCODE_ALLOCATED).await;

        // Stage 3: optional size probe, then the fetch itself.
        let max_bytes = self.settings.max_size_bytes;
        match self.fetcher.probe_size(&candidate.download_url).await {
            Ok(Some(size)) if size > max_bytes => {
                return Err(StageError::Oversize {
                    size,
                    limit: max_bytes,
                });
            }
            Ok(_) => {}
            // Probe failure is tolerated; the capped fetch still protects us.
            Err(error) => debug!(error = %error, "size probe failed, fetching anyway"),
        }

        let bytes = self
            .retry
            .execute_classified("fetch binary", FetchError::is_retryable, || {
                self.fetcher.fetch(&candidate.download_url, max_bytes)
            })
            .await?;
        self.checkpoint(job.id, progress::FETCHED).await;

        // Stage 3b: validation. Deterministic, so never wrapped in retry.
        let validation = validate(&bytes, max_bytes);
        if !validation.is_valid() {
            return Err(StageError::Validation(validation.errors));
        }
        let digest = validation.digest.unwrap_or_default();
        self.checkpoint(job.id, progress::VALIDATED).await;

        // Stage 4: artifact upload.
        let pdf_path = artifact_path(&job.category, &barcode, &candidate.title);
        self.retry
            .execute("store artifact", || {
                self.store.put(&pdf_path, &bytes, "application/pdf")
            })
            .await?;
        self.checkpoint(job.id, progress::STORED).await;

        // Stage 5: signed access URL.
        let access_url = self
            .store
            .signed_url(&pdf_path, self.settings.signed_url_ttl)
            .await?;
        self.checkpoint(job.id, progress::SIGNED).await;

        // Stage 6: QR artifact. Failure downgrades the record, never the job.
        let qr_url = self.qr_artifact(&barcode).await;
        self.checkpoint(job.id, progress::QR_DONE).await;

        // Stage 7: catalog insert; a late-arriving duplicate maps to skip.
        let record = NewRecord {
            barcode: barcode.clone(),
            title: candidate.title,
            author: candidate.author,
            material_type: job.category.clone(),
            source: job.cand_source.clone(),
            source_id: candidate.source_id,
            source_url: candidate.source_url,
            publication_year: candidate.year,
            abstract_text: candidate.abstract_text,
            file_digest: digest,
            storage_path: pdf_path,
            access_url: Some(access_url),
            qr_url,
        };

        match self.catalog.insert(&record).await? {
            WriteOutcome::Created => {
                info!(barcode = %barcode, "cataloged new record");
                Ok(JobOutcome::Acquired { barcode })
            }
            WriteOutcome::DuplicateSkipped => {
                info!("concurrent duplicate detected at insert, skipping");
                Ok(JobOutcome::SkippedDuplicate)
            }
        }
    }

    /// Renders, stores and signs the QR image, returning `None` on any
    /// failure.
    async fn qr_artifact(&self, barcode: &str) -> Option<String> {
        let svg = match qr::render_svg(barcode) {
            Ok(svg) => svg,
            Err(error) => {
                warn!(barcode, error = %error, "QR render failed, record will have no QR URL");
                return None;
            }
        };

        let path = qr_path(barcode);
        let stored = self
            .retry
            .execute("store QR image", || {
                self.store.put(&path, &svg, "image/svg+xml")
            })
            .await;
        if let Err(error) = stored {
            warn!(barcode, error = %error, "QR upload failed, record will have no QR URL");
            return None;
        }

        match self.store.signed_url(&path, self.settings.signed_url_ttl).await {
            Ok(url) => Some(url),
            Err(error) => {
                warn!(barcode, error = %error, "QR signing failed, record will have no QR URL");
                None
            }
        }
    }
}

impl std::fmt::Debug for AcquisitionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionPipeline")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
