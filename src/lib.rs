//! Library Harvest Core Library
//!
//! This library powers an automated acquisition pipeline for a research
//! library: it discovers open-access publications across archive APIs,
//! fetches and validates the binaries, and writes barcoded catalog records
//! with signed access URLs and QR artifacts.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`search`] - candidate discovery across provider APIs
//! - [`queue`] - durable acquisition job queue
//! - [`pipeline`] - per-job stage sequence and the worker pool
//! - [`catalog`] - bibliographic record persistence
//! - [`storage`] - artifact store with signed URLs
//! - [`fetch`] - streaming binary downloads
//! - [`validate`] - PDF validation
//! - [`barcode`] - unique barcode allocation
//! - [`retry`] - jittered exponential backoff executor
//! - [`rate_limit`] - rolling-window limit on job starts
//! - [`metrics`] - run counters
//! - [`db`] - database connection and schema management
//! - [`config`] - runtime configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod barcode;
pub mod catalog;
pub mod config;
pub mod db;
pub mod fetch;
pub mod metrics;
pub mod pipeline;
pub mod qr;
pub mod queue;
pub mod rate_limit;
pub mod retry;
pub mod search;
pub mod storage;
pub mod validate;

// Re-export commonly used types
pub use barcode::{BarcodeAllocator, BarcodeError};
pub use catalog::{Catalog, CatalogError, CatalogRecord, SqliteCatalog, WriteOutcome};
pub use config::Config;
pub use db::Database;
pub use fetch::{FetchError, HttpFetcher};
pub use metrics::{AtomicMetrics, MetricsCollector, MetricsSnapshot};
pub use pipeline::{AcquisitionPipeline, JobOutcome, PipelineSettings, StageError, WorkerPool};
pub use queue::{Job, JobQueue, JobState, QueueError, QueueMetrics, RetryDisposition};
pub use rate_limit::JobRateLimiter;
pub use retry::{RetryError, RetryExecutor};
pub use search::{CandidateBook, SearchAggregator, SearchProvider};
pub use storage::{LocalObjectStore, ObjectStore, StorageError};
pub use validate::{ValidationError, ValidationResult, validate};
