//! CLI entry point for the acquisition pipeline.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use libharvest::catalog::{Catalog, RecordStatus, SqliteCatalog};
use libharvest::config::Config;
use libharvest::metrics::AtomicMetrics;
use libharvest::pipeline::{AcquisitionPipeline, PipelineSettings, WorkerPool};
use libharvest::queue::{DEFAULT_COMPLETED_TTL, DEFAULT_FAILED_TTL, JobQueue};
use libharvest::rate_limit::JobRateLimiter;
use libharvest::retry::RetryExecutor;
use libharvest::search::{
    ArchiveProvider, CoreProvider, OpenLibraryProvider, SearchAggregator, SearchProvider,
};
use libharvest::storage::LocalObjectStore;
use libharvest::{Database, HttpFetcher};
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    debug!(?config, "configuration loaded");

    let db = Database::new(&config.database_path()).await?;

    match args.command {
        Command::Populate { categories, limit } => {
            populate(&config, db, categories, limit).await?;
        }
        Command::Worker {
            concurrency,
            rate_limit,
        } => {
            run_worker(&config, db, concurrency.map(usize::from), rate_limit).await?;
        }
        Command::Status => {
            status(&config, db).await?;
        }
    }

    Ok(())
}

/// Builds the provider set from configuration.
fn build_providers(config: &Config) -> Result<Vec<Box<dyn SearchProvider>>> {
    let mut providers: Vec<Box<dyn SearchProvider>> = Vec::new();

    match &config.search.core_api_key {
        Some(key) => providers.push(Box::new(CoreProvider::new(key.clone())?)),
        None => info!("no CORE API key configured, skipping CORE provider"),
    }
    providers.push(Box::new(ArchiveProvider::new()?));
    providers.push(Box::new(OpenLibraryProvider::new()?));

    Ok(providers)
}

/// `populate`: search every requested category and enqueue the candidates.
async fn populate(
    config: &Config,
    db: Database,
    categories: Vec<String>,
    limit: Option<usize>,
) -> Result<()> {
    let aggregator = SearchAggregator::new(build_providers(config)?);
    let queue = JobQueue::new(db);

    let categories = if categories.is_empty() {
        config.search.categories.clone()
    } else {
        categories
    };
    let limit = limit.unwrap_or(config.search.batch_limit);

    let mut total = 0usize;
    for (index, category) in categories.iter().enumerate() {
        if index > 0 {
            // Pause between category batches so provider calls stay spread out.
            tokio::time::sleep(config.search.inter_batch_pause()).await;
        }

        let candidates = aggregator.search(category, limit).await;
        let enqueued = queue.enqueue_bulk(category, &candidates).await?;
        total += enqueued;
        info!(
            category,
            found = candidates.len(),
            enqueued,
            "category populated"
        );
    }

    info!(total, "populate complete");
    Ok(())
}

/// `worker`: process the queue until no claimable work remains.
async fn run_worker(
    config: &Config,
    db: Database,
    concurrency: Option<usize>,
    rate_limit: Option<usize>,
) -> Result<()> {
    let queue = JobQueue::new(db.clone()).with_max_attempts(config.worker.max_job_attempts);

    // Crash recovery: reclaim jobs a previous process left active.
    let reset = queue.reset_active().await?;
    if reset > 0 {
        warn!(reset, "recovered orphaned jobs from a previous run");
    }

    let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::new(db.clone()));
    let store = Arc::new(LocalObjectStore::new(
        config.storage.root.clone(),
        config.storage.url_secret.clone(),
    ));

    let pipeline = Arc::new(AcquisitionPipeline::new(
        Arc::clone(&catalog),
        store,
        HttpFetcher::new(),
        RetryExecutor::default(),
        queue.clone(),
        PipelineSettings {
            max_size_bytes: config.worker.max_size_bytes,
            signed_url_ttl: config.storage.signed_url_ttl(),
            ..PipelineSettings::default()
        },
    ));

    let rate_max_starts = rate_limit.unwrap_or(config.worker.rate_max_starts);
    let rate_limiter = Arc::new(JobRateLimiter::new(
        rate_max_starts,
        config.worker.rate_window(),
    ));

    let metrics = Arc::new(AtomicMetrics::new());
    let pool = WorkerPool::new(
        queue.clone(),
        pipeline,
        rate_limiter,
        Arc::clone(&metrics) as Arc<dyn libharvest::metrics::MetricsCollector>,
        concurrency.unwrap_or(config.worker.concurrency),
    );

    pool.run_until_drained().await?;

    let swept = queue
        .sweep_expired(DEFAULT_COMPLETED_TTL, DEFAULT_FAILED_TTL)
        .await?;

    let snapshot = metrics.snapshot();
    let queue_metrics = queue.metrics().await?;
    info!(
        completed = snapshot.completed,
        skipped = snapshot.skipped,
        retried = snapshot.retried,
        failed = snapshot.failed,
        swept,
        waiting = queue_metrics.waiting,
        "worker run complete"
    );

    db.close().await;
    Ok(())
}

/// `status`: report queue and catalog counts.
async fn status(config: &Config, db: Database) -> Result<()> {
    let queue = JobQueue::new(db.clone());
    let catalog = SqliteCatalog::new(db);

    let metrics = queue.metrics().await?;
    info!(
        waiting = metrics.waiting,
        active = metrics.active,
        completed = metrics.completed,
        failed = metrics.failed,
        "queue status"
    );

    let available = catalog.count_by_status(RecordStatus::Available).await?;
    let withdrawn = catalog.count_by_status(RecordStatus::Withdrawn).await?;
    info!(available, withdrawn, "catalog status");

    for category in &config.search.categories {
        let count = catalog.count_by_material_type(category).await?;
        info!(category, count, "catalog records by material type");
    }

    Ok(())
}
