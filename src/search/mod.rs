//! Candidate discovery across external catalog APIs.
//!
//! This module turns a material-type category into a deduplicated list of
//! [`CandidateBook`]s by fanning the category's keyword set out to every
//! registered [`SearchProvider`] concurrently.
//!
//! # Architecture
//!
//! - [`SearchProvider`] - async trait each upstream API implements
//! - [`CoreProvider`] - CORE v3 works search
//! - [`ArchiveProvider`] - Internet Archive advanced search
//! - [`OpenLibraryProvider`] - Open Library search, limited to scanned items
//! - [`SearchAggregator`] - concurrent fan-out, merge, dedupe, truncate
//!
//! The aggregator never errors: a failing provider contributes an empty
//! slice and a warn log, and the remaining providers are unaffected.
//!
//! # Example
//!
//! ```no_run
//! use libharvest::search::{CoreProvider, SearchAggregator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let aggregator = SearchAggregator::new(vec![
//!     Box::new(CoreProvider::new("api-key")?),
//! ]);
//! let candidates = aggregator.search("JR", 20).await;
//! println!("found {} candidates", candidates.len());
//! # Ok(())
//! # }
//! ```

mod archive_org;
mod core_ac;
mod error;
mod open_library;

pub use archive_org::ArchiveProvider;
pub use core_ac::CoreProvider;
pub use error::ProviderError;
pub use open_library::OpenLibraryProvider;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::Client;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::catalog::normalize;

/// Connect timeout for provider API calls.
const PROVIDER_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Total timeout for provider API calls.
const PROVIDER_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimum delay between successive keyword calls to one provider.
const INTER_CALL_DELAY: Duration = Duration::from_millis(500);

/// A book candidate discovered by a provider, not yet accepted for
/// acquisition. Transient: candidates only persist once enqueued as jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateBook {
    /// Title as reported by the provider.
    pub title: String,
    /// Primary author, or "Unknown" when the provider omits it.
    pub author: String,
    /// Direct URL of the downloadable binary.
    pub download_url: String,
    /// Landing page at the provider.
    pub source_url: Option<String>,
    /// Abstract text when supplied.
    pub abstract_text: Option<String>,
    /// Publication year when known.
    pub year: Option<i64>,
    /// Provider name.
    pub source: &'static str,
    /// Provider-scoped identifier.
    pub source_id: Option<String>,
}

/// One upstream catalog API.
///
/// Implementations normalize their heterogeneous response shapes into
/// [`CandidateBook`] and are responsible for pacing their own keyword
/// calls; the aggregator issues one `search` call per provider per run.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Short provider name used in logs and as `CandidateBook::source`.
    fn name(&self) -> &'static str;

    /// Searches all keywords, returning up to `limit` candidates overall.
    async fn search(
        &self,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<CandidateBook>, ProviderError>;
}

/// Resolves a material-type category to its search keyword set.
///
/// Unmapped categories fall back to the generic marine-science set rather
/// than failing.
#[must_use]
pub fn keywords_for(category: &str) -> Vec<String> {
    let keywords: &[&str] = match category {
        "RBOOK" => &[
            "marine biology reference",
            "oceanography handbook",
            "aquatic sciences textbook",
        ],
        "JR" => &[
            "marine biodiversity Sri Lanka",
            "fisheries management Bay of Bengal",
            "aquatic research journal",
        ],
        "THESIS" => &[
            "marine science thesis",
            "fisheries dissertation Sri Lanka",
        ],
        "RPAPER" => &[
            "coral reef ecology research",
            "fish stock assessment Indian Ocean",
        ],
        "BOBP" => &[
            "Bay of Bengal Programme fisheries",
            "small-scale fisheries Bay of Bengal",
        ],
        "MAP" => &[
            "nautical chart Indian Ocean",
            "bathymetric survey Sri Lanka",
        ],
        other => {
            debug!(category = other, "unmapped category, using generic keywords");
            &[
                "marine biodiversity Sri Lanka",
                "fisheries management Bay of Bengal",
            ]
        }
    };
    keywords.iter().map(|s| (*s).to_string()).collect()
}

/// Builds the HTTP client shared by one provider's keyword calls.
pub(crate) fn build_provider_client() -> Result<Client, ProviderError> {
    Client::builder()
        .connect_timeout(PROVIDER_CONNECT_TIMEOUT)
        .timeout(PROVIDER_REQUEST_TIMEOUT)
        .gzip(true)
        .build()
        .map_err(ProviderError::ClientBuild)
}

/// Paces successive API calls from one provider.
///
/// First call proceeds immediately; each subsequent call waits out the
/// remainder of the inter-call delay.
#[derive(Debug)]
pub(crate) struct CallPacer {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl CallPacer {
    pub(crate) fn new() -> Self {
        Self {
            min_interval: INTER_CALL_DELAY,
            last_call: Mutex::new(None),
        }
    }

    pub(crate) async fn pace(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(last) = *last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}

/// Concurrent fan-out over all registered providers.
pub struct SearchAggregator {
    providers: Vec<Box<dyn SearchProvider>>,
}

impl SearchAggregator {
    /// Creates an aggregator over the given providers.
    ///
    /// Provider order is significant: the merge preserves it, so earlier
    /// providers win ties in deduplication.
    #[must_use]
    pub fn new(providers: Vec<Box<dyn SearchProvider>>) -> Self {
        Self { providers }
    }

    /// Searches every provider for the category's keyword set.
    ///
    /// Never errors. Providers run concurrently; a failing provider is
    /// logged at warn and contributes nothing. Results are merged in
    /// provider order, deduplicated by normalized title (first seen wins)
    /// and truncated to `limit`.
    #[instrument(skip(self))]
    pub async fn search(&self, category: &str, limit: usize) -> Vec<CandidateBook> {
        let keywords = keywords_for(category);

        let results = join_all(
            self.providers
                .iter()
                .map(|provider| provider.search(&keywords, limit)),
        )
        .await;

        let mut seen_titles = HashSet::new();
        let mut merged = Vec::new();

        for (provider, result) in self.providers.iter().zip(results) {
            match result {
                Ok(candidates) => {
                    debug!(
                        provider = provider.name(),
                        count = candidates.len(),
                        "provider returned candidates"
                    );
                    for candidate in candidates {
                        // Providers occasionally emit relative or mangled
                        // download URLs; those jobs could never fetch.
                        if Url::parse(&candidate.download_url).is_err() {
                            warn!(
                                provider = provider.name(),
                                url = %candidate.download_url,
                                "dropping candidate with unparseable download URL"
                            );
                            continue;
                        }
                        if seen_titles.insert(normalize(&candidate.title)) {
                            merged.push(candidate);
                        }
                    }
                }
                Err(error) => {
                    warn!(
                        provider = provider.name(),
                        error = %error,
                        "provider search failed, continuing with remaining providers"
                    );
                }
            }
        }

        merged.truncate(limit);
        merged
    }
}

impl std::fmt::Debug for SearchAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchAggregator")
            .field("providers", &self.providers.len())
            .finish()
    }
}
