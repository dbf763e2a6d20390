//! Open Library search provider.
//!
//! Queries Open Library's `search.json` and keeps only documents backed by
//! an Internet Archive scan, since those are the only ones with a binary to
//! download. The download URL points at the Archive's derived PDF for the
//! scan identifier.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{
    CallPacer, CandidateBook, ProviderError, SearchProvider, build_provider_client,
};

/// Default Open Library base URL.
const DEFAULT_BASE_URL: &str = "https://openlibrary.org";

/// Base URL for Internet Archive scan downloads.
const ARCHIVE_DOWNLOAD_BASE: &str = "https://archive.org/download";

/// Provider name used in logs and candidate records.
const PROVIDER_NAME: &str = "openlibrary";

// ==================== Open Library Response Types ====================

/// Top-level search response.
#[derive(Debug, Deserialize)]
struct OpenLibraryResponse {
    #[serde(default)]
    docs: Vec<OpenLibraryDoc>,
}

/// One document from the search response.
#[derive(Debug, Deserialize)]
struct OpenLibraryDoc {
    key: Option<String>,
    title: Option<String>,
    #[serde(default)]
    author_name: Vec<String>,
    first_publish_year: Option<i64>,
    /// Internet Archive scan identifiers, when the book has been scanned.
    #[serde(default)]
    ia: Vec<String>,
}

// ==================== OpenLibraryProvider ====================

/// Searches Open Library for scanned books.
pub struct OpenLibraryProvider {
    client: Client,
    base_url: String,
    pacer: CallPacer,
}

impl OpenLibraryProvider {
    /// Creates a provider against the production Open Library.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::ClientBuild`] if HTTP client construction
    /// fails.
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Creates a provider with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::ClientBuild`] if HTTP client construction
    /// fails.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_provider_client()?,
            base_url: base_url.into(),
            pacer: CallPacer::new(),
        })
    }

    async fn search_keyword(
        &self,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<CandidateBook>, ProviderError> {
        let url = format!(
            "{}/search.json?q={}&limit={limit}",
            self.base_url,
            urlencoding::encode(keyword)
        );

        debug!(keyword, "calling Open Library search");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::network(PROVIDER_NAME, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::http_status(PROVIDER_NAME, status.as_u16()));
        }

        let body = response
            .json::<OpenLibraryResponse>()
            .await
            .map_err(|e| ProviderError::parse(PROVIDER_NAME, e.to_string()))?;

        let base = &self.base_url;
        Ok(body
            .docs
            .into_iter()
            .filter_map(|doc| {
                let title = doc.title.filter(|t| !t.trim().is_empty())?;
                // Only scanned books have a binary to fetch.
                let scan_id = doc.ia.into_iter().next()?;
                let author = doc
                    .author_name
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| "Unknown".to_string());

                Some(CandidateBook {
                    title,
                    author,
                    download_url: format!("{ARCHIVE_DOWNLOAD_BASE}/{scan_id}/{scan_id}.pdf"),
                    source_url: doc.key.map(|key| format!("{base}{key}")),
                    abstract_text: None,
                    year: doc.first_publish_year,
                    source: PROVIDER_NAME,
                    source_id: Some(scan_id),
                })
            })
            .collect())
    }
}

impl std::fmt::Debug for OpenLibraryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenLibraryProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SearchProvider for OpenLibraryProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    #[tracing::instrument(skip(self, keywords), fields(provider = PROVIDER_NAME))]
    async fn search(
        &self,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<CandidateBook>, ProviderError> {
        let mut candidates = Vec::new();

        for keyword in keywords {
            if candidates.len() >= limit {
                break;
            }
            self.pacer.pace().await;
            candidates.extend(self.search_keyword(keyword, limit).await?);
        }

        candidates.truncate(limit);
        Ok(candidates)
    }
}
