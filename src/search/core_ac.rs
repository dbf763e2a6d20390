//! CORE v3 works search provider.
//!
//! Queries the CORE aggregator's `search/works` endpoint with a Bearer API
//! key, newest publications first, and keeps only works that expose a
//! direct download URL.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{
    CallPacer, CandidateBook, ProviderError, SearchProvider, build_provider_client,
};

/// Default CORE API base URL.
const DEFAULT_BASE_URL: &str = "https://api.core.ac.uk/v3";

/// Provider name used in logs and candidate records.
const PROVIDER_NAME: &str = "core";

// ==================== CORE API Response Types ====================

/// Top-level CORE works search response.
#[derive(Debug, Deserialize)]
struct CoreResponse {
    #[serde(default)]
    results: Vec<CoreWork>,
}

/// One work entry from the CORE response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoreWork {
    id: Option<i64>,
    title: Option<String>,
    #[serde(default)]
    authors: Vec<CoreAuthor>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    year_published: Option<i64>,
    download_url: Option<String>,
}

/// An author entry from the CORE response.
#[derive(Debug, Deserialize)]
struct CoreAuthor {
    name: Option<String>,
}

// ==================== CoreProvider ====================

/// Searches the CORE aggregator for open-access works.
pub struct CoreProvider {
    client: Client,
    base_url: String,
    api_key: String,
    pacer: CallPacer,
}

impl CoreProvider {
    /// Creates a provider against the production CORE API.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::ClientBuild`] if HTTP client construction
    /// fails.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Creates a provider with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::ClientBuild`] if HTTP client construction
    /// fails.
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_provider_client()?,
            base_url: base_url.into(),
            api_key: api_key.into(),
            pacer: CallPacer::new(),
        })
    }

    async fn search_keyword(
        &self,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<CandidateBook>, ProviderError> {
        let url = format!(
            "{}/search/works?q={}&limit={limit}&sort=datePublished:desc",
            self.base_url,
            urlencoding::encode(keyword)
        );

        debug!(keyword, "calling CORE works search");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::network(PROVIDER_NAME, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::http_status(PROVIDER_NAME, status.as_u16()));
        }

        let body = response
            .json::<CoreResponse>()
            .await
            .map_err(|e| ProviderError::parse(PROVIDER_NAME, e.to_string()))?;

        Ok(body
            .results
            .into_iter()
            .filter_map(|work| {
                let title = work.title.filter(|t| !t.trim().is_empty())?;
                let download_url = work.download_url.filter(|u| !u.trim().is_empty())?;
                let author = work
                    .authors
                    .first()
                    .and_then(|a| a.name.clone())
                    .unwrap_or_else(|| "Unknown".to_string());

                Some(CandidateBook {
                    title,
                    author,
                    download_url,
                    source_url: work.id.map(|id| format!("https://core.ac.uk/works/{id}")),
                    abstract_text: work.abstract_text,
                    year: work.year_published,
                    source: PROVIDER_NAME,
                    source_id: work.id.map(|id| id.to_string()),
                })
            })
            .collect())
    }
}

impl std::fmt::Debug for CoreProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SearchProvider for CoreProvider {
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn core_body() -> serde_json::Value {
        json!({
            "totalHits": 2,
            "results": [
                {
                    "id": 101,
                    "title": "Reef Survey",
                    "authors": [{"name": "A. Perera"}, {"name": "B. Silva"}],
                    "abstract": "Coral cover trends.",
                    "yearPublished": 2024,
                    "downloadUrl": "https://core.ac.uk/download/101.pdf"
                },
                {
                    "id": 102,
                    "title": "No Download Here",
                    "authors": [],
                    "yearPublished": 2023,
                    "downloadUrl": null
                }
            ]
        })
    }

    #[tokio::test]
    async fn test_core_search_normalizes_works() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/works"))
            .and(header("authorization", "Bearer test-key"))
            .and(query_param("sort", "datePublished:desc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(core_body()))
            .mount(&server)
            .await;

        let provider = CoreProvider::with_base_url("test-key", server.uri()).unwrap();
        let results = provider
            .search(&["marine biodiversity Sri Lanka".to_string()], 10)
            .await
            .unwrap();

        // The work without a download URL is dropped.
        assert_eq!(results.len(), 1);
        let c = &results[0];
        assert_eq!(c.title, "Reef Survey");
        assert_eq!(c.author, "A. Perera");
        assert_eq!(c.download_url, "https://core.ac.uk/download/101.pdf");
        assert_eq!(c.source, "core");
        assert_eq!(c.source_id.as_deref(), Some("101"));
        assert_eq!(c.year, Some(2024));
        assert_eq!(c.abstract_text.as_deref(), Some("Coral cover trends."));
    }

    #[tokio::test]
    async fn test_core_search_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/works"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let provider = CoreProvider::with_base_url("test-key", server.uri()).unwrap();
        let result = provider.search(&["kw".to_string()], 10).await;
        assert!(matches!(
            result,
            Err(ProviderError::HttpStatus { status: 429, .. })
        ));
    }

    #[tokio::test]
    async fn test_core_search_malformed_body_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/works"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let provider = CoreProvider::with_base_url("test-key", server.uri()).unwrap();
        let result = provider.search(&["kw".to_string()], 10).await;
        assert!(matches!(result, Err(ProviderError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_core_search_respects_limit_across_keywords() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/works"))
            .respond_with(ResponseTemplate::new(200).set_body_json(core_body()))
            .mount(&server)
            .await;

        let provider = CoreProvider::with_base_url("test-key", server.uri()).unwrap();
        let results = provider
            .search(&["a".to_string(), "b".to_string(), "c".to_string()], 1)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }
}
