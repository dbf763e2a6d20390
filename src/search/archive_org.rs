//! Internet Archive search provider.
//!
//! Queries the Archive's advanced search for text items and derives the
//! direct binary URL from the item identifier
//! (`{base}/download/{id}/{id}.pdf`). The Archive returns several fields as
//! either a scalar or a list depending on the item, so deserialization
//! accepts both.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{
    CallPacer, CandidateBook, ProviderError, SearchProvider, build_provider_client,
};

/// Default Internet Archive base URL.
const DEFAULT_BASE_URL: &str = "https://archive.org";

/// Provider name used in logs and candidate records.
const PROVIDER_NAME: &str = "archive";

// ==================== Archive API Response Types ====================

/// Top-level advanced search response.
#[derive(Debug, Deserialize)]
struct ArchiveResponse {
    response: ArchiveDocs,
}

#[derive(Debug, Deserialize)]
struct ArchiveDocs {
    #[serde(default)]
    docs: Vec<ArchiveDoc>,
}

/// One item from the docs array.
#[derive(Debug, Deserialize)]
struct ArchiveDoc {
    identifier: Option<String>,
    title: Option<OneOrMany>,
    creator: Option<OneOrMany>,
    description: Option<OneOrMany>,
    year: Option<serde_json::Value>,
}

/// Archive fields that appear as a scalar or a list depending on the item.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_first(self) -> Option<String> {
        match self {
            Self::One(s) => Some(s),
            Self::Many(items) => items.into_iter().next(),
        }
    }
}

fn parse_year(value: Option<serde_json::Value>) -> Option<i64> {
    match value? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ==================== ArchiveProvider ====================

/// Searches the Internet Archive's text collection.
pub struct ArchiveProvider {
    client: Client,
    base_url: String,
    pacer: CallPacer,
}

impl ArchiveProvider {
    /// Creates a provider against the production Internet Archive.
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
        let query = urlencoding::encode(keyword);
        let url = format!(
            "{}/advancedsearch.php?q={query}+AND+mediatype%3Atexts\
             &fl%5B%5D=identifier&fl%5B%5D=title&fl%5B%5D=creator\
             &fl%5B%5D=year&fl%5B%5D=description&rows={limit}&output=json",
            self.base_url
        );

        debug!(keyword, "calling Archive advanced search");

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
            .json::<ArchiveResponse>()
            .await
            .map_err(|e| ProviderError::parse(PROVIDER_NAME, e.to_string()))?;

        let base = &self.base_url;
        Ok(body
            .response
            .docs
            .into_iter()
            .filter_map(|doc| {
                let id = doc.identifier.filter(|i| !i.trim().is_empty())?;
                let title = doc
                    .title
                    .and_then(OneOrMany::into_first)
                    .filter(|t| !t.trim().is_empty())?;
                let author = doc
                    .creator
                    .and_then(OneOrMany::into_first)
                    .unwrap_or_else(|| "Unknown".to_string());

                Some(CandidateBook {
                    title,
                    author,
                    download_url: format!("{base}/download/{id}/{id}.pdf"),
                    source_url: Some(format!("{base}/details/{id}")),
                    abstract_text: doc.description.and_then(OneOrMany::into_first),
                    year: parse_year(doc.year),
                    source: PROVIDER_NAME,
                    source_id: Some(id),
                })
            })
            .collect())
    }
}

impl std::fmt::Debug for ArchiveProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SearchProvider for ArchiveProvider {
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
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn archive_body() -> serde_json::Value {
        json!({
            "response": {
                "docs": [
                    {
                        "identifier": "reefsurvey2024",
                        "title": "Reef Survey",
                        "creator": ["A. Perera", "B. Silva"],
                        "description": "Coral cover trends.",
                        "year": "2024"
                    },
                    {
                        "identifier": "tideatlas",
                        "title": ["Tide Atlas"],
                        "creator": "C. Fernando",
                        "year": 2019
                    },
                    {
                        // Missing identifier, must be dropped.
                        "title": "Orphan Item"
                    }
                ]
            }
        })
    }

    #[tokio::test]
    async fn test_archive_search_normalizes_docs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/advancedsearch.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(archive_body()))
            .mount(&server)
            .await;

        let provider = ArchiveProvider::with_base_url(server.uri()).unwrap();
        let results = provider.search(&["reef".to_string()], 10).await.unwrap();

        assert_eq!(results.len(), 2);

        let first = &results[0];
        assert_eq!(first.title, "Reef Survey");
        assert_eq!(first.author, "A. Perera");
        assert_eq!(
            first.download_url,
            format!("{}/download/reefsurvey2024/reefsurvey2024.pdf", server.uri())
        );
        assert_eq!(
            first.source_url.as_deref(),
            Some(format!("{}/details/reefsurvey2024", server.uri()).as_str())
        );
        assert_eq!(first.year, Some(2024));
        assert_eq!(first.source, "archive");

        let second = &results[1];
        assert_eq!(second.title, "Tide Atlas");
        assert_eq!(second.author, "C. Fernando");
        assert_eq!(second.year, Some(2019));
    }

    #[tokio::test]
    async fn test_archive_search_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/advancedsearch.php"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let provider = ArchiveProvider::with_base_url(server.uri()).unwrap();
        let result = provider.search(&["reef".to_string()], 10).await;
        assert!(matches!(
            result,
            Err(ProviderError::HttpStatus { status: 503, .. })
        ));
    }

    #[test]
    fn test_parse_year_variants() {
        assert_eq!(parse_year(Some(json!(2024))), Some(2024));
        assert_eq!(parse_year(Some(json!("2024"))), Some(2024));
        assert_eq!(parse_year(Some(json!(" 2024 "))), Some(2024));
        assert_eq!(parse_year(Some(json!("circa 1990"))), None);
        assert_eq!(parse_year(Some(json!(null))), None);
        assert_eq!(parse_year(None), None);
    }
}
