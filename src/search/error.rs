//! Error types for search providers.

use thiserror::Error;

/// Errors a search provider can report.
///
/// The aggregator converts any of these into an empty result slice for the
/// failing provider; they never propagate past the search layer.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network-level failure reaching the provider API.
    #[error("{provider}: network error: {source}")]
    Network {
        /// Provider name.
        provider: &'static str,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The provider returned an error status.
    #[error("{provider}: HTTP {status}")]
    HttpStatus {
        /// Provider name.
        provider: &'static str,
        /// The HTTP status code.
        status: u16,
    },

    /// The response body did not match the expected shape.
    #[error("{provider}: unexpected response format: {reason}")]
    Parse {
        /// Provider name.
        provider: &'static str,
        /// What failed to parse.
        reason: String,
    },

    /// HTTP client construction failed.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

impl ProviderError {
    /// Creates a network error.
    pub fn network(provider: &'static str, source: reqwest::Error) -> Self {
        Self::Network { provider, source }
    }

    /// Creates an HTTP status error.
    pub fn http_status(provider: &'static str, status: u16) -> Self {
        Self::HttpStatus { provider, status }
    }

    /// Creates a parse error.
    pub fn parse(provider: &'static str, reason: impl Into<String>) -> Self {
        Self::Parse {
            provider,
            reason: reason.into(),
        }
    }
}
