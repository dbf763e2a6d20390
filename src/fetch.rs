//! HTTP fetching of candidate binaries.
//!
//! [`HttpFetcher`] wraps a pooled `reqwest::Client` and is created once per
//! worker process. Downloads are streamed chunk by chunk with a hard size
//! ceiling enforced mid-transfer, so an oversized or lying server never
//! costs more than one chunk past the limit.
//!
//! [`FetchError::is_retryable`] is the single source of truth for which
//! fetch failures are worth another attempt: timeouts, network errors, 408,
//! 429 and 5xx are transient; other client errors and an exceeded size
//! ceiling are permanent.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::CONTENT_LENGTH;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Connection timeout for fetch requests (30 seconds).
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Total request timeout (5 minutes, large scanned PDFs are slow).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors that can occur while fetching a binary.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection refused, TLS).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The transfer exceeded the configured size ceiling.
    #[error("fetch of {url} exceeded size limit of {limit} bytes")]
    SizeExceeded {
        /// The URL being fetched.
        url: String,
        /// Configured ceiling in bytes.
        limit: u64,
    },
}

impl FetchError {
    fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Network {
                url: url.to_string(),
                source,
            }
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Timeouts, network errors, 408, 429 and 5xx are transient. Other
    /// client errors and the size ceiling are permanent: the server has
    /// answered definitively.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::HttpStatus { status, .. } => {
                matches!(status, 408 | 429) || (500..600).contains(status)
            }
            Self::SizeExceeded { .. } => false,
        }
    }
}

/// Streaming binary fetcher over a shared connection pool.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    /// Creates a fetcher with default timeouts and gzip decompression.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .gzip(true)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Probes the size of a binary via HEAD, without downloading it.
    ///
    /// Returns `None` when the server does not advertise a Content-Length.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on network failure or an error status. Callers
    /// treat probe failure as "size unknown" rather than fatal.
    #[instrument(skip(self))]
    pub async fn probe_size(&self, url: &str) -> Result<Option<u64>, FetchError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        debug!(url, ?size, "probed binary size");
        Ok(size)
    }

    /// Streams a binary into memory, enforcing `max_bytes` mid-transfer.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::SizeExceeded`] the moment the running total
    /// passes `max_bytes`; the connection is dropped, not drained. Other
    /// variants cover network, timeout and status failures.
    #[instrument(skip(self), fields(max_bytes))]
    pub async fn fetch(&self, url: &str, max_bytes: u64) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // Reject early when the server honestly declares an oversized body.
        if let Some(declared) = response.content_length() {
            if declared > max_bytes {
                warn!(url, declared, max_bytes, "declared size over limit");
                return Err(FetchError::SizeExceeded {
                    url: url.to_string(),
                    limit: max_bytes,
                });
            }
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::from_reqwest(url, e))?;

            if body.len() as u64 + chunk.len() as u64 > max_bytes {
                warn!(url, max_bytes, "size limit exceeded mid-transfer");
                return Err(FetchError::SizeExceeded {
                    url: url.to_string(),
                    limit: max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url, bytes = body.len(), "fetched binary");
        Ok(body)
    }
}
