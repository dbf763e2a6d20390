//! Object storage for acquired artifacts.
//!
//! The pipeline talks to storage through the [`ObjectStore`] trait so tests
//! can substitute doubles for upload failures. [`LocalObjectStore`] is the
//! filesystem implementation: artifacts live under a root directory and
//! reads go through signed URLs carrying an expiry and a SHA-256 signature
//! over the store secret, path, and expiry, so a URL is only valid for the
//! window it was issued for.
//!
//! Artifact paths are deterministic: the PDF for a record lands at
//! `books/{category}/{barcode}-{title-slug}.pdf` and its QR image at
//! `qr/{barcode}.svg`.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, instrument};

/// Maximum length of a title slug in an artifact filename.
const SLUG_MAX_LEN: usize = 50;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem operation failed.
    #[error("storage I/O error for {path}: {source}")]
    Io {
        /// Object path involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An object path escaped the store root or was empty.
    #[error("invalid object path: {0}")]
    InvalidPath(String),
}

/// Storage contract consumed by the pipeline.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes `bytes` at `path`, creating parent directories as needed.
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str)
    -> Result<(), StorageError>;

    /// Issues a time-bounded signed URL for `path`.
    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError>;

    /// True when an object exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;
}

/// Filesystem-backed object store with signed URLs.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    secret: String,
}

impl LocalObjectStore {
    /// Creates a store rooted at `root`, signing URLs with `secret`.
    #[must_use]
    pub fn new(root: PathBuf, secret: String) -> Self {
        Self { root, secret }
    }

    /// Resolves an object path under the root, rejecting escapes.
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        if path.is_empty() || path.starts_with('/') || path.split('/').any(|c| c == "..") {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(path))
    }

    /// Computes the hex signature binding `path` to `expires`.
    fn signature(&self, path: &str, expires: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b"\n");
        hasher.update(path.as_bytes());
        hasher.update(b"\n");
        hasher.update(expires.to_string().as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError> {
        let target = self.resolve(path)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Io {
                    path: path.to_string(),
                    source,
                })?;
        }

        tokio::fs::write(&target, bytes)
            .await
            .map_err(|source| StorageError::Io {
                path: path.to_string(),
                source,
            })?;

        debug!(path, content_type, "stored object");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError> {
        self.resolve(path)?;

        let expires = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
            .saturating_add(ttl.as_secs());
        let sig = self.signature(path, expires);

        Ok(format!(
            "file://{}/{path}?expires={expires}&sig={sig}",
            self.root.display()
        ))
    }

    #[instrument(skip(self))]
    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let target = self.resolve(path)?;
        tokio::fs::try_exists(&target)
            .await
            .map_err(|source| StorageError::Io {
                path: path.to_string(),
                source,
            })
    }
}

/// Slugs a title for use in a filename: lowercased, alphanumeric runs
/// joined by single hyphens, capped at 50 characters.
#[must_use]
pub fn slug(title: &str) -> String {
    let mut out = String::new();
    let mut pending_sep = false;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
        if out.len() >= SLUG_MAX_LEN {
            break;
        }
    }

    out.truncate(SLUG_MAX_LEN);
    if out.is_empty() {
        out.push_str("untitled");
    }
    out
}

/// Deterministic storage path for a record's PDF artifact.
#[must_use]
pub fn artifact_path(category: &str, barcode: &str, title: &str) -> String {
    format!("books/{category}/{barcode}-{}.pdf", slug(title))
}

/// Deterministic storage path for a record's QR image.
#[must_use]
pub fn qr_path(barcode: &str) -> String {
    format!("qr/{barcode}.svg")
}
