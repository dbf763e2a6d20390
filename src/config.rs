//! Runtime configuration.
//!
//! Every setting has a sensible default so the binary runs with no config
//! file at all; an optional JSON file overrides the defaults field by
//! field. Values are grouped by the subsystem they feed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the config file failed.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The config file was not valid JSON for this schema.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path of the SQLite database file.
    pub database_path: Option<PathBuf>,
    /// Object store settings.
    pub storage: StorageConfig,
    /// Candidate discovery settings.
    pub search: SearchConfig,
    /// Worker pool and pipeline settings.
    pub worker: WorkerConfig,
}

impl Config {
    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Database path, defaulted.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("harvest.db"))
    }
}

/// Object store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Root directory for stored artifacts.
    pub root: PathBuf,
    /// Secret used to sign access URLs.
    pub url_secret: String,
    /// TTL of issued signed URLs, in seconds.
    pub signed_url_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("storage"),
            url_secret: "insecure-dev-secret".to_string(),
            signed_url_ttl_secs: 7 * 24 * 3600,
        }
    }
}

impl StorageConfig {
    /// Signed URL TTL as a [`Duration`].
    #[must_use]
    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }
}

/// Candidate discovery settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    /// CORE API key; the CORE provider is skipped when absent.
    pub core_api_key: Option<String>,
    /// Categories populated when none are given on the command line.
    pub categories: Vec<String>,
    /// Maximum candidates accepted per category per run.
    pub batch_limit: usize,
    /// Pause between category batches, in seconds.
    pub inter_batch_pause_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            core_api_key: None,
            categories: ["RBOOK", "JR", "THESIS", "RPAPER", "BOBP", "MAP"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            batch_limit: 20,
            inter_batch_pause_secs: 5,
        }
    }
}

impl SearchConfig {
    /// Inter-batch pause as a [`Duration`].
    #[must_use]
    pub fn inter_batch_pause(&self) -> Duration {
        Duration::from_secs(self.inter_batch_pause_secs)
    }
}

/// Worker pool and pipeline settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Maximum jobs processed concurrently.
    pub concurrency: usize,
    /// Maximum job starts per rate window (0 disables the limiter).
    pub rate_max_starts: usize,
    /// Length of the rate window, in seconds.
    pub rate_window_secs: u64,
    /// Queue-level attempt ceiling per job.
    pub max_job_attempts: i64,
    /// Size ceiling for fetched binaries, in bytes.
    pub max_size_bytes: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            rate_max_starts: 10,
            rate_window_secs: 60,
            max_job_attempts: 4,
            max_size_bytes: 50 * 1024 * 1024,
        }
    }
}

impl WorkerConfig {
    /// Rate window as a [`Duration`].
    #[must_use]
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_are_complete() {
        let config = Config::default();
        assert_eq!(config.database_path(), PathBuf::from("harvest.db"));
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.search.categories.len(), 6);
        assert_eq!(config.storage.signed_url_ttl(), Duration::from_secs(7 * 24 * 3600));
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"worker": {{"concurrency": 8}}, "search": {{"batch_limit": 5}}}}"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.worker.concurrency, 8);
        assert_eq!(config.search.batch_limit, 5);
        // Untouched fields keep their defaults.
        assert_eq!(config.worker.max_job_attempts, 4);
        assert_eq!(config.search.inter_batch_pause(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_unknown_field_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"no_such_field": true}}"#).unwrap();

        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let result = Config::load(Path::new("/nonexistent/harvest.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
