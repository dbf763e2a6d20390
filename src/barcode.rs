//! Unique barcode allocation for catalog records.
//!
//! A barcode is `BK` followed by the allocation instant in unix milliseconds
//! and four random uppercase alphanumerics, e.g. `BK1756300000000X7Q2`. The
//! millisecond prefix makes collisions rare; the random suffix covers
//! same-millisecond allocations. Every candidate is still existence-checked
//! against the catalog before use, and the catalog's UNIQUE constraint
//! remains the last line of defense against races between processes.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::catalog::{Catalog, CatalogError};

/// Barcode prefix for all allocated identifiers.
const BARCODE_PREFIX: &str = "BK";

/// Length of the random suffix.
const SUFFIX_LEN: usize = 4;

/// Alphabet for the random suffix.
const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Default number of candidates tried before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Barcode allocation errors.
#[derive(Debug, Error)]
pub enum BarcodeError {
    /// Every generated candidate collided with an existing record.
    #[error("barcode allocation exhausted after {attempts} attempts")]
    Exhausted {
        /// Number of candidates tried.
        attempts: u32,
    },

    /// The existence check against the catalog failed.
    #[error("barcode existence check failed: {0}")]
    Catalog(#[from] CatalogError),
}

/// Allocates catalog barcodes guaranteed unused at allocation time.
#[derive(Clone)]
pub struct BarcodeAllocator {
    catalog: Arc<dyn Catalog>,
}

impl BarcodeAllocator {
    /// Creates an allocator that checks candidates against `catalog`.
    #[must_use]
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// Generates a barcode not present in the catalog.
    ///
    /// Tries up to `max_attempts` candidates, existence-checking each.
    ///
    /// # Errors
    ///
    /// Returns [`BarcodeError::Exhausted`] when every candidate collided,
    /// or [`BarcodeError::Catalog`] if an existence check itself fails.
    #[instrument(skip(self))]
    pub async fn allocate_unique(&self, max_attempts: u32) -> Result<String, BarcodeError> {
        for attempt in 1..=max_attempts {
            let candidate = generate_candidate();

            if self.catalog.barcode_exists(&candidate).await? {
                warn!(candidate, attempt, "barcode collision, regenerating");
                continue;
            }

            debug!(barcode = %candidate, attempt, "allocated barcode");
            return Ok(candidate);
        }

        Err(BarcodeError::Exhausted {
            attempts: max_attempts,
        })
    }
}

impl std::fmt::Debug for BarcodeAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarcodeAllocator").finish_non_exhaustive()
    }
}

/// Builds one barcode candidate: `BK{unix_millis}{4 random alphanumerics}`.
fn generate_candidate() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);

    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..SUFFIX_ALPHABET.len());
            SUFFIX_ALPHABET[idx] as char
        })
        .collect();

    format!("{BARCODE_PREFIX}{millis}{suffix}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::catalog::{CatalogRecord, NewRecord, RecordPatch, RecordStatus, WriteOutcome};

    /// Catalog double that reports the first `collisions` candidates taken.
    struct CollidingCatalog {
        remaining_collisions: Mutex<u32>,
        checks: Mutex<u32>,
    }

    impl CollidingCatalog {
        fn new(collisions: u32) -> Self {
            Self {
                remaining_collisions: Mutex::new(collisions),
                checks: Mutex::new(0),
            }
        }

        fn checks(&self) -> u32 {
            *self.checks.lock().unwrap()
        }
    }

    #[async_trait]
    impl Catalog for CollidingCatalog {
        async fn barcode_exists(&self, _barcode: &str) -> Result<bool, CatalogError> {
            *self.checks.lock().unwrap() += 1;
            let mut remaining = self.remaining_collisions.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                Ok(true)
            } else {
                Ok(false)
            }
        }

        async fn find_by_title_author(
            &self,
            _title: &str,
            _author: &str,
        ) -> Result<Option<CatalogRecord>, CatalogError> {
            Ok(None)
        }

        async fn insert(&self, _record: &NewRecord) -> Result<WriteOutcome, CatalogError> {
            Ok(WriteOutcome::Created)
        }

        async fn patch(&self, _barcode: &str, _patch: &RecordPatch) -> Result<(), CatalogError> {
            Ok(())
        }

        async fn count_by_status(&self, _status: RecordStatus) -> Result<i64, CatalogError> {
            Ok(0)
        }

        async fn count_by_material_type(&self, _material_type: &str) -> Result<i64, CatalogError> {
            Ok(0)
        }
    }

    // ==================== Format Tests ====================

    #[test]
    fn test_candidate_format() {
        let candidate = generate_candidate();
        assert!(candidate.starts_with("BK"));

        let body = &candidate[2..];
        let (millis, suffix) = body.split_at(body.len() - SUFFIX_LEN);
        assert!(!millis.is_empty());
        assert!(millis.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(
            suffix
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        );
    }

    #[test]
    fn test_candidates_differ_across_calls() {
        // Same millisecond is likely here; the random suffix must still
        // separate them essentially always.
        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            seen.insert(generate_candidate());
        }
        assert!(seen.len() > 45, "too many suffix collisions: {}", seen.len());
    }

    // ==================== Allocation Tests ====================

    #[tokio::test]
    async fn test_allocate_unique_first_candidate_free() {
        let catalog = Arc::new(CollidingCatalog::new(0));
        let allocator = BarcodeAllocator::new(Arc::clone(&catalog) as Arc<dyn Catalog>);

        let barcode = allocator.allocate_unique(DEFAULT_MAX_ATTEMPTS).await.unwrap();
        assert!(barcode.starts_with("BK"));
        assert_eq!(catalog.checks(), 1);
    }

    #[tokio::test]
    async fn test_allocate_unique_retries_past_collisions() {
        let catalog = Arc::new(CollidingCatalog::new(2));
        let allocator = BarcodeAllocator::new(Arc::clone(&catalog) as Arc<dyn Catalog>);

        let barcode = allocator.allocate_unique(DEFAULT_MAX_ATTEMPTS).await.unwrap();
        assert!(barcode.starts_with("BK"));
        assert_eq!(catalog.checks(), 3, "two collisions then success");
    }

    #[tokio::test]
    async fn test_allocate_unique_exhaustion() {
        let catalog = Arc::new(CollidingCatalog::new(u32::MAX));
        let allocator = BarcodeAllocator::new(catalog as Arc<dyn Catalog>);

        let result = allocator.allocate_unique(3).await;
        assert!(matches!(
            result,
            Err(BarcodeError::Exhausted { attempts: 3 })
        ));
    }
}
