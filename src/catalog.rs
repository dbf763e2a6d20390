//! Bibliographic catalog persistence.
//!
//! The catalog owns the durable record of every acquired publication. Two
//! uniqueness rules are enforced at the store level and surfaced as typed
//! outcomes rather than exceptions:
//!
//! - `barcode` is globally unique;
//! - the normalized (title, author) pair is unique, where normalization is
//!   case-insensitive and whitespace-collapsed.
//!
//! Inserts that collide on either constraint return
//! [`WriteOutcome::DuplicateSkipped`] so the pipeline can branch on a value
//! instead of catching errors. Updates go through an enumerated
//! [`RecordPatch`] validated before it touches the database.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::FromRow;
use sqlx::Row;
use thiserror::Error;
use tracing::instrument;

use crate::db::Database;

/// Catalog operation errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Underlying database failure.
    #[error("catalog database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A patch with no fields set was rejected before execution.
    #[error("empty patch: at least one field must be set")]
    EmptyPatch,

    /// No record exists for the given barcode.
    #[error("no catalog record with barcode {0}")]
    RecordNotFound(String),
}

/// Result of attempting a catalog insert.
///
/// Duplicate detection is part of the contract, so "already there" is a
/// first-class outcome rather than an error to catch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new record was inserted.
    Created,
    /// A record with the same barcode or normalized (title, author)
    /// already existed; nothing was written.
    DuplicateSkipped,
}

/// Lifecycle status of a catalog record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Available through the library surface.
    Available,
    /// Withdrawn from circulation.
    Withdrawn,
}

impl RecordStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Withdrawn => "withdrawn",
        }
    }
}

/// A persisted bibliographic record.
#[derive(Debug, Clone, FromRow)]
pub struct CatalogRecord {
    /// Row id.
    pub id: i64,
    /// Unique catalog identifier.
    pub barcode: String,
    /// Title as published.
    pub title: String,
    /// Primary author.
    pub author: String,
    /// Material type code (RBOOK, JR, THESIS, RPAPER, BOBP, MAP).
    pub material_type: String,
    /// Provider the candidate came from.
    pub source: String,
    /// Provider-scoped identifier.
    pub source_id: Option<String>,
    /// Landing page at the provider.
    pub source_url: Option<String>,
    /// Publication year when known.
    pub publication_year: Option<i64>,
    /// Abstract text when the provider supplied one.
    #[sqlx(rename = "abstract")]
    pub abstract_text: Option<String>,
    /// SHA-256 digest of the stored artifact.
    pub file_digest: String,
    /// Object-store path of the artifact.
    pub storage_path: String,
    /// Time-bounded signed URL for the artifact.
    pub access_url: Option<String>,
    /// Signed URL for the barcode QR image.
    pub qr_url: Option<String>,
    /// Lifecycle status string.
    pub status: String,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

/// Fields for a new catalog record; normalization happens at insert time.
#[derive(Debug, Clone)]
pub struct NewRecord {
    /// Unique catalog identifier allocated for this record.
    pub barcode: String,
    /// Title as published.
    pub title: String,
    /// Primary author.
    pub author: String,
    /// Material type code.
    pub material_type: String,
    /// Provider the candidate came from.
    pub source: String,
    /// Provider-scoped identifier.
    pub source_id: Option<String>,
    /// Landing page at the provider.
    pub source_url: Option<String>,
    /// Publication year when known.
    pub publication_year: Option<i64>,
    /// Abstract text when available.
    pub abstract_text: Option<String>,
    /// SHA-256 digest of the stored artifact.
    pub file_digest: String,
    /// Object-store path of the artifact.
    pub storage_path: String,
    /// Time-bounded signed URL for the artifact.
    pub access_url: Option<String>,
    /// Signed URL for the barcode QR image.
    pub qr_url: Option<String>,
}

/// Explicit, enumerated patch for record updates.
///
/// Only the fields listed here may be mutated after insert; everything else
/// is immutable once written.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    /// Replace the signed access URL.
    pub access_url: Option<String>,
    /// Replace the QR image URL.
    pub qr_url: Option<String>,
    /// Replace the lifecycle status.
    pub status: Option<RecordStatus>,
    /// Replace the abstract text.
    pub abstract_text: Option<String>,
}

impl RecordPatch {
    /// True when no field is set; such a patch is rejected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.access_url.is_none()
            && self.qr_url.is_none()
            && self.status.is_none()
            && self.abstract_text.is_none()
    }
}

/// Normalizes a title or author for duplicate comparison:
/// trimmed, lowercased, internal whitespace collapsed to single spaces.
#[must_use]
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Catalog store contract consumed by the allocator and the pipeline.
///
/// Object-safe so tests can substitute doubles for collision and failure
/// scenarios.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Point lookup: does any record carry this barcode?
    async fn barcode_exists(&self, barcode: &str) -> Result<bool, CatalogError>;

    /// Lookup by normalized (title, author).
    async fn find_by_title_author(
        &self,
        title: &str,
        author: &str,
    ) -> Result<Option<CatalogRecord>, CatalogError>;

    /// Unique-constrained insert with a tagged outcome.
    async fn insert(&self, record: &NewRecord) -> Result<WriteOutcome, CatalogError>;

    /// Applies an explicit field patch to the record with this barcode.
    async fn patch(&self, barcode: &str, patch: &RecordPatch) -> Result<(), CatalogError>;

    /// Aggregate count of records with the given status.
    async fn count_by_status(&self, status: RecordStatus) -> Result<i64, CatalogError>;

    /// Aggregate count of records with the given material type.
    async fn count_by_material_type(&self, material_type: &str) -> Result<i64, CatalogError>;
}

/// SQLite-backed catalog store.
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    db: Database,
}

impl SqliteCatalog {
    /// Creates a catalog store over the given database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    #[instrument(skip(self))]
    async fn barcode_exists(&self, barcode: &str) -> Result<bool, CatalogError> {
        let row = sqlx::query(r"SELECT COUNT(*) as count FROM catalog_records WHERE barcode = ?")
            .bind(barcode)
            .fetch_one(self.db.pool())
            .await?;

        Ok(row.get::<i64, _>("count") > 0)
    }

    #[instrument(skip(self), fields(title = %title, author = %author))]
    async fn find_by_title_author(
        &self,
        title: &str,
        author: &str,
    ) -> Result<Option<CatalogRecord>, CatalogError> {
        let record = sqlx::query_as::<_, CatalogRecord>(
            r"SELECT * FROM catalog_records WHERE title_norm = ? AND author_norm = ?",
        )
        .bind(normalize(title))
        .bind(normalize(author))
        .fetch_optional(self.db.pool())
        .await?;

        Ok(record)
    }

    #[instrument(skip(self, record), fields(barcode = %record.barcode, title = %record.title))]
    async fn insert(&self, record: &NewRecord) -> Result<WriteOutcome, CatalogError> {
        let result = sqlx::query(
            r"INSERT INTO catalog_records (
                barcode, title, author, title_norm, author_norm,
                material_type, source, source_id, source_url,
                publication_year, abstract, file_digest, storage_path,
                access_url, qr_url
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.barcode)
        .bind(&record.title)
        .bind(&record.author)
        .bind(normalize(&record.title))
        .bind(normalize(&record.author))
        .bind(&record.material_type)
        .bind(&record.source)
        .bind(&record.source_id)
        .bind(&record.source_url)
        .bind(record.publication_year)
        .bind(&record.abstract_text)
        .bind(&record.file_digest)
        .bind(&record.storage_path)
        .bind(&record.access_url)
        .bind(&record.qr_url)
        .execute(self.db.pool())
        .await;

        match result {
            Ok(_) => Ok(WriteOutcome::Created),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Ok(WriteOutcome::DuplicateSkipped)
            }
            Err(e) => Err(CatalogError::Database(e)),
        }
    }

    #[instrument(skip(self, patch))]
    async fn patch(&self, barcode: &str, patch: &RecordPatch) -> Result<(), CatalogError> {
        if patch.is_empty() {
            return Err(CatalogError::EmptyPatch);
        }

        let mut builder =
            sqlx::QueryBuilder::<sqlx::Sqlite>::new("UPDATE catalog_records SET ");
        let mut separated = builder.separated(", ");

        if let Some(access_url) = &patch.access_url {
            separated.push("access_url = ");
            separated.push_bind_unseparated(access_url);
        }
        if let Some(qr_url) = &patch.qr_url {
            separated.push("qr_url = ");
            separated.push_bind_unseparated(qr_url);
        }
        if let Some(status) = patch.status {
            separated.push("status = ");
            separated.push_bind_unseparated(status.as_str());
        }
        if let Some(abstract_text) = &patch.abstract_text {
            separated.push("abstract = ");
            separated.push_bind_unseparated(abstract_text);
        }
        separated.push("updated_at = datetime('now')");

        builder.push(" WHERE barcode = ");
        builder.push_bind(barcode);

        let result = builder.build().execute(self.db.pool()).await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::RecordNotFound(barcode.to_string()));
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn count_by_status(&self, status: RecordStatus) -> Result<i64, CatalogError> {
        let row = sqlx::query(r"SELECT COUNT(*) as count FROM catalog_records WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(self.db.pool())
            .await?;

        Ok(row.get("count"))
    }

    #[instrument(skip(self))]
    async fn count_by_material_type(&self, material_type: &str) -> Result<i64, CatalogError> {
        let row =
            sqlx::query(r"SELECT COUNT(*) as count FROM catalog_records WHERE material_type = ?")
                .bind(material_type)
                .fetch_one(self.db.pool())
                .await?;

        Ok(row.get("count"))
    }
}
