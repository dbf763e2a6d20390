//! PDF validation for downloaded binaries.
//!
//! Every fetched payload passes through [`validate`] before anything is
//! persisted. Checks run cheapest-first and fail fast: an empty buffer or a
//! wrong magic sequence never pays for a structural parse, and the content
//! digest is only computed once every other check has passed.
//!
//! The structural parse is deliberately shallow - it confirms the buffer
//! looks like a well-formed PDF (page objects present, `%%EOF` trailer) and
//! extracts a page count plus a short text excerpt for the catalog. It is
//! not a full PDF reader.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Magic sequence every PDF starts with.
pub const PDF_MAGIC: [u8; 4] = *b"%PDF";

/// Trailer marker that must appear for the file to be considered complete.
const PDF_TRAILER: &[u8] = b"%%EOF";

/// Maximum length of the extracted text excerpt.
const EXCERPT_MAX_CHARS: usize = 200;

/// A blocking validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The downloaded buffer was empty.
    #[error("empty file")]
    Empty,

    /// The first 4 bytes did not match the PDF magic sequence.
    #[error("invalid signature: file is not a PDF")]
    InvalidSignature,

    /// The buffer exceeded the configured size ceiling.
    #[error("file size {size} exceeds limit of {limit} bytes")]
    TooLarge {
        /// Actual byte length.
        size: u64,
        /// Configured ceiling.
        limit: u64,
    },

    /// The structural parse failed.
    #[error("unparsable PDF structure: {0}")]
    Unparsable(String),
}

/// Outcome of validating one downloaded binary.
///
/// `errors` holds at most the first blocking error; later checks are
/// skipped once one fails. Structural metadata and the digest are only
/// populated on a fully valid file.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Blocking errors, in check order (at most one by construction).
    pub errors: Vec<ValidationError>,
    /// Number of page objects found.
    pub page_count: Option<u32>,
    /// Short text excerpt from the document, when one could be extracted.
    pub excerpt: Option<String>,
    /// SHA-256 content digest, lowercase hex.
    pub digest: Option<String>,
}

impl ValidationResult {
    /// True iff every check passed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn failed(error: ValidationError) -> Self {
        Self {
            errors: vec![error],
            ..Self::default()
        }
    }
}

/// Validates a downloaded binary against the acquisition contract.
///
/// Check order (fail-fast): non-empty, PDF magic, size ceiling, structural
/// parse, then digest.
#[must_use]
pub fn validate(bytes: &[u8], max_size_bytes: u64) -> ValidationResult {
    if bytes.is_empty() {
        return ValidationResult::failed(ValidationError::Empty);
    }

    if bytes.len() < PDF_MAGIC.len() || bytes[..PDF_MAGIC.len()] != PDF_MAGIC {
        return ValidationResult::failed(ValidationError::InvalidSignature);
    }

    let size = bytes.len() as u64;
    if size > max_size_bytes {
        return ValidationResult::failed(ValidationError::TooLarge {
            size,
            limit: max_size_bytes,
        });
    }

    let page_count = match parse_structure(bytes) {
        Ok(count) => count,
        Err(reason) => {
            return ValidationResult::failed(ValidationError::Unparsable(reason));
        }
    };

    let digest = hex_digest(bytes);

    ValidationResult {
        errors: Vec::new(),
        page_count: Some(page_count),
        excerpt: extract_excerpt(bytes),
        digest: Some(digest),
    }
}

/// Computes the lowercase-hex SHA-256 digest of a buffer.
#[must_use]
pub fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Shallow structural parse: requires the `%%EOF` trailer and at least one
/// page object, returning the page count.
fn parse_structure(bytes: &[u8]) -> Result<u32, String> {
    if !contains(bytes, PDF_TRAILER) {
        return Err("missing %%EOF trailer".to_string());
    }

    let pages = count_page_objects(bytes);
    if pages == 0 {
        return Err("no page objects found".to_string());
    }

    Ok(pages)
}

/// Counts `/Type /Page` object markers, excluding the `/Pages` tree node.
fn count_page_objects(bytes: &[u8]) -> u32 {
    let mut count = 0u32;
    let mut idx = 0usize;
    let needle = b"/Type";

    while let Some(pos) = find_from(bytes, needle, idx) {
        let mut after = pos + needle.len();
        while after < bytes.len() && bytes[after].is_ascii_whitespace() {
            after += 1;
        }
        if bytes[after..].starts_with(b"/Page") {
            // "/Pages" is the page-tree root, not a page.
            let tail = after + b"/Page".len();
            if bytes.get(tail) != Some(&b's') {
                count += 1;
            }
        }
        idx = pos + needle.len();
    }

    count
}

/// Extracts the first parenthesized text literal as a human-readable excerpt.
fn extract_excerpt(bytes: &[u8]) -> Option<String> {
    let open = bytes.iter().position(|&b| b == b'(')?;
    let close = find_from(bytes, b")", open + 1)?;
    let raw = &bytes[open + 1..close];

    let text: String = raw
        .iter()
        .filter(|b| b.is_ascii() && !b.is_ascii_control())
        .map(|&b| b as char)
        .take(EXCERPT_MAX_CHARS)
        .collect();

    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find_from(haystack, needle, 0).is_some()
}

fn find_from(haystack: &[u8], needle: &[u8], start: usize) -> Option<usize> {
    if needle.is_empty() || start >= haystack.len() {
        return None;
    }
    haystack[start..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + start)
}
