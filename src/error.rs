// 🚨 Error taxonomy
// Extraction failures are fatal to one extractor run, validation findings are
// data (see reconciliation.rs), persistence failures never leave partial writes.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

// ============================================================================
// EXTRACTION
// ============================================================================

/// Why an extractor gave up on a whole source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionReason {
    /// File missing or unreadable
    OpenFailed,
    /// No known schema candidate matched a required record set
    SchemaMissing,
    /// File opened but is not a readable database
    Corrupt,
    /// Markup export could not be decoded as a document
    ParseFailed,
}

impl ExtractionReason {
    pub fn code(&self) -> &'static str {
        match self {
            ExtractionReason::OpenFailed => "open_failed",
            ExtractionReason::SchemaMissing => "schema_missing",
            ExtractionReason::Corrupt => "corrupt",
            ExtractionReason::ParseFailed => "parse_failed",
        }
    }
}

impl fmt::Display for ExtractionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error)]
#[error("{reason}: {detail}")]
pub struct ExtractionError {
    pub reason: ExtractionReason,
    pub detail: String,
}

impl ExtractionError {
    pub fn new(reason: ExtractionReason, detail: impl Into<String>) -> Self {
        ExtractionError {
            reason,
            detail: detail.into(),
        }
    }

    pub fn open_failed(detail: impl Into<String>) -> Self {
        Self::new(ExtractionReason::OpenFailed, detail)
    }

    pub fn schema_missing(detail: impl Into<String>) -> Self {
        Self::new(ExtractionReason::SchemaMissing, detail)
    }

    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::new(ExtractionReason::Corrupt, detail)
    }

    pub fn parse_failed(detail: impl Into<String>) -> Self {
        Self::new(ExtractionReason::ParseFailed, detail)
    }
}

// ============================================================================
// PERSISTENCE
// ============================================================================

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("transaction {0} already exists")]
    Duplicate(String),

    #[error("transfer pair rejected: {0}")]
    BrokenPair(String),

    #[error("transaction {id} links to missing transaction {related}")]
    DanglingLink { id: String, related: String },

    #[error("invalid stored record: {0}")]
    InvalidRecord(String),

    #[error("ledger store lock poisoned")]
    Poisoned,
}

/// Service-level failures for user-initiated ledger actions
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

// ============================================================================
// MIGRATION
// ============================================================================

/// Failures the caller sees as internal errors; unusable *content* is reported
/// through `MigrationStatus::Error` instead.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to stage upload: {0}")]
    Staging(#[from] std::io::Error),

    #[error("extractor thread panicked")]
    ExtractorPanicked,
}

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("invalid {field} format. Use YYYY-MM-DD or RFC3339.")]
    InvalidDate { field: &'static str },

    #[error("end_date must be after start_date")]
    InvertedRange,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_error_display_uses_reason_code() {
        let err = ExtractionError::schema_missing("no transaction table");
        assert_eq!(err.to_string(), "schema_missing: no transaction table");
        assert_eq!(err.reason, ExtractionReason::SchemaMissing);
    }

    #[test]
    fn test_reason_serializes_snake_case() {
        let json = serde_json::to_string(&ExtractionReason::OpenFailed).unwrap();
        assert_eq!(json, "\"open_failed\"");
    }

    #[test]
    fn test_ledger_error_wraps_persistence() {
        let err: LedgerError = PersistenceError::Duplicate("tx1".to_string()).into();
        assert_eq!(err.to_string(), "transaction tx1 already exists");
    }
}
