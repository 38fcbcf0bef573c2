// 🏗️ Extractor Framework
// Two heterogeneous exports of the same history, one trait.

use crate::error::ExtractionError;
use crate::markup::MarkupExtractor;
use crate::model::ExtractionResult;
use crate::relational::RelationalExtractor;
use crate::schema::DiscriminatorMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// CORE TYPES
// ============================================================================

/// Which export a file is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Embedded SQLite backup (`.mmbak`)
    Relational,
    /// HTML table saved with an `.xls` extension
    Markup,
}

impl SourceKind {
    /// Human-readable name for messages
    pub fn name(&self) -> &str {
        match self {
            SourceKind::Relational => "database backup",
            SourceKind::Markup => "XLS report",
        }
    }

    /// Extension used when staging uploads
    pub fn extension(&self) -> &str {
        match self {
            SourceKind::Relational => "mmbak",
            SourceKind::Markup => "xls",
        }
    }
}

// ============================================================================
// TRAIT
// ============================================================================

/// SourceExtractor - reads one raw format into canonical DTOs plus totals.
///
/// Implementations must not share mutable state: the orchestrator runs both
/// extractors on separate threads.
pub trait SourceExtractor: Send + Sync {
    fn extract(&self, file_path: &Path) -> Result<ExtractionResult, ExtractionError>;

    fn source_kind(&self) -> SourceKind;

    /// Extractor version (logged with every run)
    fn version(&self) -> &str {
        "1.0.0"
    }
}

// ============================================================================
// FACTORY
// ============================================================================

/// Detect the export kind from the file extension
pub fn detect_source(file_path: &Path) -> Option<SourceKind> {
    let ext = file_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "mmbak" | "sqlite" | "db" => Some(SourceKind::Relational),
        "xls" | "html" | "htm" => Some(SourceKind::Markup),
        _ => None,
    }
}

pub fn get_extractor(kind: SourceKind, discriminators: &DiscriminatorMap) -> Box<dyn SourceExtractor> {
    match kind {
        SourceKind::Relational => Box::new(RelationalExtractor::new(discriminators.clone())),
        SourceKind::Markup => Box::new(MarkupExtractor::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_source_by_extension() {
        assert_eq!(detect_source(Path::new("backup.mmbak")), Some(SourceKind::Relational));
        assert_eq!(detect_source(Path::new("Report.XLS")), Some(SourceKind::Markup));
        assert_eq!(detect_source(Path::new("notes.txt")), None);
    }

    #[test]
    fn test_factory_returns_matching_kind() {
        let map = DiscriminatorMap::default();
        assert_eq!(get_extractor(SourceKind::Relational, &map).source_kind(), SourceKind::Relational);
        assert_eq!(get_extractor(SourceKind::Markup, &map).source_kind(), SourceKind::Markup);
    }
}
