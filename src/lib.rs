// Ledger Bridge - Core Library
// Migrates a legacy finance app's data (SQLite backup + HTML report export)
// into a double-entry-aware ledger. Shared by the CLI, API server, and tests.

pub mod error;
pub mod model;
pub mod schema;         // Physical layouts of the legacy backup + discriminator table
pub mod parser;         // SourceExtractor trait + factory
pub mod relational;     // .mmbak (SQLite) extractor
pub mod markup;         // .xls (HTML table) extractor
pub mod reconciliation; // Cross-source validation
pub mod db;             // Ledger schema and row mapping
pub mod ledger;         // Transfer-pair invariant layer
pub mod importer;       // Extraction → ledger drafts
pub mod migration;      // Upload orchestration + job registry
pub mod report;         // Filtered ledger reports
pub mod config;
pub mod logging;

// Re-export commonly used types
pub use error::{
    ExtractionError, ExtractionReason, LedgerError, MigrationError, PersistenceError, ReportError,
};
pub use model::{
    AccountDto, CategoryDto, ExtractionResult, Jar, LedgerTransaction, MigrationStats, Totals,
    TransactionDto, TxKind, Wallet,
};
pub use schema::DiscriminatorMap;
pub use parser::{detect_source, get_extractor, SourceExtractor, SourceKind};
pub use relational::RelationalExtractor;
pub use markup::MarkupExtractor;
pub use reconciliation::{ReconciliationEngine, ValidationResult};
pub use ledger::{LedgerOp, LedgerStore, MemoryLedger, SqliteLedger, TransferService};
pub use importer::{plan_import, ImportEntry, ImportPreview, UnassignedRow, UndatedRow};
pub use migration::{CommitOutcome, MigrationJob, MigrationResponse, MigrationService, MigrationStatus};
pub use report::{Report, ReportFilter, ReportService};
pub use config::AppConfig;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
