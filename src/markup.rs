// 📄 Markup-Source Extractor
// The legacy app's "XLS" export is really an HTML table. It carries a flat
// transaction log only, so accounts and categories stay empty.
//
// Row heuristic: at least five cells, and the trailing cell must parse as a
// number once thousands separators are stripped. Header and title rows fail
// that test and are skipped silently.

use crate::error::ExtractionError;
use crate::model::{ExtractionResult, TransactionDto, TxKind};
use crate::parser::{SourceExtractor, SourceKind};
use scraper::{ElementRef, Html, Selector};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Fewer cells than this is a title/header row
pub const MIN_CELLS: usize = 5;

/// OLE2 compound document magic (a genuine binary .xls)
const OLE2_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

fn tr_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("tr").expect("invalid tr selector"))
}

pub struct MarkupExtractor;

impl MarkupExtractor {
    pub fn new() -> Self {
        MarkupExtractor
    }

    /// Parse an already-loaded document
    pub fn extract_str(&self, html: &str) -> ExtractionResult {
        let doc = Html::parse_document(html);

        let mut transactions = Vec::new();
        let mut skipped = 0usize;

        for tr in doc.select(tr_selector()) {
            let cells = row_cells(tr);
            match row_to_transaction(&cells, transactions.len()) {
                Some(tx) => transactions.push(tx),
                None => skipped += 1,
            }
        }

        debug!(accepted = transactions.len(), skipped, "markup rows scanned");
        ExtractionResult::new(Vec::new(), Vec::new(), transactions)
    }
}

impl Default for MarkupExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceExtractor for MarkupExtractor {
    fn extract(&self, file_path: &Path) -> Result<ExtractionResult, ExtractionError> {
        let bytes = std::fs::read(file_path)
            .map_err(|e| ExtractionError::open_failed(format!("{}: {}", file_path.display(), e)))?;

        if bytes.starts_with(&OLE2_MAGIC) {
            return Err(ExtractionError::parse_failed(
                "binary spreadsheet found, expected the HTML report export",
            ));
        }

        let html = String::from_utf8(bytes)
            .map_err(|e| ExtractionError::parse_failed(format!("export is not UTF-8 text: {}", e)))?;

        let result = self.extract_str(&html);

        info!(
            source = self.source_kind().name(),
            version = self.version(),
            transactions = result.transactions.len(),
            total_income = result.total_income,
            total_expense = result.total_expense,
            "markup source extracted"
        );

        Ok(result)
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::Markup
    }
}

// ============================================================================
// ROW HANDLING
// ============================================================================

/// Trimmed text of the direct cell children of a row
fn row_cells(tr: ElementRef<'_>) -> Vec<String> {
    tr.children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| matches!(cell.value().name(), "td" | "th"))
        .map(|cell| cell.text().collect::<String>().trim().to_string())
        .collect()
}

/// Amount cell with thousands separators removed; non-numbers are not data
pub fn parse_amount(cell: &str) -> Option<f64> {
    let cleaned: String = cell.chars().filter(|c| *c != ',').collect();
    cleaned
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|amount| amount.is_finite())
}

fn row_to_transaction(cells: &[String], ordinal: usize) -> Option<TransactionDto> {
    if cells.len() < MIN_CELLS {
        return None;
    }

    let amount = parse_amount(cells.last()?)?;

    // Sign carries the kind; expenses are normalised to their magnitude
    let (kind, amount) = if amount > 0.0 {
        (TxKind::Income, amount)
    } else {
        (TxKind::Expense, amount.abs())
    };

    Some(TransactionDto::new(
        format!("row-{}", ordinal + 1),
        cells[0].clone(),
        amount,
        kind,
    ))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractionReason;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const REPORT: &str = r#"<html><body>
        <table>
          <tr><td colspan="5">Money Manager Report 2025</td></tr>
          <tr><th>Date</th><th>Account</th><th>Category</th><th>Note</th><th>Amount</th></tr>
          <tr><td>2025-01-15</td><td>Cash</td><td>Food</td><td>Lunch</td><td>-100.50</td></tr>
          <tr><td>2025-01-20</td><td>Bank</td><td>Salary</td><td>Pay</td><td>50,000.00</td></tr>
          <tr><td>2025-01-22</td><td>Cash</td><td>Transport</td><td>Bus</td><td> -35 </td></tr>
          <tr><td>2025-01-23</td><td>Cash</td><td>Misc</td><td>Zero</td><td>0</td></tr>
          <tr><td>Total</td><td></td><td></td><td></td><td>n/a</td></tr>
          <tr><td>2025-01-24</td><td>Cash</td><td>-5</td></tr>
        </table>
    </body></html>"#;

    #[test]
    fn test_extracts_data_rows_only() {
        let result = MarkupExtractor::new().extract_str(REPORT);

        assert_eq!(result.transactions.len(), 4);
        assert!(result.accounts.is_empty());
        assert!(result.categories.is_empty());
        assert_eq!(result.total_income, 50000.0);
        assert_eq!(result.total_expense, 135.50);
    }

    #[test]
    fn test_sign_determines_kind() {
        let result = MarkupExtractor::new().extract_str(REPORT);

        let lunch = &result.transactions[0];
        assert_eq!(lunch.date, "2025-01-15");
        assert_eq!(lunch.kind, TxKind::Expense);
        assert_eq!(lunch.amount, 100.50);

        let salary = &result.transactions[1];
        assert_eq!(salary.kind, TxKind::Income);
        assert_eq!(salary.amount, 50000.0);

        // Zero is non-positive
        assert_eq!(result.transactions[3].kind, TxKind::Expense);
        assert_eq!(result.transactions[3].amount, 0.0);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1,234.50"), Some(1234.5));
        assert_eq!(parse_amount("-35"), Some(-35.0));
        assert_eq!(parse_amount("Amount"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("NaN"), None);
        assert_eq!(parse_amount("inf"), None);
    }

    #[test]
    fn test_extract_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(REPORT.as_bytes()).unwrap();

        let result = MarkupExtractor::new().extract(file.path()).unwrap();
        assert_eq!(result.transactions.len(), 4);
    }

    #[test]
    fn test_missing_file_is_open_failed() {
        let err = MarkupExtractor::new()
            .extract(Path::new("/definitely/not/here.xls"))
            .unwrap_err();
        assert_eq!(err.reason, ExtractionReason::OpenFailed);
    }

    #[test]
    fn test_binary_xls_is_parse_failed() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&OLE2_MAGIC).unwrap();
        file.write_all(&[0u8; 64]).unwrap();

        let err = MarkupExtractor::new().extract(file.path()).unwrap_err();
        assert_eq!(err.reason, ExtractionReason::ParseFailed);
    }

    #[test]
    fn test_non_utf8_is_parse_failed() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0xFF, 0xFE, 0x3C, 0x00, 0xFF]).unwrap();

        let err = MarkupExtractor::new().extract(file.path()).unwrap_err();
        assert_eq!(err.reason, ExtractionReason::ParseFailed);
    }

    #[test]
    fn test_document_without_rows_is_empty() {
        let result = MarkupExtractor::new().extract_str("<html><body><p>nothing</p></body></html>");
        assert!(result.transactions.is_empty());
        assert_eq!(result.total_income, 0.0);
    }

    proptest! {
        #[test]
        fn prop_non_numeric_trailing_cell_is_excluded(
            label in "[A-Za-z][A-Za-z ]{0,12}",
            cents in -1_000_000i64..1_000_000i64,
        ) {
            let html = format!(
                "<table>\
                 <tr><td>2025-01-01</td><td>a</td><td>b</td><td>c</td><td>{}</td></tr>\
                 <tr><td>2025-01-02</td><td>a</td><td>b</td><td>c</td><td>{}</td></tr>\
                 </table>",
                label,
                cents as f64 / 100.0,
            );

            let extractor = MarkupExtractor::new();
            let first = extractor.extract_str(&html);
            let second = extractor.extract_str(&html);

            // "inf"/"nan" style labels are rejected along with every other word
            prop_assert_eq!(first.transactions.len(), 1);
            prop_assert_eq!(&first.transactions[0].date, "2025-01-02");
            prop_assert_eq!(first, second);
        }
    }
}
