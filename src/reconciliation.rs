// ⚖️ Reconciliation Engine - Cross-check two independent extractions
//
// The relational backup and the markup report describe the same history but
// are parsed by unrelated code paths. Comparing their aggregates is what makes
// the migration trustworthy:
//   count parity, income parity, expense parity, net balance drift.
//
// Every check runs; findings accumulate so the caller sees all discrepancies
// in one pass. Findings are data, never errors.

use crate::model::{ExtractionResult, MigrationStats};
use serde::{Deserialize, Serialize};

// ============================================================================
// VALIDATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,

    /// Stats of the first source passed to `validate` (the database backup)
    pub primary_stats: MigrationStats,
    /// Stats of the second source (the report export)
    pub secondary_stats: MigrationStats,

    /// (income - expense) of primary minus the same for secondary
    pub diff_balance: f64,
}

impl ValidationResult {
    pub fn summary(&self) -> String {
        format!(
            "Reconciliation {}: {} vs {} transactions, {} error(s), {} warning(s), balance drift {:.2}",
            if self.is_valid { "passed" } else { "failed" },
            self.primary_stats.transactions,
            self.secondary_stats.transactions,
            self.errors.len(),
            self.warnings.len(),
            self.diff_balance
        )
    }
}

/// Outcome of one independent check
#[derive(Debug, Clone, Default, PartialEq)]
struct CheckOutcome {
    warning: Option<String>,
    error: Option<String>,
}

impl CheckOutcome {
    fn passed() -> Self {
        Self::default()
    }

    fn is_hard_failure(&self) -> bool {
        self.error.is_some()
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconciliationEngine {
    /// Count difference above which a mismatch becomes an error (default: 100)
    pub count_threshold: usize,

    /// Absolute tolerance for money totals (default: 0.01)
    pub tolerance: f64,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            count_threshold: 100,
            tolerance: 0.01,
        }
    }

    pub fn with_thresholds(count_threshold: usize, tolerance: f64) -> Self {
        ReconciliationEngine {
            count_threshold,
            tolerance,
        }
    }

    /// Compare two extractions. Pure and deterministic.
    ///
    /// Example:
    /// ```
    /// use ledger_bridge::{ExtractionResult, ReconciliationEngine};
    ///
    /// let db = ExtractionResult::default();
    /// let xls = ExtractionResult::default();
    /// let result = ReconciliationEngine::new().validate(&db, &xls);
    /// assert!(result.is_valid);
    /// ```
    pub fn validate(&self, primary: &ExtractionResult, secondary: &ExtractionResult) -> ValidationResult {
        let a = primary.stats();
        let b = secondary.stats();

        let outcomes = [
            self.check_count(&a, &b),
            self.check_total("Total Income", a.total_income, b.total_income),
            self.check_total("Total Expense", a.total_expense, b.total_expense),
        ];

        let is_valid = outcomes.iter().all(|o| !o.is_hard_failure());
        let (warnings, errors) = outcomes.into_iter().fold(
            (Vec::new(), Vec::new()),
            |(mut warnings, mut errors), outcome| {
                warnings.extend(outcome.warning);
                errors.extend(outcome.error);
                (warnings, errors)
            },
        );

        ValidationResult {
            is_valid,
            errors,
            warnings,
            primary_stats: a,
            secondary_stats: b,
            diff_balance: a.net() - b.net(),
        }
    }

    /// Small count gaps are expected (boundary rows); large ones usually mean
    /// one source counts transfers and the other does not.
    fn check_count(&self, a: &MigrationStats, b: &MigrationStats) -> CheckOutcome {
        if a.transactions == b.transactions {
            return CheckOutcome::passed();
        }

        let diff = a.transactions as i64 - b.transactions as i64;
        let warning = format!(
            "Transaction count mismatch: DB={}, XLS={} (Diff: {})",
            a.transactions, b.transactions, diff
        );
        let error = (diff.unsigned_abs() as usize > self.count_threshold).then(|| {
            "Significant transaction count mismatch. Check if Transfer handling differs.".to_string()
        });

        CheckOutcome {
            warning: Some(warning),
            error,
        }
    }

    /// A NaN drift fails the comparison too
    fn check_total(&self, label: &str, a: f64, b: f64) -> CheckOutcome {
        if !((a - b).abs() <= self.tolerance) {
            CheckOutcome {
                warning: None,
                error: Some(format!("{} mismatch: DB={:.2}, XLS={:.2}", label, a, b)),
            }
        } else {
            CheckOutcome::passed()
        }
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TransactionDto, TxKind};
    use proptest::prelude::*;

    fn source(income: &[f64], expense: &[f64], transfers: usize) -> ExtractionResult {
        let mut transactions = Vec::new();
        for (i, amount) in income.iter().enumerate() {
            transactions.push(TransactionDto::new(format!("i{i}"), "2025-01-01", *amount, TxKind::Income));
        }
        for (i, amount) in expense.iter().enumerate() {
            transactions.push(TransactionDto::new(format!("e{i}"), "2025-01-01", *amount, TxKind::Expense));
        }
        for i in 0..transfers {
            transactions.push(TransactionDto::new(format!("t{i}"), "2025-01-01", 10.0, TxKind::Transfer));
        }
        ExtractionResult::new(vec![], vec![], transactions)
    }

    fn padded(count: usize) -> ExtractionResult {
        source(&[], &vec![0.0; count], 0)
    }

    #[test]
    fn test_identical_sources_pass() {
        let engine = ReconciliationEngine::new();
        let a = source(&[50000.0], &[100.50, 35.0], 0);
        let b = source(&[50000.0], &[100.50, 35.0], 0);

        let result = engine.validate(&a, &b);

        assert!(result.is_valid);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
        assert_eq!(result.diff_balance, 0.0);
        assert_eq!(result.primary_stats.transactions, 3);
    }

    #[test]
    fn test_small_count_gap_is_warning_only() {
        let engine = ReconciliationEngine::new();
        let a = source(&[100.0], &[40.0], 1);
        let b = source(&[100.0], &[40.0], 0);

        let result = engine.validate(&a, &b);

        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("DB=3, XLS=2"));
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_count_gap_at_threshold_is_not_error() {
        let engine = ReconciliationEngine::new();
        let result = engine.validate(&padded(100), &padded(0));

        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_large_count_gap_is_error() {
        let engine = ReconciliationEngine::new();
        let result = engine.validate(&padded(101), &padded(0));

        assert!(!result.is_valid);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("Transfer handling"));
    }

    #[test]
    fn test_income_and_expense_checked_independently() {
        let engine = ReconciliationEngine::new();
        let a = source(&[1000.0], &[200.0], 0);
        let b = source(&[900.0], &[250.0], 0);

        let result = engine.validate(&a, &b);

        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].starts_with("Total Income mismatch: DB=1000.00, XLS=900.00"));
        assert!(result.errors[1].starts_with("Total Expense mismatch"));
        // (1000 - 200) - (900 - 250) = 150
        assert!((result.diff_balance - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_total_is_a_mismatch() {
        let engine = ReconciliationEngine::new();
        let mut a = source(&[100.0], &[10.0], 0);
        a.total_income = f64::NAN;
        let b = source(&[100.0], &[10.0], 0);

        let result = engine.validate(&a, &b);

        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("Total Income mismatch: DB=NaN, XLS=100.00"), "{}", result.errors[0]);

        let mut c = source(&[100.0], &[10.0], 0);
        c.total_expense = f64::INFINITY;
        let result = engine.validate(&b, &c);
        assert!(result.errors[0].starts_with("Total Expense mismatch"));
    }

    #[test]
    fn test_rounding_within_epsilon_passes() {
        let engine = ReconciliationEngine::new();
        let a = source(&[100.004], &[], 0);
        let b = source(&[100.0], &[], 0);

        let result = engine.validate(&a, &b);
        assert!(result.is_valid);
        assert!(result.diff_balance > 0.0);
    }

    #[test]
    fn test_all_findings_accumulate() {
        let engine = ReconciliationEngine::new();
        let mut a = padded(150);
        a.transactions.push(TransactionDto::new("x", "", 5.0, TxKind::Income));
        a = ExtractionResult::new(vec![], vec![], a.transactions);
        let b = source(&[], &[3.0], 0);

        let result = engine.validate(&a, &b);

        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.errors.len(), 3);
        assert!(!result.is_valid);
        println!("{}", result.summary());
    }

    #[test]
    fn test_custom_thresholds() {
        let engine = ReconciliationEngine::with_thresholds(1, 5.0);
        let result = engine.validate(&source(&[10.0], &[], 2), &source(&[14.0], &[], 0));

        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("count"));
    }

    proptest! {
        #[test]
        fn prop_count_error_is_symmetric(n in 0usize..300, m in 0usize..300) {
            let engine = ReconciliationEngine::new();
            let (a, b) = (padded(n), padded(m));

            let ab = engine.validate(&a, &b);
            let ba = engine.validate(&b, &a);

            prop_assert_eq!(ab.errors.len(), ba.errors.len());
            prop_assert_eq!(ab.warnings.len(), ba.warnings.len());
            prop_assert_eq!(ab.is_valid, ba.is_valid);
            prop_assert_eq!(ab.is_valid, n.abs_diff(m) <= 100);
        }
    }
}
