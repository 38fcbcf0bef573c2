// 🧱 Canonical Model
// Shared value types produced by both extractors and persisted by the ledger.
//
// Both extractors must emit the exact same DTO shape so the validator can
// compare them without caring where a row came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// TRANSACTION KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Expense,
    Income,
    Transfer,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Expense => "expense",
            TxKind::Income => "income",
            TxKind::Transfer => "transfer",
        }
    }

    pub fn is_transfer(&self) -> bool {
        matches!(self, TxKind::Transfer)
    }
}

// ============================================================================
// EXTRACTED DTOs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AccountDto {
    pub id: String,
    pub name: String,
    pub currency: String,
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CategoryDto {
    pub id: String,
    pub name: String,
    /// Raw source type code (1 = income in every observed variant)
    pub kind: i64,
    pub parent_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDto {
    pub id: String,
    /// Raw source date, never normalised at extraction time
    pub date: String,
    pub amount: f64,
    pub kind: TxKind,
    pub category_id: String,
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterpart_account_id: Option<String>,
    pub note: String,
}

impl TransactionDto {
    pub fn new(id: impl Into<String>, date: impl Into<String>, amount: f64, kind: TxKind) -> Self {
        TransactionDto {
            id: id.into(),
            date: date.into(),
            amount,
            kind,
            category_id: String::new(),
            account_id: String::new(),
            counterpart_account_id: None,
            note: String::new(),
        }
    }
}

// ============================================================================
// TOTALS (explicit fold, decoupled from row classification)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Totals {
    pub income: f64,
    pub expense: f64,
}

impl Totals {
    /// Fold one transaction into the running totals.
    ///
    /// Income adds the stored amount, expense adds its magnitude because some
    /// source variants store expenses as negative numbers. Transfers are
    /// movement between accounts and count toward neither side.
    pub fn accumulate(self, tx: &TransactionDto) -> Totals {
        match tx.kind {
            TxKind::Income => Totals {
                income: self.income + tx.amount,
                ..self
            },
            TxKind::Expense => Totals {
                expense: self.expense + tx.amount.abs(),
                ..self
            },
            TxKind::Transfer => self,
        }
    }

    pub fn from_transactions(transactions: &[TransactionDto]) -> Totals {
        transactions
            .iter()
            .fold(Totals::default(), |acc, tx| acc.accumulate(tx))
    }

    pub fn net(&self) -> f64 {
        self.income - self.expense
    }
}

// ============================================================================
// EXTRACTION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub accounts: Vec<AccountDto>,
    pub categories: Vec<CategoryDto>,
    pub transactions: Vec<TransactionDto>,
    pub total_income: f64,
    pub total_expense: f64,
}

impl ExtractionResult {
    /// Build a result whose totals are exactly what this extractor classified
    pub fn new(
        accounts: Vec<AccountDto>,
        categories: Vec<CategoryDto>,
        transactions: Vec<TransactionDto>,
    ) -> Self {
        let totals = Totals::from_transactions(&transactions);
        ExtractionResult {
            accounts,
            categories,
            transactions,
            total_income: totals.income,
            total_expense: totals.expense,
        }
    }

    pub fn totals(&self) -> Totals {
        Totals {
            income: self.total_income,
            expense: self.total_expense,
        }
    }

    pub fn stats(&self) -> MigrationStats {
        MigrationStats {
            wallets: self.accounts.len(),
            jars: self.categories.len(),
            transactions: self.transactions.len(),
            total_income: self.total_income,
            total_expense: self.total_expense,
        }
    }

    pub fn count_of(&self, kind: TxKind) -> usize {
        self.transactions.iter().filter(|tx| tx.kind == kind).count()
    }
}

/// Aggregate view of one source, compared by the reconciliation engine
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MigrationStats {
    pub wallets: usize,
    pub jars: usize,
    pub transactions: usize,
    pub total_income: f64,
    pub total_expense: f64,
}

impl MigrationStats {
    pub fn net(&self) -> f64 {
        self.total_income - self.total_expense
    }
}

// ============================================================================
// LEDGER DOMAIN
// ============================================================================

/// Persisted ledger record; negative amount = money leaving the wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: String,
    pub amount: f64,
    pub description: String,
    pub date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub wallet_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jar_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_transaction_id: Option<String>,
}

impl LedgerTransaction {
    pub fn is_linked(&self) -> bool {
        self.related_transaction_id.is_some()
    }

    pub fn links_to(&self, other: &LedgerTransaction) -> bool {
        self.related_transaction_id.as_deref() == Some(other.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: String,
    pub name: String,
    pub currency: String,
    pub balance: f64,
    #[serde(rename = "type")]
    pub wallet_type: String,
}

/// Spending/earning bucket (the ledger's notion of a category)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jar {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_id: String,
    #[serde(rename = "type")]
    pub jar_type: String,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tx(amount: f64, kind: TxKind) -> TransactionDto {
        TransactionDto::new("t", "2025-01-01", amount, kind)
    }

    #[test]
    fn test_totals_exclude_transfers() {
        let transactions = vec![
            tx(50000.0, TxKind::Income),
            tx(100.50, TxKind::Expense),
            tx(35.0, TxKind::Expense),
            tx(5000.0, TxKind::Transfer),
        ];

        let totals = Totals::from_transactions(&transactions);
        assert_eq!(totals.income, 50000.0);
        assert_eq!(totals.expense, 135.50);
    }

    #[test]
    fn test_negative_expense_counts_by_magnitude() {
        let totals = Totals::from_transactions(&[tx(-20.0, TxKind::Expense)]);
        assert_eq!(totals.expense, 20.0);
        assert_eq!(totals.net(), -20.0);
    }

    #[test]
    fn test_extraction_result_stats() {
        let result = ExtractionResult::new(
            vec![AccountDto::default()],
            vec![],
            vec![tx(10.0, TxKind::Income), tx(4.0, TxKind::Expense)],
        );

        let stats = result.stats();
        assert_eq!(stats.wallets, 1);
        assert_eq!(stats.jars, 0);
        assert_eq!(stats.transactions, 2);
        assert_eq!(stats.net(), 6.0);
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TxKind::Transfer).unwrap(), "\"transfer\"");
    }

    fn kind_strategy() -> impl Strategy<Value = TxKind> {
        prop_oneof![
            Just(TxKind::Expense),
            Just(TxKind::Income),
            Just(TxKind::Transfer),
        ]
    }

    proptest! {
        #[test]
        fn prop_totals_match_classified_sums(
            rows in prop::collection::vec((-1_000_000i64..1_000_000i64, kind_strategy()), 0..64)
        ) {
            let transactions: Vec<TransactionDto> = rows
                .iter()
                .map(|(cents, kind)| tx(*cents as f64 / 100.0, *kind))
                .collect();

            let result = ExtractionResult::new(vec![], vec![], transactions.clone());

            let income: f64 = transactions.iter()
                .filter(|t| t.kind == TxKind::Income)
                .map(|t| t.amount)
                .sum();
            let expense: f64 = transactions.iter()
                .filter(|t| t.kind == TxKind::Expense)
                .map(|t| t.amount.abs())
                .sum();

            prop_assert!((result.total_income - income).abs() < 1e-6);
            prop_assert!((result.total_expense - expense).abs() < 1e-6);
        }
    }
}
