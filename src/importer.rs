// 📥 Importer - Turn an extraction into ledger-shaped drafts
//
// Accounts become wallets, categories become jars, transaction DTOs become
// ledger records. Dates are normalised here and only here; the extractors
// hand them over verbatim.
//
// A source transfer with a known counterpart account becomes a linked pair
// (expense leg on the source account, income leg on the counterpart), so
// committing a preview never breaks the ledger's pairing rule.

use crate::error::PersistenceError;
use crate::ledger::{LedgerOp, LedgerStore};
use crate::model::{
    AccountDto, CategoryDto, ExtractionResult, Jar, LedgerTransaction, TransactionDto, TxKind, Wallet,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Raw category kind that marks an earning jar
const INCOME_CATEGORY_KIND: i64 = 1;

/// Epoch values at or above this are milliseconds (year 5138 in seconds)
const EPOCH_MILLIS_CUTOFF: i64 = 100_000_000_000;

/// Suffix for the generated income leg of an imported transfer
pub const TRANSFER_INCOME_SUFFIX: &str = ":in";

// ============================================================================
// PREVIEW
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImportEntry {
    Single(LedgerTransaction),
    Transfer {
        expense: LedgerTransaction,
        income: LedgerTransaction,
    },
}

impl ImportEntry {
    pub fn records(&self) -> Vec<&LedgerTransaction> {
        match self {
            ImportEntry::Single(tx) => vec![tx],
            ImportEntry::Transfer { expense, income } => vec![expense, income],
        }
    }
}

/// Source row whose date could not be normalised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndatedRow {
    pub id: String,
    pub raw_date: String,
}

/// Source row with no account to book it against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnassignedRow {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportPreview {
    pub wallets: Vec<Wallet>,
    pub jars: Vec<Jar>,
    pub transactions: Vec<ImportEntry>,
    pub undated: Vec<UndatedRow>,
    #[serde(default)]
    pub unassigned: Vec<UnassignedRow>,
}

impl ImportPreview {
    pub fn record_count(&self) -> usize {
        self.transactions.iter().map(|e| e.records().len()).sum()
    }

    /// Persist every entry as one batch. On error nothing was written, so the
    /// same preview can be committed again.
    pub fn commit(&self, store: &dyn LedgerStore) -> Result<usize, PersistenceError> {
        let steps = self
            .transactions
            .iter()
            .map(|entry| match entry {
                ImportEntry::Single(tx) => LedgerOp::Create(tx.clone()),
                ImportEntry::Transfer { expense, income } => LedgerOp::CreateTransfer {
                    expense: expense.clone(),
                    income: income.clone(),
                },
            })
            .collect();

        store.apply(LedgerOp::Batch(steps))?;

        let written = self.record_count();
        info!(records = written, "import preview committed");
        Ok(written)
    }
}

// ============================================================================
// MAPPING
// ============================================================================

pub fn plan_import(source: &ExtractionResult) -> ImportPreview {
    let wallets = source.accounts.iter().map(map_wallet).collect();
    let jars = source.categories.iter().map(map_jar).collect();

    let mut transactions = Vec::with_capacity(source.transactions.len());
    let mut undated = Vec::new();
    let mut unassigned = Vec::new();

    for dto in &source.transactions {
        if let Some(reason) = missing_wallet(dto) {
            unassigned.push(UnassignedRow {
                id: dto.id.clone(),
                reason: reason.to_string(),
            });
            continue;
        }
        match normalize_date(&dto.date) {
            Some(date) => transactions.push(map_transaction(dto, date)),
            None => undated.push(UndatedRow {
                id: dto.id.clone(),
                raw_date: dto.date.clone(),
            }),
        }
    }

    if !undated.is_empty() {
        warn!(count = undated.len(), "rows with unreadable dates left out of the import");
    }
    if !unassigned.is_empty() {
        warn!(count = unassigned.len(), "rows without an account left out of the import");
    }

    ImportPreview {
        wallets,
        jars,
        transactions,
        undated,
        unassigned,
    }
}

/// The ledger refuses records without a wallet, so such rows never reach a commit
fn missing_wallet(dto: &TransactionDto) -> Option<&'static str> {
    if dto.account_id.trim().is_empty() {
        return Some("no account");
    }
    match (dto.kind, dto.counterpart_account_id.as_deref()) {
        (TxKind::Transfer, Some(counterpart)) if counterpart.trim().is_empty() => {
            Some("no counterpart account")
        }
        _ => None,
    }
}

fn map_wallet(account: &AccountDto) -> Wallet {
    Wallet {
        id: account.id.clone(),
        name: account.name.clone(),
        currency: account.currency.clone(),
        balance: account.balance,
        wallet_type: "general".to_string(),
    }
}

fn map_jar(category: &CategoryDto) -> Jar {
    let jar_type = if category.kind == INCOME_CATEGORY_KIND {
        "income"
    } else {
        "expense"
    };

    Jar {
        id: category.id.clone(),
        name: category.name.clone(),
        parent_id: category.parent_id.clone(),
        jar_type: jar_type.to_string(),
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn map_transaction(dto: &TransactionDto, date: DateTime<Utc>) -> ImportEntry {
    let magnitude = dto.amount.abs();
    let draft = |id: String, amount: f64, entry_type: &str, wallet: &str| LedgerTransaction {
        id,
        amount,
        description: dto.note.clone(),
        date,
        entry_type: entry_type.to_string(),
        wallet_id: wallet.to_string(),
        jar_id: non_empty(&dto.category_id),
        related_transaction_id: None,
    };

    match (dto.kind, dto.counterpart_account_id.as_deref()) {
        (TxKind::Transfer, Some(counterpart)) => {
            let income_id = format!("{}{}", dto.id, TRANSFER_INCOME_SUFFIX);

            let mut expense = draft(dto.id.clone(), -magnitude, "expense", &dto.account_id);
            let mut income = draft(income_id.clone(), magnitude, "income", counterpart);
            expense.related_transaction_id = Some(income_id);
            income.related_transaction_id = Some(dto.id.clone());

            ImportEntry::Transfer { expense, income }
        }
        // Counterpart unknown: keep the movement, unlinked
        (TxKind::Transfer, None) => ImportEntry::Single(draft(dto.id.clone(), -magnitude, "transfer", &dto.account_id)),
        (TxKind::Income, _) => ImportEntry::Single(draft(dto.id.clone(), magnitude, "income", &dto.account_id)),
        (TxKind::Expense, _) => ImportEntry::Single(draft(dto.id.clone(), -magnitude, "expense", &dto.account_id)),
    }
}

// ============================================================================
// DATE NORMALISATION
// ============================================================================

/// Accepts `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD`, RFC 3339, or epoch
/// milliseconds/seconds. Naive values are taken as UTC.
pub fn normalize_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return day.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    let epoch = raw
        .parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v as i64))?;

    if epoch.abs() >= EPOCH_MILLIS_CUTOFF {
        DateTime::from_timestamp_millis(epoch)
    } else {
        DateTime::from_timestamp(epoch, 0)
    }
}

// ============================================================================
// TESTS
// ============================================================================
