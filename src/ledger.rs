// 🔗 Ledger Invariant Layer
//
// Every transfer is exactly two records whose related_transaction_id point at
// each other: opposite amounts, same date, same description. The layer never
// leaves a one-directional link behind once an operation returns.
//
// Each mutation is a `LedgerOp` applied inside ONE storage transaction:
//   Create          single record
//   CreateTransfer  both legs or nothing
//   Delete          clear counterpart link, then delete (idempotent)
//   Unlink          clear both links, whatever they currently point at
//   Batch           several of the above, all committed or none
//
// Concurrent callers are serialised by the store's own transactions; there is
// no application-level locking beyond what the store needs to hand out its
// connection.

use crate::db::{self, TRANSACTION_COLUMNS};
use crate::error::{LedgerError, PersistenceError};
use crate::model::LedgerTransaction;
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

// ============================================================================
// OPERATIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerOp {
    Create(LedgerTransaction),
    /// Caller pre-populates both links; the store only persists them atomically
    CreateTransfer {
        expense: LedgerTransaction,
        income: LedgerTransaction,
    },
    Delete {
        id: String,
    },
    Unlink {
        first: String,
        second: String,
    },
    /// Steps run in order inside the same storage transaction
    Batch(Vec<LedgerOp>),
}

impl LedgerOp {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerOp::Create(_) => "create",
            LedgerOp::CreateTransfer { .. } => "create_transfer",
            LedgerOp::Delete { .. } => "delete",
            LedgerOp::Unlink { .. } => "unlink",
            LedgerOp::Batch(_) => "batch",
        }
    }
}

/// Shape checks every stored record must pass
pub fn check_record(tx: &LedgerTransaction) -> Result<(), PersistenceError> {
    if tx.id.trim().is_empty() {
        return Err(PersistenceError::InvalidRecord("empty id".to_string()));
    }
    if tx.wallet_id.trim().is_empty() {
        return Err(PersistenceError::InvalidRecord(format!("{} has no wallet", tx.id)));
    }
    if !tx.amount.is_finite() {
        return Err(PersistenceError::InvalidRecord(format!("{} has a non-finite amount", tx.id)));
    }
    if tx.related_transaction_id.as_deref() == Some(tx.id.as_str()) {
        return Err(PersistenceError::InvalidRecord(format!("{} links to itself", tx.id)));
    }
    Ok(())
}

/// Everything that can be rejected before touching storage
fn precheck(op: &LedgerOp) -> Result<(), PersistenceError> {
    match op {
        LedgerOp::Create(tx) => check_record(tx),
        LedgerOp::CreateTransfer { expense, income } => {
            check_record(expense)?;
            check_record(income)?;
            check_transfer_pair(expense, income)
        }
        LedgerOp::Delete { .. } | LedgerOp::Unlink { .. } => Ok(()),
        LedgerOp::Batch(steps) => steps.iter().try_for_each(precheck),
    }
}

/// Reject a transfer pair that would not satisfy the pairing invariant
pub fn check_transfer_pair(
    expense: &LedgerTransaction,
    income: &LedgerTransaction,
) -> Result<(), PersistenceError> {
    let broken = |reason: &str| Err(PersistenceError::BrokenPair(reason.to_string()));

    if expense.id.is_empty() || income.id.is_empty() || expense.id == income.id {
        return broken("legs need two distinct, non-empty ids");
    }
    if !expense.links_to(income) || !income.links_to(expense) {
        return broken("legs must reference each other");
    }
    if !(expense.amount < 0.0 && income.amount > 0.0) {
        return broken("expense leg must be negative and income leg positive");
    }
    if (expense.amount + income.amount).abs() > f64::EPSILON * income.amount.abs().max(1.0) {
        return broken("legs must have equal magnitude");
    }
    if expense.date != income.date || expense.description != income.description {
        return broken("legs must share date and description");
    }
    Ok(())
}

// ============================================================================
// STORE TRAIT
// ============================================================================

pub trait LedgerStore: Send + Sync {
    /// Apply one operation atomically: it either fully happens or not at all
    fn apply(&self, op: LedgerOp) -> Result<(), PersistenceError>;

    /// Missing id is `Ok(None)`, not an error
    fn get_by_id(&self, id: &str) -> Result<Option<LedgerTransaction>, PersistenceError>;

    /// Inclusive range, newest first
    fn list_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerTransaction>, PersistenceError>;

    fn create(&self, tx: LedgerTransaction) -> Result<(), PersistenceError> {
        self.apply(LedgerOp::Create(tx))
    }

    fn create_transfer(
        &self,
        expense: LedgerTransaction,
        income: LedgerTransaction,
    ) -> Result<(), PersistenceError> {
        self.apply(LedgerOp::CreateTransfer { expense, income })
    }

    fn delete(&self, id: &str) -> Result<(), PersistenceError> {
        self.apply(LedgerOp::Delete { id: id.to_string() })
    }

    fn unlink(&self, first: &str, second: &str) -> Result<(), PersistenceError> {
        self.apply(LedgerOp::Unlink {
            first: first.to_string(),
            second: second.to_string(),
        })
    }
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    pub fn new(conn: Connection) -> Result<Self, PersistenceError> {
        db::setup_database(&conn)?;
        Ok(SqliteLedger {
            conn: Mutex::new(conn),
        })
    }

    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        let conn = db::open_ledger_database(path)?;
        Ok(SqliteLedger {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, PersistenceError> {
        Self::new(Connection::open_in_memory()?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.conn.lock().map_err(|_| PersistenceError::Poisoned)
    }
}

fn exists(conn: &Connection, id: &str) -> Result<bool, PersistenceError> {
    let found = conn
        .query_row("SELECT 1 FROM transactions WHERE id = ?1", [id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

fn clear_link(conn: &Connection, id: &str) -> Result<(), PersistenceError> {
    conn.execute(
        "UPDATE transactions SET related_transaction_id = NULL WHERE id = ?1",
        [id],
    )?;
    Ok(())
}

fn delete_with_unlink(conn: &Connection, id: &str) -> Result<(), PersistenceError> {
    let related: Option<Option<String>> = conn
        .query_row(
            "SELECT related_transaction_id FROM transactions WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .optional()?;

    let Some(related) = related else {
        debug!(id, "delete of missing transaction is a no-op");
        return Ok(());
    };

    if let Some(counterpart) = &related {
        clear_link(conn, counterpart)?;
    }
    // Anything else still pointing here would dangle after the delete
    conn.execute(
        "UPDATE transactions SET related_transaction_id = NULL WHERE related_transaction_id = ?1",
        [id],
    )?;
    conn.execute("DELETE FROM transactions WHERE id = ?1", [id])?;

    info!(id, counterpart = related.as_deref().unwrap_or(""), "transaction deleted");
    Ok(())
}

/// One step against an open transaction; the caller commits or rolls back
fn run_op(conn: &Connection, op: &LedgerOp) -> Result<(), PersistenceError> {
    match op {
        LedgerOp::Create(record) => {
            if let Some(related) = &record.related_transaction_id {
                if !exists(conn, related)? {
                    return Err(PersistenceError::DanglingLink {
                        id: record.id.clone(),
                        related: related.clone(),
                    });
                }
            }
            db::insert_transaction(conn, record)?;
        }
        LedgerOp::CreateTransfer { expense, income } => {
            db::insert_transaction(conn, expense)?;
            db::insert_transaction(conn, income)?;
        }
        LedgerOp::Delete { id } => delete_with_unlink(conn, id)?,
        LedgerOp::Unlink { first, second } => {
            clear_link(conn, first)?;
            clear_link(conn, second)?;
        }
        LedgerOp::Batch(steps) => {
            for step in steps {
                run_op(conn, step)?;
            }
        }
    }
    Ok(())
}

impl LedgerStore for SqliteLedger {
    fn apply(&self, op: LedgerOp) -> Result<(), PersistenceError> {
        precheck(&op)?;

        let mut conn = self.lock()?;
        // IMMEDIATE takes the write lock up front so read-then-write steps in
        // Delete cannot interleave with another writer
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Dropping `tx` on error rolls every step back
        run_op(&tx, &op)?;

        tx.commit()?;
        debug!(op = op.name(), "ledger operation committed");
        Ok(())
    }

    fn get_by_id(&self, id: &str) -> Result<Option<LedgerTransaction>, PersistenceError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM transactions WHERE id = ?1", TRANSACTION_COLUMNS);
        let tx = conn.query_row(&sql, [id], db::row_to_transaction).optional()?;
        Ok(tx)
    }

    fn list_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerTransaction>, PersistenceError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM transactions
             WHERE date >= ?1 AND date <= ?2
             ORDER BY date DESC",
            TRANSACTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let transactions = stmt
            .query_map(
                params![db::format_date(&start), db::format_date(&end)],
                db::row_to_transaction,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(transactions)
    }
}

// ============================================================================
// IN-MEMORY STORE (test double with the same atomic contract)
// ============================================================================

/// Operations run against a staged copy that only replaces the live map once
/// every step and the link check succeeded.
#[derive(Default)]
pub struct MemoryLedger {
    records: Mutex<BTreeMap<String, LedgerTransaction>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(
        staged: &mut BTreeMap<String, LedgerTransaction>,
        record: &LedgerTransaction,
    ) -> Result<(), PersistenceError> {
        if staged.contains_key(&record.id) {
            return Err(PersistenceError::Duplicate(record.id.clone()));
        }
        staged.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn clear_link(staged: &mut BTreeMap<String, LedgerTransaction>, id: &str) {
        if let Some(record) = staged.get_mut(id) {
            record.related_transaction_id = None;
        }
    }

    fn stage(
        staged: &mut BTreeMap<String, LedgerTransaction>,
        op: &LedgerOp,
    ) -> Result<(), PersistenceError> {
        match op {
            LedgerOp::Create(record) => Self::insert(staged, record),
            LedgerOp::CreateTransfer { expense, income } => {
                Self::insert(staged, expense)?;
                Self::insert(staged, income)
            }
            LedgerOp::Delete { id } => {
                let Some(target) = staged.get(id).cloned() else {
                    return Ok(());
                };
                if let Some(counterpart) = &target.related_transaction_id {
                    Self::clear_link(staged, counterpart);
                }
                for record in staged.values_mut() {
                    if record.related_transaction_id.as_deref() == Some(id.as_str()) {
                        record.related_transaction_id = None;
                    }
                }
                staged.remove(id);
                Ok(())
            }
            LedgerOp::Unlink { first, second } => {
                Self::clear_link(staged, first);
                Self::clear_link(staged, second);
                Ok(())
            }
            LedgerOp::Batch(steps) => steps.iter().try_for_each(|step| Self::stage(staged, step)),
        }
    }

    /// Commit-time check equivalent to the SQLite deferred foreign key
    fn verify_links(staged: &BTreeMap<String, LedgerTransaction>) -> Result<(), PersistenceError> {
        for record in staged.values() {
            if let Some(related) = &record.related_transaction_id {
                if !staged.contains_key(related) {
                    return Err(PersistenceError::DanglingLink {
                        id: record.id.clone(),
                        related: related.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl LedgerStore for MemoryLedger {
    fn apply(&self, op: LedgerOp) -> Result<(), PersistenceError> {
        precheck(&op)?;

        let mut live = self.records.lock().map_err(|_| PersistenceError::Poisoned)?;
        let mut staged = live.clone();

        Self::stage(&mut staged, &op)?;
        Self::verify_links(&staged)?;

        *live = staged;
        Ok(())
    }

    fn get_by_id(&self, id: &str) -> Result<Option<LedgerTransaction>, PersistenceError> {
        let live = self.records.lock().map_err(|_| PersistenceError::Poisoned)?;
        Ok(live.get(id).cloned())
    }

    fn list_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerTransaction>, PersistenceError> {
        let live = self.records.lock().map_err(|_| PersistenceError::Poisoned)?;
        let mut found: Vec<LedgerTransaction> = live
            .values()
            .filter(|tx| tx.date >= start && tx.date <= end)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(found)
    }
}

// ============================================================================
// TRANSFER SERVICE
// ============================================================================

/// Builds both legs of a user-initiated transfer and persists them as a pair
pub struct TransferService {
    store: Arc<dyn LedgerStore>,
}

impl TransferService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        TransferService { store }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn create_transfer(
        &self,
        from_wallet_id: &str,
        to_wallet_id: &str,
        amount: f64,
        date: DateTime<Utc>,
        notes: &str,
    ) -> Result<(LedgerTransaction, LedgerTransaction), LedgerError> {
        let from = from_wallet_id.trim();
        let to = to_wallet_id.trim();

        if from.is_empty() || to.is_empty() {
            return Err(LedgerError::InvalidInput("both wallet ids are required".to_string()));
        }
        if from == to {
            return Err(LedgerError::InvalidInput(
                "cannot transfer within the same wallet".to_string(),
            ));
        }
        if !amount.is_finite() || amount <= 0.0 {
            return Err(LedgerError::InvalidInput(format!(
                "transfer amount must be positive, got {}",
                amount
            )));
        }

        // The ledger keeps millisecond precision; match it so the returned legs
        // equal what a later read gives back
        let date = date.trunc_subsecs(3);

        let expense_id = uuid::Uuid::new_v4().to_string();
        let income_id = uuid::Uuid::new_v4().to_string();

        let expense = LedgerTransaction {
            id: expense_id.clone(),
            amount: -amount,
            description: notes.to_string(),
            date,
            entry_type: "expense".to_string(),
            wallet_id: from.to_string(),
            jar_id: None,
            related_transaction_id: Some(income_id.clone()),
        };

        let income = LedgerTransaction {
            id: income_id,
            amount,
            description: notes.to_string(),
            date,
            entry_type: "income".to_string(),
            wallet_id: to.to_string(),
            jar_id: None,
            related_transaction_id: Some(expense_id),
        };

        self.store.create_transfer(expense.clone(), income.clone())?;

        info!(
            from = %expense.wallet_id,
            to = %income.wallet_id,
            amount,
            expense_id = %expense.id,
            income_id = %income.id,
            "transfer created"
        );

        Ok((expense, income))
    }
}

// ============================================================================
// TESTS
// ============================================================================
