use crate::error::PersistenceError;
use crate::model::LedgerTransaction;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Column list shared by every ledger SELECT, in `row_to_transaction` order
pub const TRANSACTION_COLUMNS: &str =
    "id, amount, description, date, type, wallet_id, jar_id, related_transaction_id";

/// Open (or create) the ledger database and make sure the schema exists
pub fn open_ledger_database(path: &Path) -> Result<Connection, PersistenceError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    setup_database(&conn)?;
    info!(path = %path.display(), "ledger database ready");
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<(), PersistenceError> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    // The self-referencing link is only trustworthy if SQLite enforces it
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Transactions Table
    // related_transaction_id is checked at COMMIT, so a transfer pair can be
    // inserted leg by leg inside one transaction.
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            amount REAL NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            date TEXT NOT NULL,
            type TEXT NOT NULL,
            wallet_id TEXT NOT NULL,
            jar_id TEXT,
            related_transaction_id TEXT
                REFERENCES transactions(id) DEFERRABLE INITIALLY DEFERRED,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_related_transaction_id ON transactions(related_transaction_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_date ON transactions(date)",
        [],
    )?;

    Ok(())
}

/// Dates are stored as fixed-width RFC 3339 UTC text so string order is time order
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn insert_transaction(conn: &Connection, tx: &LedgerTransaction) -> Result<(), PersistenceError> {
    let result = conn.execute(
        "INSERT INTO transactions (
            id, amount, description, date, type, wallet_id, jar_id, related_transaction_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            tx.id,
            tx.amount,
            tx.description,
            format_date(&tx.date),
            tx.entry_type,
            tx.wallet_id,
            tx.jar_id,
            tx.related_transaction_id,
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            Err(PersistenceError::Duplicate(tx.id.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Map a row selected with `TRANSACTION_COLUMNS`
pub fn row_to_transaction(row: &Row<'_>) -> rusqlite::Result<LedgerTransaction> {
    let date_str: String = row.get(3)?;
    let date = parse_date(&date_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("invalid stored date: {}", date_str).into(),
        )
    })?;

    Ok(LedgerTransaction {
        id: row.get(0)?,
        amount: row.get(1)?,
        description: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        date,
        entry_type: row.get(4)?,
        wallet_id: row.get(5)?,
        jar_id: row.get(6)?,
        related_transaction_id: row.get(7)?,
    })
}

pub fn verify_count(conn: &Connection) -> Result<i64, PersistenceError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;

    Ok(count)
}
