// 🗄️ Relational-Source Extractor
// Reads the legacy app's SQLite backup (.mmbak) of unknown schema version.
//
// Structural failures (unreadable file, no known transaction/category layout)
// are fatal. Row-level damage never is: NULLs and junk degrade to "" / 0.0.

use crate::error::ExtractionError;
use crate::model::{AccountDto, CategoryDto, ExtractionResult, TransactionDto, TxKind};
use crate::parser::{SourceExtractor, SourceKind};
use crate::schema::{self, AccountSchema, CategorySchema, DiscriminatorMap, TransactionSchema};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Row};
use std::path::Path;
use tracing::{info, warn};

pub struct RelationalExtractor {
    discriminators: DiscriminatorMap,
}

impl RelationalExtractor {
    pub fn new(discriminators: DiscriminatorMap) -> Self {
        RelationalExtractor { discriminators }
    }

    fn open(file_path: &Path) -> Result<Connection, ExtractionError> {
        if !file_path.is_file() {
            return Err(ExtractionError::open_failed(format!(
                "no such file: {}",
                file_path.display()
            )));
        }

        let conn = Connection::open_with_flags(
            file_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| ExtractionError::open_failed(format!("{}: {}", file_path.display(), e)))?;

        // SQLite opens lazily; the first read is what detects a non-database file
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
            .map_err(|e| ExtractionError::corrupt(format!("{}: {}", file_path.display(), e)))?;

        Ok(conn)
    }

    fn read_accounts(&self, conn: &Connection, schema: &AccountSchema) -> rusqlite::Result<Vec<AccountDto>> {
        let sql = select_sql(
            schema.table,
            &[Some(schema.id), Some(schema.name), schema.currency, schema.balance],
        );
        let mut stmt = conn.prepare(&sql)?;
        let accounts = stmt
            .query_map([], |row| {
                Ok(AccountDto {
                    id: text_at(row, 0)?,
                    name: text_at(row, 1)?,
                    currency: text_at(row, 2)?,
                    balance: number_at(row, 3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    fn read_categories(&self, conn: &Connection, schema: &CategorySchema) -> rusqlite::Result<Vec<CategoryDto>> {
        let sql = select_sql(
            schema.table,
            &[Some(schema.id), Some(schema.name), schema.kind, schema.parent],
        );
        let mut stmt = conn.prepare(&sql)?;
        let categories = stmt
            .query_map([], |row| {
                Ok(CategoryDto {
                    id: text_at(row, 0)?,
                    name: text_at(row, 1)?,
                    kind: number_at(row, 2)? as i64,
                    parent_id: text_at(row, 3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(categories)
    }

    fn read_transactions(
        &self,
        conn: &Connection,
        schema: &TransactionSchema,
    ) -> rusqlite::Result<Vec<TransactionDto>> {
        let sql = select_sql(
            schema.table,
            &[
                Some(schema.id),
                Some(schema.date),
                Some(schema.amount),
                Some(schema.discriminator),
                schema.note,
                schema.category,
                schema.account,
                schema.counterpart,
            ],
        );
        let mut stmt = conn.prepare(&sql)?;
        let transactions = stmt
            .query_map([], |row| {
                let discriminator = optional_text_at(row, 3)?;
                let kind = self.discriminators.classify(discriminator.as_deref());

                let counterpart = if kind.is_transfer() {
                    Some(text_at(row, 7)?).filter(|id| !id.is_empty())
                } else {
                    None
                };

                Ok(TransactionDto {
                    id: text_at(row, 0)?,
                    date: text_at(row, 1)?,
                    amount: number_at(row, 2)?,
                    kind,
                    category_id: text_at(row, 5)?,
                    account_id: text_at(row, 6)?,
                    counterpart_account_id: counterpart,
                    note: text_at(row, 4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(transactions)
    }
}

impl Default for RelationalExtractor {
    fn default() -> Self {
        Self::new(DiscriminatorMap::default())
    }
}

impl SourceExtractor for RelationalExtractor {
    fn extract(&self, file_path: &Path) -> Result<ExtractionResult, ExtractionError> {
        let conn = Self::open(file_path)?;
        let corrupt = |e: rusqlite::Error| ExtractionError::corrupt(e.to_string());

        let tx_schema = schema::resolve_transactions(&conn)
            .map_err(corrupt)?
            .ok_or_else(|| ExtractionError::schema_missing("no known transaction table layout"))?;
        let cat_schema = schema::resolve_categories(&conn)
            .map_err(corrupt)?
            .ok_or_else(|| ExtractionError::schema_missing("no known category table layout"))?;

        // Accounts are optional: an old backup without them is still usable
        let accounts = match schema::resolve_accounts(&conn).map_err(corrupt)? {
            Some(acc_schema) => self.read_accounts(&conn, &acc_schema).map_err(corrupt)?,
            None => {
                warn!(file = %file_path.display(), "no account table found, continuing without accounts");
                Vec::new()
            }
        };
        let categories = self.read_categories(&conn, &cat_schema).map_err(corrupt)?;
        let transactions = self.read_transactions(&conn, &tx_schema).map_err(corrupt)?;

        let undated = transactions.iter().filter(|tx| tx.date.is_empty()).count();
        if undated > 0 {
            warn!(undated, "transactions without a date were kept with an empty date");
        }

        let result = ExtractionResult::new(accounts, categories, transactions);

        info!(
            source = self.source_kind().name(),
            version = self.version(),
            layout = tx_schema.label,
            accounts = result.accounts.len(),
            categories = result.categories.len(),
            transactions = result.transactions.len(),
            transfers = result.count_of(TxKind::Transfer),
            total_income = result.total_income,
            total_expense = result.total_expense,
            "relational source extracted"
        );

        Ok(result)
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::Relational
    }
}

// ============================================================================
// LENIENT ROW ACCESS
// ============================================================================

/// SELECT the given columns in order; absent optional columns become NULL
fn select_sql(table: &str, columns: &[Option<&str>]) -> String {
    let list: Vec<String> = columns
        .iter()
        .map(|c| match c {
            Some(name) => format!("\"{}\"", name),
            None => "NULL".to_string(),
        })
        .collect();
    format!("SELECT {} FROM \"{}\"", list.join(", "), table)
}

fn optional_text_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    })
}

fn text_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    Ok(optional_text_at(row, idx)?.unwrap_or_default())
}

fn number_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<f64> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Integer(i) => i as f64,
        ValueRef::Real(f) if f.is_finite() => f,
        ValueRef::Real(_) => 0.0,
        ValueRef::Text(t) => std::str::from_utf8(t)
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|f| f.is_finite())
            .unwrap_or(0.0),
        ValueRef::Null | ValueRef::Blob(_) => 0.0,
    })
}

// ============================================================================
// TESTS
// ============================================================================
