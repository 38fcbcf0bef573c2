// 📐 Source Schema Candidates
// The legacy app changed table and column names across versions. Instead of
// guessing, every known layout is listed here as a named candidate, tried in
// priority order; the first whose required columns all exist wins.

use crate::model::TxKind;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

// ============================================================================
// CANDIDATES (logical field -> physical column)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountSchema {
    pub label: &'static str,
    pub table: &'static str,
    pub id: &'static str,
    pub name: &'static str,
    pub currency: Option<&'static str>,
    pub balance: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategorySchema {
    pub label: &'static str,
    pub table: &'static str,
    pub id: &'static str,
    pub name: &'static str,
    pub kind: Option<&'static str>,
    pub parent: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionSchema {
    pub label: &'static str,
    pub table: &'static str,
    pub id: &'static str,
    pub date: &'static str,
    pub amount: &'static str,
    pub discriminator: &'static str,
    pub note: Option<&'static str>,
    pub category: Option<&'static str>,
    pub account: Option<&'static str>,
    pub counterpart: Option<&'static str>,
}

/// Current Money Manager backups first, Core Data era layout second
pub const ACCOUNT_CANDIDATES: &[AccountSchema] = &[
    AccountSchema {
        label: "mm-assets",
        table: "ASSETS",
        id: "uid",
        name: "NIC_NAME",
        currency: Some("currencyUid"),
        balance: Some("ZDATA"),
    },
    AccountSchema {
        label: "mm-coredata",
        table: "ZASSET",
        id: "Z_PK",
        name: "ZNICNAME",
        currency: Some("ZCURRENCY"),
        balance: None,
    },
];

pub const CATEGORY_CANDIDATES: &[CategorySchema] = &[
    CategorySchema {
        label: "mm-zcategory",
        table: "ZCATEGORY",
        id: "uid",
        name: "NAME",
        kind: Some("TYPE"),
        parent: Some("pUid"),
    },
    CategorySchema {
        label: "mm-coredata",
        table: "ZCATEGORY",
        id: "Z_PK",
        name: "ZNAME",
        kind: Some("ZTYPE"),
        parent: Some("ZPARENT"),
    },
];

pub const TRANSACTION_CANDIDATES: &[TransactionSchema] = &[
    TransactionSchema {
        label: "mm-inoutcome",
        table: "INOUTCOME",
        id: "uid",
        date: "ZDATE",
        amount: "ZMONEY",
        discriminator: "DO_TYPE",
        note: Some("ZCONTENT"),
        category: Some("categoryUid"),
        account: Some("assetUid"),
        counterpart: Some("toAssetUid"),
    },
    TransactionSchema {
        label: "mm-coredata",
        table: "ZINOUTCOME",
        id: "Z_PK",
        date: "ZDATE",
        amount: "ZMONEY",
        discriminator: "ZDO_TYPE",
        note: Some("ZCONTENT"),
        category: Some("ZCATEGORYUID"),
        account: Some("ZASSETUID"),
        counterpart: Some("ZTOASSETUID"),
    },
];

// ============================================================================
// INTROSPECTION
// ============================================================================

/// Physical columns of one table, compared case-insensitively like SQLite does
#[derive(Debug, Clone, Default)]
pub struct TableColumns {
    columns: HashSet<String>,
}

impl TableColumns {
    pub fn read(conn: &Connection, table: &str) -> rusqlite::Result<TableColumns> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{}\")", table))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .map(|name| name.map(|n| n.to_ascii_lowercase()))
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(TableColumns { columns })
    }

    /// A table that does not exist reports no columns
    pub fn exists(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn has(&self, column: &str) -> bool {
        self.columns.contains(&column.to_ascii_lowercase())
    }

    pub fn has_all(&self, columns: &[&str]) -> bool {
        columns.iter().all(|c| self.has(c))
    }

    /// Keep an optional column only if this file actually has it
    pub fn optional(&self, column: Option<&'static str>) -> Option<&'static str> {
        column.filter(|c| self.has(c))
    }
}

/// Pick the first candidate whose required columns are all present.
///
/// Optional columns the file lacks are dropped from the returned mapping so
/// the extractor reads them as absent instead of failing the query.
pub fn resolve_accounts(conn: &Connection) -> rusqlite::Result<Option<AccountSchema>> {
    for candidate in ACCOUNT_CANDIDATES {
        let cols = TableColumns::read(conn, candidate.table)?;
        if cols.has_all(&[candidate.id, candidate.name]) {
            debug!(candidate = candidate.label, "account schema matched");
            return Ok(Some(AccountSchema {
                currency: cols.optional(candidate.currency),
                balance: cols.optional(candidate.balance),
                ..*candidate
            }));
        }
    }
    Ok(None)
}

pub fn resolve_categories(conn: &Connection) -> rusqlite::Result<Option<CategorySchema>> {
    for candidate in CATEGORY_CANDIDATES {
        let cols = TableColumns::read(conn, candidate.table)?;
        if cols.has_all(&[candidate.id, candidate.name]) {
            debug!(candidate = candidate.label, "category schema matched");
            return Ok(Some(CategorySchema {
                kind: cols.optional(candidate.kind),
                parent: cols.optional(candidate.parent),
                ..*candidate
            }));
        }
    }
    Ok(None)
}

pub fn resolve_transactions(conn: &Connection) -> rusqlite::Result<Option<TransactionSchema>> {
    for candidate in TRANSACTION_CANDIDATES {
        let cols = TableColumns::read(conn, candidate.table)?;
        let required = [
            candidate.id,
            candidate.date,
            candidate.amount,
            candidate.discriminator,
        ];
        if cols.has_all(&required) {
            debug!(candidate = candidate.label, "transaction schema matched");
            return Ok(Some(TransactionSchema {
                note: cols.optional(candidate.note),
                category: cols.optional(candidate.category),
                account: cols.optional(candidate.account),
                counterpart: cols.optional(candidate.counterpart),
                ..*candidate
            }));
        }
    }
    Ok(None)
}

// ============================================================================
// DISCRIMINATOR TABLE
// ============================================================================

/// Maps the raw transaction-kind discriminator to a `TxKind`.
///
/// The legacy encoding is unverified: "2" has meant expense in one app
/// revision and transfer in another. The default follows the latest observed
/// mapping; deployments can load a corrected table from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscriminatorMap {
    /// Evaluated in order, first exact match wins
    pub entries: Vec<(String, TxKind)>,
    /// Used for unknown or absent values
    pub fallback: TxKind,
}

impl DiscriminatorMap {
    pub fn classify(&self, raw: Option<&str>) -> TxKind {
        let Some(value) = raw.map(str::trim) else {
            return self.fallback;
        };

        self.entries
            .iter()
            .find(|(code, _)| code == value)
            .map(|(_, kind)| *kind)
            .unwrap_or(self.fallback)
    }

    pub fn from_json(json: &str) -> serde_json::Result<DiscriminatorMap> {
        serde_json::from_str(json)
    }
}

impl Default for DiscriminatorMap {
    fn default() -> Self {
        DiscriminatorMap {
            entries: vec![
                ("1".to_string(), TxKind::Income),
                ("3".to_string(), TxKind::Transfer),
                ("2".to_string(), TxKind::Transfer),
                ("0".to_string(), TxKind::Expense),
            ],
            fallback: TxKind::Expense,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_discriminator_mapping() {
        let map = DiscriminatorMap::default();

        assert_eq!(map.classify(Some("1")), TxKind::Income);
        assert_eq!(map.classify(Some("3")), TxKind::Transfer);
        assert_eq!(map.classify(Some("2")), TxKind::Transfer);
        assert_eq!(map.classify(Some("0")), TxKind::Expense);
        assert_eq!(map.classify(Some("7")), TxKind::Expense);
        assert_eq!(map.classify(Some("")), TxKind::Expense);
        assert_eq!(map.classify(None), TxKind::Expense);
        assert_eq!(map.classify(Some(" 1 ")), TxKind::Income);
    }

    #[test]
    fn test_discriminator_map_from_json() {
        let map = DiscriminatorMap::from_json(
            r#"{"entries": [["1", "income"], ["2", "expense"]], "fallback": "expense"}"#,
        )
        .unwrap();

        assert_eq!(map.classify(Some("2")), TxKind::Expense);
        assert_eq!(map.classify(Some("3")), TxKind::Expense);
    }

    #[test]
    fn test_resolve_prefers_first_candidate() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE INOUTCOME (uid TEXT, ZDATE TEXT, ZMONEY REAL, DO_TYPE TEXT);
             CREATE TABLE ZINOUTCOME (Z_PK INTEGER, ZDATE TEXT, ZMONEY REAL, ZDO_TYPE TEXT);",
        )
        .unwrap();

        let schema = resolve_transactions(&conn).unwrap().unwrap();
        assert_eq!(schema.label, "mm-inoutcome");
        // Optional columns absent from the file are dropped
        assert_eq!(schema.note, None);
        assert_eq!(schema.counterpart, None);
    }

    #[test]
    fn test_resolve_falls_back_to_coredata_layout() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE ZINOUTCOME (Z_PK INTEGER, ZDATE TEXT, ZMONEY REAL, ZDO_TYPE TEXT, ZCONTENT TEXT);",
        )
        .unwrap();

        let schema = resolve_transactions(&conn).unwrap().unwrap();
        assert_eq!(schema.label, "mm-coredata");
        assert_eq!(schema.note, Some("ZCONTENT"));
    }

    #[test]
    fn test_column_match_is_case_insensitive() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE zcategory (UID TEXT, name TEXT);").unwrap();

        let schema = resolve_categories(&conn).unwrap().unwrap();
        assert_eq!(schema.label, "mm-zcategory");
        assert_eq!(schema.kind, None);
    }

    #[test]
    fn test_missing_table_resolves_to_none() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(resolve_accounts(&conn).unwrap().is_none());
        assert!(resolve_transactions(&conn).unwrap().is_none());
    }
}
