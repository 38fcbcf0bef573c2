// 📊 Reports - Filtered views over the ledger
//
// A report is every ledger record in [start, end] that matches the jar filter
// (if any) AND the wallet filter (if any). An empty filter list means "all".
// Query-string helpers live here too so the HTTP layer stays thin.

use crate::error::ReportError;
use crate::ledger::LedgerStore;
use crate::model::LedgerTransaction;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportFilter {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub jar_ids: Vec<String>,
    #[serde(default)]
    pub wallet_ids: Vec<String>,
}

impl ReportFilter {
    pub fn new(start_date: DateTime<Utc>, end_date: DateTime<Utc>) -> Self {
        ReportFilter {
            start_date,
            end_date,
            jar_ids: Vec::new(),
            wallet_ids: Vec::new(),
        }
    }

    /// First instant of `now`'s month through its last representable instant
    pub fn current_month(now: DateTime<Utc>) -> Self {
        let start = Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(now);
        let next = if now.month() == 12 {
            Utc.with_ymd_and_hms(now.year() + 1, 1, 1, 0, 0, 0)
        } else {
            Utc.with_ymd_and_hms(now.year(), now.month() + 1, 1, 0, 0, 0)
        };
        let end = next.single().map(|n| n - Duration::nanoseconds(1)).unwrap_or(now);

        ReportFilter::new(start, end)
    }

    pub fn with_jars(mut self, jar_ids: Vec<String>) -> Self {
        self.jar_ids = jar_ids;
        self
    }

    pub fn with_wallets(mut self, wallet_ids: Vec<String>) -> Self {
        self.wallet_ids = wallet_ids;
        self
    }

    pub fn matches(&self, tx: &LedgerTransaction) -> bool {
        let jar_match = self.jar_ids.is_empty()
            || tx
                .jar_id
                .as_deref()
                .is_some_and(|jar| !jar.is_empty() && self.jar_ids.iter().any(|id| id == jar));
        let wallet_match = self.wallet_ids.is_empty() || self.wallet_ids.contains(&tx.wallet_id);

        jar_match && wallet_match
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub total_amount: f64,
    pub transaction_count: usize,
    pub transactions: Vec<LedgerTransaction>,
    pub filter_used: ReportFilter,
}

// ============================================================================
// SERVICE
// ============================================================================

pub struct ReportService {
    store: Arc<dyn LedgerStore>,
}

impl ReportService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        ReportService { store }
    }

    pub fn generate(&self, filter: ReportFilter) -> Result<Report, ReportError> {
        if filter.end_date < filter.start_date {
            return Err(ReportError::InvertedRange);
        }

        let in_range = self.store.list_by_date_range(filter.start_date, filter.end_date)?;
        let scanned = in_range.len();

        let transactions: Vec<LedgerTransaction> =
            in_range.into_iter().filter(|tx| filter.matches(tx)).collect();
        let total_amount = transactions.iter().map(|tx| tx.amount).sum();

        debug!(scanned, kept = transactions.len(), "report generated");

        Ok(Report {
            total_amount,
            transaction_count: transactions.len(),
            transactions,
            filter_used: filter,
        })
    }
}

// ============================================================================
// QUERY PARAMETERS
// ============================================================================

/// `YYYY-MM-DD` or RFC 3339. A bare end date covers the whole day.
pub fn parse_date_param(
    field: &'static str,
    value: Option<&str>,
    default: DateTime<Utc>,
    is_end: bool,
) -> Result<DateTime<Utc>, ReportError> {
    let value = value.map(str::trim).unwrap_or("");
    if value.is_empty() {
        return Ok(default);
    }

    if let Ok(day) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let start = day
            .and_hms_opt(0, 0, 0)
            .ok_or(ReportError::InvalidDate { field })?
            .and_utc();
        return Ok(if is_end {
            start + Duration::days(1) - Duration::nanoseconds(1)
        } else {
            start
        });
    }

    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ReportError::InvalidDate { field })
}

/// Comma-separated ids, blanks dropped, first-seen order, no repeats
pub fn split_ids(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty() && seen.insert(*id))
        .map(str::to_string)
        .collect()
}

/// First non-blank value among `keys` wins (primary name, then aliases)
pub fn ids_param(lookup: impl Fn(&str) -> Option<String>, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .filter_map(|key| lookup(key))
        .find(|raw| !raw.trim().is_empty())
        .map(|raw| split_ids(&raw))
        .unwrap_or_default()
}

// ============================================================================
// TESTS
// ============================================================================
