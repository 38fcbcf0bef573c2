// End-to-end: legacy backup + report export → reconciliation → ledger import,
// then user transfers against the same on-disk ledger.

use chrono::{TimeZone, Utc};
use ledger_bridge::{
    CommitOutcome, DiscriminatorMap, LedgerStore, MigrationService, MigrationStatus,
    ReconciliationEngine, ReportFilter, ReportService, SqliteLedger, TransferService, TxKind,
};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

const BACKUP_SQL: &str = "
    CREATE TABLE ASSETS (uid TEXT PRIMARY KEY, NIC_NAME TEXT);
    CREATE TABLE ZCATEGORY (uid TEXT PRIMARY KEY, NAME TEXT, TYPE INTEGER);
    CREATE TABLE INOUTCOME (
        uid TEXT PRIMARY KEY, ZDATE TEXT, ZMONEY REAL, DO_TYPE TEXT,
        ZCONTENT TEXT, categoryUid TEXT, assetUid TEXT, toAssetUid TEXT
    );
    INSERT INTO ASSETS VALUES ('acc1', 'Cash Wallet');
    INSERT INTO ASSETS VALUES ('acc2', 'Bank Account');
    INSERT INTO ZCATEGORY VALUES ('cat1', 'Food', 0);
    INSERT INTO ZCATEGORY VALUES ('cat2', 'Salary', 1);
    INSERT INTO ZCATEGORY VALUES ('cat3', 'Transport', 0);
    INSERT INTO INOUTCOME VALUES ('tx1', '2025-01-15 12:30:00', 100.50, '0', 'Lunch', 'cat1', 'acc1', NULL);
    INSERT INTO INOUTCOME VALUES ('tx2', '2025-01-20', 50000.00, '1', 'Monthly Salary', 'cat2', 'acc2', NULL);
    INSERT INTO INOUTCOME VALUES ('tx3', '2025-01-22', 35.00, '0', 'Bus fare', 'cat3', 'acc1', NULL);
    INSERT INTO INOUTCOME VALUES ('tx4', '2025-01-25', 5000.00, '3', 'To savings', NULL, 'acc1', 'acc2');";

/// The export leaves transfers out, so it has one row fewer than the backup
const REPORT_HTML: &str = r#"<html><body><table>
    <tr><td colspan="5">Money Manager export</td></tr>
    <tr><th>Date</th><th>Account</th><th>Category</th><th>Note</th><th>Amount</th></tr>
    <tr><td>2025-01-15</td><td>Cash Wallet</td><td>Food</td><td>Lunch</td><td>-100.50</td></tr>
    <tr><td>2025-01-20</td><td>Bank Account</td><td>Salary</td><td>Monthly Salary</td><td>50,000.00</td></tr>
    <tr><td>2025-01-22</td><td>Cash Wallet</td><td>Transport</td><td>Bus fare</td><td>-35.00</td></tr>
</table></body></html>"#;

fn write_backup(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("backup.mmbak");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(BACKUP_SQL).unwrap();
    path
}

fn write_report(dir: &TempDir, html: &str) -> PathBuf {
    let path = dir.path().join("report.xls");
    std::fs::write(&path, html).unwrap();
    path
}

fn service(scratch: &TempDir) -> MigrationService {
    MigrationService::new(ReconciliationEngine::new(), DiscriminatorMap::default(), scratch.path())
}

#[test]
fn test_full_pipeline_preview_then_commit() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let backup = std::fs::read(write_backup(&inputs)).unwrap();

    let migrations = service(&scratch);
    let response = migrations.process_upload(&backup, REPORT_HTML.as_bytes()).unwrap();

    assert_eq!(response.status, MigrationStatus::Preview);
    let job_id = response.job_id.clone().unwrap();

    let job = migrations.job(&job_id).unwrap();
    assert!(job.validation.is_valid);
    assert_eq!(job.validation.primary_stats.transactions, 4);
    assert_eq!(job.validation.secondary_stats.transactions, 3);
    assert_eq!(job.validation.warnings, vec!["Transaction count mismatch: DB=4, XLS=3 (Diff: 1)"]);
    assert!(job.validation.diff_balance.abs() < 1e-9);

    let ledger_dir = TempDir::new().unwrap();
    let store: Arc<dyn LedgerStore> = Arc::new(SqliteLedger::open(&ledger_dir.path().join("ledger.db")).unwrap());

    // Three singles plus the transfer as two legs
    assert_eq!(migrations.commit(&job_id, store.as_ref()).unwrap(), CommitOutcome::Committed(5));

    let out_leg = store.get_by_id("tx4").unwrap().unwrap();
    let in_leg = store.get_by_id("tx4:in").unwrap().unwrap();
    assert_eq!(out_leg.wallet_id, "acc1");
    assert_eq!(in_leg.wallet_id, "acc2");
    assert!(out_leg.links_to(&in_leg) && in_leg.links_to(&out_leg));
    assert_eq!(out_leg.amount + in_leg.amount, 0.0);

    // The committed job is no longer pending
    assert!(migrations.pending_jobs().is_empty());

    // Scratch copies of both uploads are gone
    assert!(std::fs::read_dir(scratch.path()).unwrap().next().is_none());
}

#[test]
fn test_full_pipeline_reports_discrepancies() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let backup = write_backup(&inputs);
    let report = write_report(&inputs, &REPORT_HTML.replace("-35.00", "-45.00"));

    let migrations = service(&scratch);
    let response = migrations.process_files(&backup, &report).unwrap();

    assert_eq!(response.status, MigrationStatus::Error);
    assert_eq!(response.message, "Validation failed. Discrepancies found.");

    let job = migrations.job(response.job_id.as_deref().unwrap()).unwrap();
    assert_eq!(job.validation.errors.len(), 1);
    assert!(job.validation.errors[0].starts_with("Total Expense mismatch: DB=135.50, XLS=145.50"));
    assert!((job.validation.diff_balance - 10.0).abs() < 1e-9);
}

#[test]
fn test_alternate_discriminator_changes_reconciliation() {
    let inputs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let backup = write_backup(&inputs);
    let report = write_report(&inputs, REPORT_HTML);

    // Treat "3" as an expense: the savings move now counts toward expenses
    let mut table = DiscriminatorMap::default();
    table.entries.retain(|(code, _)| code != "3");
    table.entries.push(("3".to_string(), TxKind::Expense));

    let migrations = MigrationService::new(ReconciliationEngine::new(), table, scratch.path());
    let response = migrations.process_files(&backup, &report).unwrap();

    assert_eq!(response.status, MigrationStatus::Error);
    let job = migrations.job(response.job_id.as_deref().unwrap()).unwrap();
    assert_eq!(job.validation.primary_stats.total_expense, 5135.50);
}

#[test]
fn test_transfer_scenario_on_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.db");
    let store: Arc<dyn LedgerStore> = Arc::new(SqliteLedger::open(&path).unwrap());
    let transfers = TransferService::new(store.clone());
    let date = Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).unwrap();

    let (expense, income) = transfers.create_transfer("w1", "w2", 100.0, date, "Rent split").unwrap();

    // Reopen to read back what actually hit the disk
    drop(transfers);
    drop(store);
    let store: Arc<dyn LedgerStore> = Arc::new(SqliteLedger::open(&path).unwrap());

    let saved_expense = store.get_by_id(&expense.id).unwrap().unwrap();
    let saved_income = store.get_by_id(&income.id).unwrap().unwrap();
    assert_eq!((saved_expense.amount, saved_expense.wallet_id.as_str()), (-100.0, "w1"));
    assert_eq!((saved_income.amount, saved_income.wallet_id.as_str()), (100.0, "w2"));
    assert!(saved_expense.links_to(&saved_income));

    store.delete(&expense.id).unwrap();
    store.delete(&expense.id).unwrap();
    assert!(store.get_by_id(&expense.id).unwrap().is_none());
    assert_eq!(store.get_by_id(&income.id).unwrap().unwrap().related_transaction_id, None);

    let report = ReportService::new(store.clone())
        .generate(ReportFilter::current_month(date).with_wallets(vec!["w2".to_string()]))
        .unwrap();
    assert_eq!(report.transaction_count, 1);
    assert_eq!(report.total_amount, 100.0);
}
