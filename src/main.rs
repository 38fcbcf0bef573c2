use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::env;
use std::path::Path;
use std::sync::Arc;

use ledger_bridge::logging::init_tracing;
use ledger_bridge::report::parse_date_param;
use ledger_bridge::{
    AppConfig, CommitOutcome, LedgerStore, MigrationService, MigrationStatus, ReportFilter,
    ReportService, SqliteLedger, TransferService,
};

const USAGE: &str = "Usage:
  ledger-bridge validate <backup.mmbak> <report.xls>
  ledger-bridge import <backup.mmbak> <report.xls>
  ledger-bridge init-db
  ledger-bridge transfer <from_wallet> <to_wallet> <amount> [notes]
  ledger-bridge delete <transaction_id>
  ledger-bridge report [start_date] [end_date]";

fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let config = AppConfig::from_env().context("Failed to load configuration")?;

    match args.get(1).map(String::as_str) {
        Some("validate") if args.len() == 4 => run_validate(&config, &args[2], &args[3]),
        Some("import") if args.len() == 4 => run_import(&config, &args[2], &args[3]),
        Some("init-db") => run_init_db(&config),
        Some("transfer") if args.len() == 5 || args.len() == 6 => {
            let notes = args.get(5).map(String::as_str).unwrap_or("");
            run_transfer(&config, &args[2], &args[3], &args[4], notes)
        }
        Some("delete") if args.len() == 3 => run_delete(&config, &args[2]),
        Some("report") if args.len() <= 4 => {
            run_report(&config, args.get(2).map(String::as_str), args.get(3).map(String::as_str))
        }
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

fn open_store(config: &AppConfig) -> Result<Arc<dyn LedgerStore>> {
    let store = SqliteLedger::open(&config.database_path)
        .with_context(|| format!("Failed to open ledger {}", config.database_path.display()))?;
    Ok(Arc::new(store))
}

fn run_validate(config: &AppConfig, mmbak: &str, xls: &str) -> Result<()> {
    let service = MigrationService::from_config(config);
    let response = service
        .process_files(Path::new(mmbak), Path::new(xls))
        .context("Migration run failed")?;

    // Extraction failures carry no job, so print the response itself
    match response.job_id.as_deref().and_then(|id| service.job(id)) {
        Some(job) => println!("{}", serde_json::to_string_pretty(&job.validation)?),
        None => println!("{}", serde_json::to_string_pretty(&response)?),
    }

    if response.status == MigrationStatus::Error {
        std::process::exit(1);
    }
    Ok(())
}

fn run_import(config: &AppConfig, mmbak: &str, xls: &str) -> Result<()> {
    println!("📥 Importing {} (checked against {})", mmbak, xls);

    let service = MigrationService::from_config(config);
    let response = service
        .process_files(Path::new(mmbak), Path::new(xls))
        .context("Migration run failed")?;

    let Some(job_id) = response.job_id.as_deref() else {
        bail!("{}", response.message);
    };

    // Committed jobs leave the registry, so read what we report on first
    let Some(job) = service.job(job_id) else {
        bail!("job {} disappeared before commit", job_id);
    };

    let store = open_store(config)?;
    match service.commit(job_id, store.as_ref())? {
        CommitOutcome::Committed(written) => {
            println!("✅ {} ledger records written (job {})", written, job_id);
            for row in &job.preview.undated {
                println!("⚠️  skipped {}: unreadable date {:?}", row.id, row.raw_date);
            }
            for row in &job.preview.unassigned {
                println!("⚠️  skipped {}: {}", row.id, row.reason);
            }
            Ok(())
        }
        CommitOutcome::Rejected => {
            for error in &job.validation.errors {
                eprintln!("❌ {}", error);
            }
            bail!("{}", response.message)
        }
        CommitOutcome::UnknownJob => bail!("job {} disappeared before commit", job_id),
    }
}

fn run_init_db(config: &AppConfig) -> Result<()> {
    open_store(config)?;
    println!("✓ Ledger database ready at {}", config.database_path.display());
    Ok(())
}

fn run_transfer(config: &AppConfig, from: &str, to: &str, amount: &str, notes: &str) -> Result<()> {
    let amount: f64 = amount
        .parse()
        .with_context(|| format!("Invalid amount: {}", amount))?;

    let service = TransferService::new(open_store(config)?);
    let (expense, income) = service.create_transfer(from, to, amount, Utc::now(), notes)?;

    println!("✓ Transfer recorded");
    println!("  {} → {} : {:.2}", expense.wallet_id, income.wallet_id, amount);
    println!("  expense leg {}", expense.id);
    println!("  income leg  {}", income.id);
    Ok(())
}

fn run_delete(config: &AppConfig, id: &str) -> Result<()> {
    let store = open_store(config)?;
    let existing = store.get_by_id(id)?;
    store.delete(id)?;

    match existing {
        Some(tx) => {
            println!("✓ Deleted {}", id);
            if let Some(counterpart) = tx.related_transaction_id {
                println!("  {} is now unlinked", counterpart);
            }
        }
        None => println!("Nothing to delete: {} not found", id),
    }
    Ok(())
}

fn run_report(config: &AppConfig, start: Option<&str>, end: Option<&str>) -> Result<()> {
    let month = ReportFilter::current_month(Utc::now());
    let filter = ReportFilter::new(
        parse_date_param("start_date", start, month.start_date, false)?,
        parse_date_param("end_date", end, month.end_date, true)?,
    );

    let report = ReportService::new(open_store(config)?).generate(filter)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
