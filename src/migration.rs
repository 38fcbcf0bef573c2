// 🚚 Migration Orchestrator
//
// One upload = one relational backup + one markup report:
//   stage both to scratch files → extract both in parallel → reconcile →
//   plan the import → register a job → answer {status, message, job_id}.
//
// Unusable content is an answer (status=error), not a failure. Only staging
// I/O or a crashed extractor thread surface as `MigrationError`.
// Scratch files are owned by `NamedTempFile` and vanish on every exit path.
//
// Jobs wait in memory until they are committed, expire, or get pushed out by
// newer uploads once the registry is full.

use crate::config::AppConfig;
use crate::error::{ExtractionError, MigrationError, PersistenceError};
use crate::importer::{plan_import, ImportPreview};
use crate::ledger::LedgerStore;
use crate::model::ExtractionResult;
use crate::parser::{get_extractor, SourceKind};
use crate::reconciliation::{ReconciliationEngine, ValidationResult};
use crate::schema::DiscriminatorMap;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

/// Pending jobs kept before the oldest is dropped
pub const DEFAULT_MAX_PENDING_JOBS: usize = 64;

/// How long an uncommitted job stays available
pub const DEFAULT_JOB_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    /// Both sources agree; the import can be previewed and committed
    Preview,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationResponse {
    pub status: MigrationStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl MigrationResponse {
    fn failed(message: String) -> Self {
        MigrationResponse {
            status: MigrationStatus::Error,
            message,
            job_id: None,
        }
    }
}

/// Everything a finished reconciliation produced, kept for later lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationJob {
    pub job_id: String,
    pub created_at: DateTime<Utc>,
    pub validation: ValidationResult,
    pub preview: ImportPreview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(usize),
    UnknownJob,
    /// The job failed reconciliation and cannot be imported
    Rejected,
}

pub struct MigrationService {
    engine: ReconciliationEngine,
    discriminators: DiscriminatorMap,
    scratch_dir: PathBuf,
    max_pending_jobs: usize,
    job_ttl: Duration,
    jobs: Mutex<HashMap<String, MigrationJob>>,
}

impl MigrationService {
    pub fn new(engine: ReconciliationEngine, discriminators: DiscriminatorMap, scratch_dir: impl Into<PathBuf>) -> Self {
        MigrationService {
            engine,
            discriminators,
            scratch_dir: scratch_dir.into(),
            max_pending_jobs: DEFAULT_MAX_PENDING_JOBS,
            job_ttl: Duration::hours(DEFAULT_JOB_TTL_HOURS),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Override the registry bounds (a limit of 0 is treated as 1)
    pub fn with_job_limits(mut self, max_pending_jobs: usize, job_ttl: Duration) -> Self {
        self.max_pending_jobs = max_pending_jobs.max(1);
        self.job_ttl = job_ttl;
        self
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.engine, config.discriminators.clone(), config.scratch_dir.clone())
    }

    /// Stage two in-memory uploads and run them through `process_files`
    #[instrument(skip_all, fields(relational_bytes = relational.len(), markup_bytes = markup.len()))]
    pub fn process_upload(&self, relational: &[u8], markup: &[u8]) -> Result<MigrationResponse, MigrationError> {
        let relational_file = self.stage(relational, SourceKind::Relational)?;
        let markup_file = self.stage(markup, SourceKind::Markup)?;

        self.process_files(relational_file.path(), markup_file.path())
    }

    pub fn process_files(&self, relational: &Path, markup: &Path) -> Result<MigrationResponse, MigrationError> {
        let (primary, secondary) = self.extract_both(relational, markup)?;

        let primary = match primary {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "database backup rejected");
                return Ok(MigrationResponse::failed(format!("Failed to parse database: {}", e)));
            }
        };
        let secondary = match secondary {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "report export rejected");
                return Ok(MigrationResponse::failed(format!("Failed to parse XLS report: {}", e)));
            }
        };

        info!(
            accounts = primary.accounts.len(),
            categories = primary.categories.len(),
            db_transactions = primary.transactions.len(),
            xls_transactions = secondary.transactions.len(),
            "both sources parsed"
        );

        let validation = self.engine.validate(&primary, &secondary);
        let job_id = uuid::Uuid::new_v4().to_string();

        let (status, message) = if validation.is_valid {
            info!(job_id = %job_id, "{}", validation.summary());
            (MigrationStatus::Preview, "Validation successful")
        } else {
            warn!(job_id = %job_id, errors = ?validation.errors, "{}", validation.summary());
            (MigrationStatus::Error, "Validation failed. Discrepancies found.")
        };

        self.register(MigrationJob {
            job_id: job_id.clone(),
            created_at: Utc::now(),
            validation,
            preview: plan_import(&primary),
        });

        Ok(MigrationResponse {
            status,
            message: message.to_string(),
            job_id: Some(job_id),
        })
    }

    pub fn job(&self, job_id: &str) -> Option<MigrationJob> {
        self.jobs().get(job_id).cloned()
    }

    /// Ids of jobs still waiting in the registry, oldest first
    pub fn pending_jobs(&self) -> Vec<String> {
        let jobs = self.jobs();
        let mut pending: Vec<&MigrationJob> = jobs.values().collect();
        pending.sort_by_key(|job| job.created_at);
        pending.into_iter().map(|job| job.job_id.clone()).collect()
    }

    /// Write a validated job's planned records into the ledger. A committed job
    /// leaves the registry; a failed commit puts it back for a retry.
    pub fn commit(&self, job_id: &str, store: &dyn LedgerStore) -> Result<CommitOutcome, PersistenceError> {
        // Taken out under the lock so two callers cannot commit the same job
        let job = {
            let mut jobs = self.jobs();
            match jobs.remove(job_id) {
                None => return Ok(CommitOutcome::UnknownJob),
                Some(job) if !job.validation.is_valid => {
                    jobs.insert(job.job_id.clone(), job);
                    return Ok(CommitOutcome::Rejected);
                }
                Some(job) => job,
            }
        };

        match job.preview.commit(store) {
            Ok(written) => {
                info!(job_id, written, "migration job committed");
                Ok(CommitOutcome::Committed(written))
            }
            Err(e) => {
                warn!(job_id, error = %e, "migration job commit failed");
                self.jobs().insert(job.job_id.clone(), job);
                Err(e)
            }
        }
    }

    /// Store a finished job, first dropping expired ones and, when full, the oldest
    fn register(&self, job: MigrationJob) {
        let mut jobs = self.jobs();

        let cutoff = job.created_at - self.job_ttl;
        jobs.retain(|_, existing| existing.created_at >= cutoff);

        while jobs.len() >= self.max_pending_jobs {
            let oldest = jobs
                .values()
                .min_by_key(|existing| existing.created_at)
                .map(|existing| existing.job_id.clone());
            let Some(oldest) = oldest else { break };
            debug!(job_id = %oldest, "job registry full, dropping oldest job");
            jobs.remove(&oldest);
        }

        jobs.insert(job.job_id.clone(), job);
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, MigrationJob>> {
        // The registry holds plain data; a panic mid-insert cannot corrupt it
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stage(&self, bytes: &[u8], kind: SourceKind) -> Result<NamedTempFile, MigrationError> {
        let mut file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&format!(".{}", kind.extension()))
            .tempfile_in(&self.scratch_dir)?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(file)
    }

    /// Both extractors share nothing mutable, so they run side by side
    #[allow(clippy::type_complexity)]
    fn extract_both(
        &self,
        relational: &Path,
        markup: &Path,
    ) -> Result<
        (
            Result<ExtractionResult, ExtractionError>,
            Result<ExtractionResult, ExtractionError>,
        ),
        MigrationError,
    > {
        let db_extractor = get_extractor(SourceKind::Relational, &self.discriminators);
        let xls_extractor = get_extractor(SourceKind::Markup, &self.discriminators);

        std::thread::scope(|scope| {
            let db = scope.spawn(|| db_extractor.extract(relational));
            let xls = scope.spawn(|| xls_extractor.extract(markup));

            match (db.join(), xls.join()) {
                (Ok(db), Ok(xls)) => Ok((db, xls)),
                _ => Err(MigrationError::ExtractorPanicked),
            }
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
