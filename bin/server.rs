// Ledger Bridge - Web Server
// REST API with Axum: migration uploads, transfers, ledger records, reports

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use ledger_bridge::logging::init_tracing;
use ledger_bridge::report::{ids_param, parse_date_param};
use ledger_bridge::{
    AppConfig, CommitOutcome, LedgerError, LedgerStore, MigrationService, PersistenceError,
    ReportError, ReportFilter, ReportService, SqliteLedger, TransferService,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
struct AppState {
    store: Arc<dyn LedgerStore>,
    transfers: Arc<TransferService>,
    reports: Arc<ReportService>,
    migrations: Arc<MigrationService>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::err(message))).into_response()
}

fn persistence_status(err: &PersistenceError) -> StatusCode {
    match err {
        PersistenceError::Duplicate(_) => StatusCode::CONFLICT,
        PersistenceError::BrokenPair(_)
        | PersistenceError::DanglingLink { .. }
        | PersistenceError::InvalidRecord(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PersistenceError::Sqlite(_) | PersistenceError::Poisoned => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn persistence_response(err: PersistenceError) -> Response {
    let status = persistence_status(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %err, "ledger storage failure");
    }
    error_response(status, err.to_string())
}

/// Run synchronous library code off the async executor
async fn blocking<T, F>(work: F) -> Result<T, Response>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| {
        error!(error = %e, "blocking task failed");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    })
}

// ============================================================================
// Request Bodies
// ============================================================================

#[derive(Deserialize)]
struct TransferRequest {
    from_wallet_id: String,
    to_wallet_id: String,
    amount: f64,
    /// RFC 3339 or YYYY-MM-DD; now when absent
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    notes: String,
}

#[derive(Serialize)]
struct TransferResponse {
    expense: ledger_bridge::LedgerTransaction,
    income: ledger_bridge::LedgerTransaction,
}

#[derive(Deserialize)]
struct UnlinkRequest {
    first: String,
    second: String,
}

#[derive(Serialize)]
struct CommitResponse {
    job_id: String,
    written: usize,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/v1/migrations/money-manager - Upload backup + report for reconciliation
async fn upload_migration(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut mmbak = None;
    let mut xls = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("Failed to parse form: {}", e)),
        };

        let name = field.name().unwrap_or_default().to_string();
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("Failed to read {}: {}", name, e)),
        };

        match name.as_str() {
            "mmbak_file" => mmbak = Some(bytes),
            "xls_file" => xls = Some(bytes),
            _ => {}
        }
    }

    let (Some(mmbak), Some(xls)) = (mmbak, xls) else {
        return error_response(StatusCode::BAD_REQUEST, "Both mmbak_file and xls_file are required");
    };

    let migrations = state.migrations.clone();
    match blocking(move || migrations.process_upload(&mmbak, &xls)).await {
        Ok(Ok(response)) => (StatusCode::OK, Json(response)).into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "migration upload failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(response) => response,
    }
}

/// GET /api/v1/migrations/:job_id - Full reconciliation result and import preview
async fn get_migration_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match state.migrations.job(&job_id) {
        Some(job) => (StatusCode::OK, Json(ApiResponse::ok(job))).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("Job {} not found", job_id)),
    }
}

/// POST /api/v1/migrations/:job_id/commit - Write a validated job into the ledger
async fn commit_migration_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    let migrations = state.migrations.clone();
    let store = state.store.clone();
    let id = job_id.clone();

    match blocking(move || migrations.commit(&id, store.as_ref())).await {
        Ok(Ok(CommitOutcome::Committed(written))) => {
            (StatusCode::OK, Json(ApiResponse::ok(CommitResponse { job_id, written }))).into_response()
        }
        Ok(Ok(CommitOutcome::UnknownJob)) => error_response(StatusCode::NOT_FOUND, format!("Job {} not found", job_id)),
        Ok(Ok(CommitOutcome::Rejected)) => {
            error_response(StatusCode::CONFLICT, "Job failed validation and cannot be imported")
        }
        Ok(Err(e)) => persistence_response(e),
        Err(response) => response,
    }
}

/// POST /api/v1/transfers - Create a linked transfer pair
async fn create_transfer(State(state): State<AppState>, Json(request): Json<TransferRequest>) -> Response {
    let date = match parse_date_param("date", request.date.as_deref(), Utc::now(), false) {
        Ok(date) => date,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let transfers = state.transfers.clone();
    let result = blocking(move || {
        transfers.create_transfer(
            &request.from_wallet_id,
            &request.to_wallet_id,
            request.amount,
            date,
            &request.notes,
        )
    })
    .await;

    match result {
        Ok(Ok((expense, income))) => {
            (StatusCode::CREATED, Json(ApiResponse::ok(TransferResponse { expense, income }))).into_response()
        }
        Ok(Err(LedgerError::InvalidInput(message))) => error_response(StatusCode::BAD_REQUEST, message),
        Ok(Err(LedgerError::Persistence(e))) => persistence_response(e),
        Err(response) => response,
    }
}

/// GET /api/v1/transactions/:id
async fn get_transaction(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let store = state.store.clone();
    let lookup = id.clone();

    match blocking(move || store.get_by_id(&lookup)).await {
        Ok(Ok(Some(tx))) => (StatusCode::OK, Json(ApiResponse::ok(tx))).into_response(),
        Ok(Ok(None)) => error_response(StatusCode::NOT_FOUND, format!("Transaction {} not found", id)),
        Ok(Err(e)) => persistence_response(e),
        Err(response) => response,
    }
}

/// DELETE /api/v1/transactions/:id - Idempotent; unlinks the counterpart first
async fn delete_transaction(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let store = state.store.clone();

    match blocking(move || store.delete(&id)).await {
        Ok(Ok(())) => StatusCode::NO_CONTENT.into_response(),
        Ok(Err(e)) => persistence_response(e),
        Err(response) => response,
    }
}

/// POST /api/v1/transactions/unlink
async fn unlink_transactions(State(state): State<AppState>, Json(request): Json<UnlinkRequest>) -> Response {
    let store = state.store.clone();

    match blocking(move || store.unlink(&request.first, &request.second)).await {
        Ok(Ok(())) => StatusCode::NO_CONTENT.into_response(),
        Ok(Err(e)) => persistence_response(e),
        Err(response) => response,
    }
}

/// GET /api/v1/reports?start_date&end_date&jar_ids&wallet_ids
async fn get_report(State(state): State<AppState>, Query(params): Query<HashMap<String, String>>) -> Response {
    let month = ReportFilter::current_month(Utc::now());

    let dates = parse_date_param("start_date", params.get("start_date").map(String::as_str), month.start_date, false)
        .and_then(|start| {
            parse_date_param("end_date", params.get("end_date").map(String::as_str), month.end_date, true)
                .map(|end| (start, end))
        });
    let (start, end) = match dates {
        Ok(range) => range,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let lookup = |key: &str| params.get(key).cloned();
    let filter = ReportFilter::new(start, end)
        .with_jars(ids_param(lookup, &["jar_ids", "category_ids"]))
        .with_wallets(ids_param(lookup, &["wallet_ids", "account_ids"]));

    let reports = state.reports.clone();
    match blocking(move || reports.generate(filter)).await {
        Ok(Ok(report)) => (StatusCode::OK, Json(ApiResponse::ok(report))).into_response(),
        Ok(Err(ReportError::Persistence(e))) => persistence_response(e),
        Ok(Err(e)) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(response) => response,
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env().context("Failed to load configuration")?;

    let store: Arc<dyn LedgerStore> = Arc::new(
        SqliteLedger::open(&config.database_path)
            .with_context(|| format!("Failed to open ledger {}", config.database_path.display()))?,
    );
    info!(path = %config.database_path.display(), "ledger opened");

    // Create shared state
    let state = AppState {
        store: store.clone(),
        transfers: Arc::new(TransferService::new(store.clone())),
        reports: Arc::new(ReportService::new(store)),
        migrations: Arc::new(MigrationService::from_config(&config)),
    };

    let upload_routes = Router::new()
        .route("/migrations/money-manager", post(upload_migration))
        .layer(
            ServiceBuilder::new()
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(config.upload_limit)),
        );

    // Build API routes
    let v1_routes = Router::new()
        .merge(upload_routes)
        .route("/migrations/:job_id", get(get_migration_job))
        .route("/migrations/:job_id/commit", post(commit_migration_job))
        .route("/transfers", post(create_transfer))
        .route("/transactions/unlink", post(unlink_transactions))
        .route("/transactions/:id", get(get_transaction).delete(delete_transaction))
        .route("/reports", get(get_report));

    let app = Router::new()
        .route("/api/health", get(health_check))
        .nest("/api/v1", v1_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, upload_limit = config.upload_limit, "server running");

    axum::serve(listener, app).await.context("Server stopped unexpectedly")?;
    Ok(())
}
