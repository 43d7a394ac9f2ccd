use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::{Args, Parser, Subcommand};
use indexsync::{
    config::SyncConfig,
    errors::SyncError,
    models::{IndexMetadata, PassLog, SnapshotReference, SyncReport},
    snapshot::SnapshotLayout,
    IndexSync,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{signal, sync::Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Runs the command line interface for the synchronization service.
pub async fn run_cli() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Serve(args)) => run_server(args).await?,
        None => {
            println!("No subcommand provided. Use --help to see available commands.");
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Starts the index synchronization HTTP service
    Serve(ServeArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Base directory for the pass catalog and default snapshot root
    #[arg(long, env = "INDEXSYNC_BASE_PATH")]
    base_path: PathBuf,
    /// Socket address to bind the service
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: String,
    /// Synchronize with the latest snapshot before accepting requests
    #[arg(long, default_value_t = false)]
    sync_on_start: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub sync: Arc<IndexSync>,
    /// Held for the whole of a pass or reset; the engine does not coordinate passes itself.
    pass_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(sync: Arc<IndexSync>) -> Self {
        Self {
            sync,
            pass_lock: Arc::new(Mutex::new(())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unprocessable(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    BadGateway(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn from_sync(err: SyncError) -> Self {
        let message = err.to_string();
        match err {
            SyncError::InvalidSnapshot(_) | SyncError::InvalidRecord(_) => {
                ApiError::BadRequest(message)
            }
            SyncError::SnapshotUnreadable { .. } => ApiError::Unprocessable(message),
            SyncError::NotInitialized => ApiError::Unavailable(message),
            SyncError::BackendUnavailable(_) => ApiError::BadGateway(message),
            _ => ApiError::Internal(message),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("request failed: {}", self);
        } else {
            warn!("request rejected: {}", self);
        }
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<SyncError> for ApiError {
    fn from(value: SyncError) -> Self {
        ApiError::from_sync(value)
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize)]
struct SyncRequest {
    snapshot_path: PathBuf,
}

#[derive(Clone, Deserialize)]
struct PassesQuery {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct StatusResponse {
    metadata: IndexMetadata,
    document_count: u64,
    snapshot_root: PathBuf,
    latest_snapshot: Option<i64>,
}

#[derive(Serialize)]
struct ResetResponse {
    deleted: u64,
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let addr: SocketAddr = args.bind.parse().context("failed to parse bind address")?;

    let config = SyncConfig::from_env(&args.base_path).context("invalid configuration")?;
    let sync = Arc::new(IndexSync::new(config).await?);
    sync.initialize()
        .await
        .context("failed to initialize the search index")?;

    if args.sync_on_start {
        match sync.synchronize_latest().await {
            Ok(report) => info!(
                "Startup pass finished ({}) at snapshot {}",
                report.mode.as_str(),
                report.snapshot.timestamp
            ),
            Err(err) => error!("Startup pass failed: {}", err),
        }
    }

    let router = build_router(AppState::new(Arc::clone(&sync)));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind listener")?;

    info!("Index synchronization service listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    sync.close().await?;
    Ok(())
}

/// Builds the HTTP router used by the synchronization service.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/snapshots", get(list_snapshots))
        .route("/api/passes", get(list_passes))
        .route("/api/sync", post(trigger_sync))
        .route("/api/sync/latest", post(trigger_sync_latest))
        .route("/api/reset", post(reset_index))
        .with_state(state)
}

async fn get_status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let status = state.sync.status().await?;
    let snapshot_root = state.sync.config.snapshot_root.clone();
    let latest = SnapshotLayout::new(&snapshot_root).latest().await?;
    Ok(Json(StatusResponse {
        metadata: status.metadata,
        document_count: status.document_count,
        snapshot_root,
        latest_snapshot: latest.map(|s| s.timestamp),
    }))
}

async fn list_snapshots(State(state): State<AppState>) -> ApiResult<Json<Vec<SnapshotReference>>> {
    let snapshots = SnapshotLayout::new(&state.sync.config.snapshot_root)
        .list()
        .await?;
    Ok(Json(snapshots))
}

async fn list_passes(
    State(state): State<AppState>,
    Query(query): Query<PassesQuery>,
) -> ApiResult<Json<Vec<PassLog>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 1000);
    Ok(Json(state.sync.passes(limit)?))
}

async fn trigger_sync(
    State(state): State<AppState>,
    Json(body): Json<SyncRequest>,
) -> ApiResult<Json<SyncReport>> {
    let _guard = state.pass_lock.lock().await;
    info!("Synchronization requested for {}", body.snapshot_path.display());
    let report = state.sync.synchronize(&body.snapshot_path).await?;
    Ok(Json(report))
}

async fn trigger_sync_latest(State(state): State<AppState>) -> ApiResult<Json<SyncReport>> {
    let _guard = state.pass_lock.lock().await;
    info!("Synchronization with the latest snapshot requested");
    let report = state.sync.synchronize_latest().await?;
    Ok(Json(report))
}

async fn reset_index(State(state): State<AppState>) -> ApiResult<Json<ResetResponse>> {
    let _guard = state.pass_lock.lock().await;
    info!("Index reset requested");
    let deleted = state.sync.reset_index().await?;
    Ok(Json(ResetResponse { deleted }))
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("Shutdown signal received");
}
