//! Axum status endpoints for AutoContentify.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use acfy_storage::Database;
use acfy_sync::{open_database, AppConfig};
use axum::{
    extract::{Path as AxumPath, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "acfy-web";

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub workspace_root: PathBuf,
}

impl AppState {
    pub fn new(db: Database, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            db,
            workspace_root: workspace_root.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReportRow {
    pub run_id: String,
    pub has_summary: bool,
    pub has_brief: bool,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/status", get(status_handler))
        .route("/reports", get(reports_handler))
        .route("/reports/{run_id}/brief", get(brief_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(config: &AppConfig, db: Database) -> anyhow::Result<()> {
    let state = AppState::new(db, config.workspace_root.clone());
    let listener = TcpListener::bind(config.bind_addr.as_str()).await?;
    info!(addr = %config.bind_addr, "status server listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let db = open_database(&config).await?;
    serve(&config, db).await
}

async fn index_handler() -> &'static str {
    "AutoContentify is running!"
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.db.counts().await {
        Ok(counts) => Json(counts).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn reports_handler(State(state): State<Arc<AppState>>) -> Response {
    match load_runs(&state.workspace_root.join("reports"), 20) {
        Ok(runs) => Json(runs).into_response(),
        Err(err) => server_error(err),
    }
}

async fn brief_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(run_id): AxumPath<String>,
) -> Response {
    if !is_run_id(&run_id) {
        return (StatusCode::BAD_REQUEST, "invalid run id").into_response();
    }
    let path = state
        .workspace_root
        .join("reports")
        .join(&run_id)
        .join("daily_brief.md");
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => ([(header::CONTENT_TYPE, "text/markdown; charset=utf-8")], text).into_response(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, "no brief for this run").into_response()
        }
        Err(err) => server_error(err.into()),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Server error: {err}"),
    )
        .into_response()
}

fn is_run_id(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Newest run directories first.
fn load_runs(reports_root: &Path, limit: usize) -> anyhow::Result<Vec<RunReportRow>> {
    if !reports_root.exists() {
        return Ok(vec![]);
    }
    let mut entries = std::fs::read_dir(reports_root)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .collect::<Vec<_>>();
    entries.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    entries.reverse();

    Ok(entries
        .into_iter()
        .take(limit)
        .map(|e| RunReportRow {
            run_id: e.file_name().to_string_lossy().to_string(),
            has_summary: e.path().join("run_summary.json").exists(),
            has_brief: e.path().join("daily_brief.md").exists(),
        })
        .collect())
}
