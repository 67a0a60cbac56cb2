use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::inventory;
use crate::query::SeriesQuery;
use crate::types::{Sample, SystemInfo};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub query: SeriesQuery,
    pub hostname: String,
    pub proc_root: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_hours")]
    pub hours: i64,
}

fn default_hours() -> i64 { 1 }

// Ten years; keeps chrono::Duration construction in range
const MAX_HISTORY_HOURS: i64 = 24 * 365 * 10;

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub metrics: Vec<Sample>,
}

/// Read failures surface as a 500 with a JSON body
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "API request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("{:#}", self.0) })),
        )
            .into_response()
    }
}

pub fn router(state: AppState, prefix: &str) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/api/system", get(system_info))
        .route("/api/metrics/latest", get(latest_metrics))
        .route("/api/history", get(history))
        .with_state(state);

    let app = if prefix.is_empty() || prefix == "/" {
        api
    } else {
        Router::new().nest(prefix.trim_end_matches('/'), api)
    };

    app.layer(CorsLayer::permissive()).layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` is cancelled
pub async fn serve(config: &Config, query: SeriesQuery, shutdown: CancellationToken) -> Result<()> {
    let addr: SocketAddr = config
        .api
        .bind
        .parse()
        .with_context(|| format!("Invalid api.bind address: {}", config.api.bind))?;

    let state = AppState {
        query,
        hostname: config.agent.hostname.clone(),
        proc_root: config.sampler.proc_root.clone(),
    };
    let app = router(state, &config.api.prefix);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %addr, prefix = %config.api.prefix, "HTTP API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server failed")?;

    info!("HTTP API stopped");
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn system_info(State(state): State<AppState>) -> Result<Json<SystemInfo>, ApiError> {
    let info = tokio::task::spawn_blocking(move || {
        inventory::collect_system_info(&state.proc_root, &state.hostname)
    })
    .await
    .context("System info task panicked")?;
    Ok(Json(info))
}

async fn latest_metrics(State(state): State<AppState>) -> Result<Json<Sample>, ApiError> {
    let sample = tokio::task::spawn_blocking(move || state.query.latest())
        .await
        .context("Query task panicked")??;
    Ok(Json(sample))
}

async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let hours = params.hours.clamp(1, MAX_HISTORY_HOURS);
    let metrics = tokio::task::spawn_blocking(move || state.query.window(chrono::Duration::hours(hours)))
        .await
        .context("Query task panicked")??;
    Ok(Json(HistoryResponse { metrics }))
}
