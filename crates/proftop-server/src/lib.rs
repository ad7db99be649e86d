//! HTTP view server.
//!
//! Publishes the latest [`PollerStatus`] of a running poller as JSON so
//! dashboards and scripts can read the live top table without a terminal.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    response::Json,
    routing::get,
};
use log::info;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;

use proftop_core::PollerStatus;

/// Shared server state.
struct AppState {
    status: watch::Receiver<PollerStatus>,
    workers: usize,
}

#[derive(Debug, Default, Deserialize)]
struct TopParams {
    /// Return at most this many rows of the latest view.
    limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    workers: usize,
    cycles: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

async fn handle_top(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TopParams>,
) -> Json<PollerStatus> {
    let mut status = state.status.borrow().clone();
    if let (Some(limit), Some(view)) = (params.limit, status.view.as_mut()) {
        view.rows.truncate(limit);
    }
    Json(status)
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = state.status.borrow().clone();
    let label = if status.last_error.is_some() {
        "degraded"
    } else if status.collecting {
        "collecting"
    } else {
        "healthy"
    };
    Json(HealthResponse {
        status: label.to_string(),
        workers: state.workers,
        cycles: status.cycles,
        last_error: status.last_error,
    })
}

async fn handle_index(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "proftop",
        "version": proftop_core::VERSION,
        "workers": state.workers,
        "endpoints": {
            "/": "This API index",
            "/api/v1/profiler/top": {
                "method": "GET",
                "description": "Latest ranked per-interval call statistics",
                "params": {
                    "limit": "Return at most this many rows",
                }
            },
            "/health": "Health check",
        },
    }))
}

/// Build the axum router.
fn build_router(status: watch::Receiver<PollerStatus>, workers: usize) -> Router {
    let state = Arc::new(AppState { status, workers });

    Router::new()
        .route("/", get(handle_index))
        .route("/api/v1/profiler/top", get(handle_top))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Serve on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    status: watch::Receiver<PollerStatus>,
    workers: usize,
) -> std::io::Result<()> {
    axum::serve(listener, build_router(status, workers)).await
}

/// Run the HTTP view server.
pub async fn run_server(
    status: watch::Receiver<PollerStatus>,
    workers: usize,
    host: &str,
    port: u16,
) -> std::io::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("serving profiler view on http://{addr}");
    serve(listener, status, workers).await
}
