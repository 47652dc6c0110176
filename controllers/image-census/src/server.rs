//! HTTP endpoint serving the latest snapshot and metrics.

use crate::error::ControllerError;
use crate::metrics::CensusMetrics;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared state of the HTTP handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    json_path: Arc<PathBuf>,
    metrics: CensusMetrics,
}

impl AppState {
    /// State serving the JSON artifact at `json_path`.
    pub fn new(json_path: PathBuf, metrics: CensusMetrics) -> Self {
        Self {
            json_path: Arc::new(json_path),
            metrics,
        }
    }
}

/// Handler for GET /
///
/// Reads the artifact from disk on every request so it always reflects the
/// last completed cycle.
async fn snapshot_handler(State(state): State<AppState>) -> Response {
    match tokio::fs::read(state.json_path.as_ref()).await {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => {
            error!(path = %state.json_path.display(), error = %e, "Failed to read census snapshot");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Handler for GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Builds the HTTP router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(snapshot_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves `router` on `listener` until `cancel` fires.
///
/// # Errors
///
/// Returns `ControllerError::Server` if the server fails.
pub async fn serve(listener: TcpListener, router: Router, cancel: CancellationToken) -> Result<(), ControllerError> {
    let addr = listener
        .local_addr()
        .map_err(|e| ControllerError::Server(e.to_string()))?;
    info!(%addr, "Serving census snapshot");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| ControllerError::Server(e.to_string()))?;

    info!("HTTP server stopped");
    Ok(())
}
