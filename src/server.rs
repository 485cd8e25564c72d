//! HTTP surface
//!
//! Axum router over an [`IntegrationManager`]: service health, status and
//! metrics snapshots, webhook ingress with optional signature verification,
//! and read/control routes for endpoints and sync jobs.

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::endpoints::{ApiEndpoint, ApiStatus};
use crate::error::IntegrationError;
use crate::manager::IntegrationManager;
use crate::metrics::{ManagerMetrics, ManagerStatus};
use crate::sync::{SyncEvent, SyncJob, SyncStatus};
use crate::webhooks::{verify_signature, WebhookLog, SIGNATURE_HEADER};

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<IntegrationManager>,
}

impl AppState {
    pub fn new(manager: Arc<IntegrationManager>) -> Self {
        Self { manager }
    }
}

/// Error returned by handlers.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid or missing webhook signature")]
    InvalidSignature,

    #[error(transparent)]
    Integration(#[from] IntegrationError),
}

impl ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServerError::InvalidSignature => StatusCode::UNAUTHORIZED,
            ServerError::Integration(err) => match err {
                IntegrationError::Validation(_) => StatusCode::BAD_REQUEST,
                IntegrationError::NotFound { .. } => StatusCode::NOT_FOUND,
                IntegrationError::Conflict { .. }
                | IntegrationError::AlreadyRunning(_)
                | IntegrationError::NotRunning(_)
                | IntegrationError::Inactive { .. } => StatusCode::CONFLICT,
                IntegrationError::ConcurrencyLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
                IntegrationError::Transport { .. } => StatusCode::BAD_GATEWAY,
                IntegrationError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Build the router with every route.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .route("/webhooks/{id}", post(webhook_handler))
        .route("/endpoints", get(list_endpoints_handler))
        .route("/endpoints/{id}/status", get(endpoint_status_handler))
        .route("/sync/jobs", get(list_sync_jobs_handler))
        .route("/sync/jobs/{id}/status", get(sync_status_handler))
        .route("/sync/jobs/{id}/history", get(sync_history_handler))
        .route("/sync/jobs/{id}/start", post(start_sync_handler))
        .route("/sync/jobs/{id}/stop", post(stop_sync_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router on `addr` until `shutdown` resolves.
pub async fn serve<F>(manager: Arc<IntegrationManager>, addr: &str, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %listener.local_addr()?, "HTTP server listening");
    axum::serve(listener, create_router(AppState::new(manager)))
        .with_graceful_shutdown(shutdown)
        .await
}

/// GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /status
pub async fn status_handler(State(state): State<AppState>) -> Json<ManagerStatus> {
    Json(state.manager.status().await)
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> Json<ManagerMetrics> {
    Json(state.manager.metrics().await)
}

/// POST /webhooks/{id}
///
/// The raw body is handed to the webhook's consumer. When the webhook has a
/// secret, the `X-Hub-Signature-256` header must match the body. A consumer
/// failure is still a delivered webhook: the response carries the log entry
/// with `success: false`.
pub async fn webhook_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<Json<WebhookLog>> {
    let webhook = state.manager.get_webhook(&id).await?;
    if let Some(secret) = webhook.secret.as_deref().filter(|s| !s.is_empty()) {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(ServerError::InvalidSignature)?;
        if !verify_signature(secret, &body, signature) {
            tracing::warn!(webhook_id = %id, "Rejected webhook with bad signature");
            return Err(ServerError::InvalidSignature);
        }
    }

    let log = state.manager.handle_webhook(&id, &body).await?;
    Ok(Json(log))
}

/// GET /endpoints
pub async fn list_endpoints_handler(State(state): State<AppState>) -> Json<Vec<ApiEndpoint>> {
    Json(state.manager.list_endpoints().await)
}

/// GET /endpoints/{id}/status
pub async fn endpoint_status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<ApiStatus>> {
    Ok(Json(state.manager.endpoint_status(&id).await?))
}

/// GET /sync/jobs
pub async fn list_sync_jobs_handler(State(state): State<AppState>) -> Json<Vec<SyncJob>> {
    Json(state.manager.list_sync_jobs().await)
}

/// GET /sync/jobs/{id}/status
pub async fn sync_status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<SyncStatus>> {
    Ok(Json(state.manager.sync_status(&id).await?))
}

/// GET /sync/jobs/{id}/history
pub async fn sync_history_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<Vec<SyncEvent>>> {
    Ok(Json(state.manager.sync_history(&id).await?))
}

/// POST /sync/jobs/{id}/start
pub async fn start_sync_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<(StatusCode, Json<SyncStatus>)> {
    let status = state.manager.start_sync(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

/// POST /sync/jobs/{id}/stop
pub async fn stop_sync_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<SyncStatus>> {
    Ok(Json(state.manager.stop_sync(&id).await?))
}
