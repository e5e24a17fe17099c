//! HTTP API for export requests and export history.

use crate::orchestrator::{ExportOrchestrator, ExportRequested};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use dataport::api::{context, AppError};
use dataport::export_log::ExportLog;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Shared application state for export API
#[derive(Clone)]
pub struct ExportAppState {
    pub orchestrator: Arc<ExportOrchestrator>,
    pub auth_enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub destination_id: String,
}

#[derive(Serialize)]
pub struct ExportHistoryResponse {
    pub exports: Vec<ExportLog>,
}

/// Create export API router
pub fn create_export_router(state: ExportAppState) -> Router {
    Router::new()
        .route("/api/exports", post(request_export))
        .route("/api/exports/:id", get(get_export))
        .route("/api/destinations/:id/exports", get(list_exports))
        .with_state(Arc::new(state))
}

/// POST /api/exports
///
/// Returns `202 {export_id, status: "InProgress"}`; delivery failures show up
/// on the export log, not here.
async fn request_export(
    State(state): State<Arc<ExportAppState>>,
    headers: HeaderMap,
    Json(request): Json<ExportRequest>,
) -> Result<(StatusCode, Json<ExportRequested>), AppError> {
    let ctx = context(&headers, state.auth_enabled)?;
    let requested = state
        .orchestrator
        .request_export(&ctx, &request.destination_id)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(requested)))
}

/// GET /api/exports/:id
async fn get_export(
    State(state): State<Arc<ExportAppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ExportLog>, AppError> {
    let ctx = context(&headers, state.auth_enabled)?;
    let log = state.orchestrator.get_export(&ctx, &id).await?;
    Ok(Json(log))
}

/// GET /api/destinations/:id/exports
async fn list_exports(
    State(state): State<Arc<ExportAppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ExportHistoryResponse>, AppError> {
    let ctx = context(&headers, state.auth_enabled)?;
    debug!(owner_id = %ctx.owner_id, destination_id = %id, "Listing exports");
    let exports = state.orchestrator.list_exports(&ctx, &id).await?;
    Ok(Json(ExportHistoryResponse { exports }))
}
