//! Destination management and connection test endpoints.

use super::{context, AppError};
use crate::destination::{DestinationUpdate, DestinationView, LifecycleManager, NewDestination};
use crate::validator::{ConnectionTestRequest, ConnectionValidator, TestResult};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;


/// Shared application state for destination API
#[derive(Clone)]
pub struct DestinationAppState {
    pub lifecycle: Arc<LifecycleManager>,
    pub validator: Arc<ConnectionValidator>,
    pub auth_enabled: bool,
}

#[derive(Deserialize, Default)]
pub struct ListQuery {
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Serialize)]
pub struct ListDestinationsResponse {
    pub destinations: Vec<DestinationView>,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Create destination API router
pub fn create_destination_router(state: DestinationAppState) -> Router {
    Router::new()
        .route("/api/destinations", get(list_destinations).post(create_destination))
        .route(
            "/api/destinations/:id",
            get(get_destination)
                .patch(update_destination)
                .delete(delete_destination),
        )
        .route("/api/destinations/:id/restore", post(restore_destination))
        .route("/api/destinations/:id/purge", delete(purge_destination))
        .route("/api/destinations/:id/test", post(test_destination))
        .route("/api/connections/test", post(test_connection_details))
        .with_state(Arc::new(state))
}

/// GET /api/destinations
async fn list_destinations(
    State(state): State<Arc<DestinationAppState>>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> Result<Json<ListDestinationsResponse>, AppError> {
    let ctx = context(&headers, state.auth_enabled)?;
    debug!(owner_id = %ctx.owner_id, include_deleted = query.include_deleted, "Listing destinations");

    let destinations = state
        .lifecycle
        .list(&ctx, query.include_deleted)
        .await?
        .iter()
        .map(DestinationView::from)
        .collect();
    Ok(Json(ListDestinationsResponse { destinations }))
}

/// POST /api/destinations
async fn create_destination(
    State(state): State<Arc<DestinationAppState>>,
    headers: HeaderMap,
    Json(input): Json<NewDestination>,
) -> Result<(StatusCode, Json<DestinationView>), AppError> {
    let ctx = context(&headers, state.auth_enabled)?;
    let destination = state.lifecycle.create(&ctx, input).await?;
    Ok((StatusCode::CREATED, Json(DestinationView::from(&destination))))
}

/// GET /api/destinations/:id
async fn get_destination(
    State(state): State<Arc<DestinationAppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DestinationView>, AppError> {
    let ctx = context(&headers, state.auth_enabled)?;
    let destination = state.lifecycle.get(&ctx, &id).await?;
    Ok(Json(DestinationView::from(&destination)))
}

/// PATCH /api/destinations/:id
async fn update_destination(
    State(state): State<Arc<DestinationAppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(update): Json<DestinationUpdate>,
) -> Result<Json<DestinationView>, AppError> {
    let ctx = context(&headers, state.auth_enabled)?;
    let destination = state.lifecycle.update(&ctx, &id, update).await?;
    Ok(Json(DestinationView::from(&destination)))
}

/// DELETE /api/destinations/:id (soft delete)
async fn delete_destination(
    State(state): State<Arc<DestinationAppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SuccessResponse>, AppError> {
    let ctx = context(&headers, state.auth_enabled)?;
    state.lifecycle.soft_delete(&ctx, &id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// POST /api/destinations/:id/restore
async fn restore_destination(
    State(state): State<Arc<DestinationAppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DestinationView>, AppError> {
    let ctx = context(&headers, state.auth_enabled)?;
    let destination = state.lifecycle.restore(&ctx, &id).await?;
    Ok(Json(DestinationView::from(&destination)))
}

/// DELETE /api/destinations/:id/purge
async fn purge_destination(
    State(state): State<Arc<DestinationAppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SuccessResponse>, AppError> {
    let ctx = context(&headers, state.auth_enabled)?;
    state.lifecycle.hard_delete(&ctx, &id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// POST /api/destinations/:id/test
///
/// Validation failures come back as `200 {success: false}`; the destination
/// status is updated either way.
async fn test_destination(
    State(state): State<Arc<DestinationAppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<TestResult>, AppError> {
    let ctx = context(&headers, state.auth_enabled)?;
    let result = state.validator.test_destination(&ctx, &id).await?;
    Ok(Json(result))
}

/// POST /api/connections/test
async fn test_connection_details(
    State(state): State<Arc<DestinationAppState>>,
    headers: HeaderMap,
    Json(request): Json<ConnectionTestRequest>,
) -> Result<Json<TestResult>, AppError> {
    let ctx = context(&headers, state.auth_enabled)?;
    let result = state.validator.test_details(&ctx, request).await?;
    Ok(Json(result))
}
