//! OAuth consent endpoints for the drive providers.
//!
//! 1. UI asks for `GET /api/oauth/:provider/authorize` and opens the URL
//! 2. User authorizes on the provider's site
//! 3. Provider redirects back to the UI with a code
//! 4. UI relays `{provider, code, redirectUri}` to `POST /api/oauth/callback`
//! 5. Token is exchanged and stored encrypted

use super::{context, AppError};
use crate::error::DestinationError;
use crate::oauth::{CallbackRequest, CallbackResponse, OAuthBroker, OAuthProvider};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Shared application state for OAuth API
#[derive(Clone)]
pub struct OAuthAppState {
    pub broker: Arc<OAuthBroker>,
    pub auth_enabled: bool,
}

#[derive(Deserialize)]
pub struct AuthorizeQuery {
    pub redirect_uri: String,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Serialize)]
pub struct AuthorizeResponse {
    pub provider: OAuthProvider,
    pub authorization_url: String,
}

#[derive(Serialize)]
pub struct DisconnectResponse {
    pub success: bool,
}

#[derive(Serialize)]
pub struct ConnectionsResponse {
    pub providers: Vec<String>,
}

/// Create OAuth API router
pub fn create_oauth_router(state: OAuthAppState) -> Router {
    Router::new()
        .route("/api/oauth/connections", get(list_connections))
        .route("/api/oauth/callback", post(oauth_callback))
        .route("/api/oauth/:provider/authorize", get(authorize))
        .route("/api/oauth/:provider/refresh", post(refresh))
        .route("/api/oauth/:provider", delete(disconnect))
        .with_state(Arc::new(state))
}

fn parse_provider(name: &str) -> Result<OAuthProvider, AppError> {
    name.parse()
        .map_err(|e: String| AppError::Domain(DestinationError::NotFound(e)))
}

/// GET /api/oauth/:provider/authorize?redirect_uri=...&state=...
async fn authorize(
    State(state): State<Arc<OAuthAppState>>,
    Path(provider): Path<String>,
    Query(query): Query<AuthorizeQuery>,
    headers: HeaderMap,
) -> Result<Json<AuthorizeResponse>, AppError> {
    let ctx = context(&headers, state.auth_enabled)?;
    let provider = parse_provider(&provider)?;
    debug!(owner_id = %ctx.owner_id, provider = %provider, "Authorization URL requested");

    let authorization_url =
        state
            .broker
            .build_authorization_url(provider, &query.redirect_uri, query.state.as_deref())?;
    Ok(Json(AuthorizeResponse {
        provider,
        authorization_url,
    }))
}

/// POST /api/oauth/callback
async fn oauth_callback(
    State(state): State<Arc<OAuthAppState>>,
    headers: HeaderMap,
    Json(request): Json<CallbackRequest>,
) -> Result<Json<CallbackResponse>, AppError> {
    let ctx = context(&headers, state.auth_enabled)?;
    let response = state.broker.complete_callback(&ctx, request).await?;
    Ok(Json(response))
}

/// POST /api/oauth/:provider/refresh
async fn refresh(
    State(state): State<Arc<OAuthAppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Result<Json<CallbackResponse>, AppError> {
    let ctx = context(&headers, state.auth_enabled)?;
    let provider = parse_provider(&provider)?;
    let response = state.broker.refresh_token(&ctx, provider).await?;
    Ok(Json(response))
}

/// DELETE /api/oauth/:provider
async fn disconnect(
    State(state): State<Arc<OAuthAppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DisconnectResponse>, AppError> {
    let ctx = context(&headers, state.auth_enabled)?;
    let provider = parse_provider(&provider)?;
    let success = state.broker.disconnect(&ctx, provider).await?;
    Ok(Json(DisconnectResponse { success }))
}

/// GET /api/oauth/connections
async fn list_connections(
    State(state): State<Arc<OAuthAppState>>,
    headers: HeaderMap,
) -> Result<Json<ConnectionsResponse>, AppError> {
    let ctx = context(&headers, state.auth_enabled)?;
    let providers = state.broker.connected_providers(&ctx).await?;
    Ok(Json(ConnectionsResponse { providers }))
}
