// HTTP APIs for destinations, connection tests and OAuth

pub mod destinations;
mod error;
pub mod oauth;

pub use destinations::{create_destination_router, DestinationAppState};
pub use error::AppError;
pub use oauth::{create_oauth_router, OAuthAppState};

use crate::auth::request_context;
use crate::context::RequestContext;
use axum::http::HeaderMap;

/// Resolves the caller for a handler.
pub fn context(headers: &HeaderMap, auth_enabled: bool) -> Result<RequestContext, AppError> {
    Ok(request_context(headers, auth_enabled)?)
}
