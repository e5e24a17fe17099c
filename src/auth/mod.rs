//! Caller identification for the HTTP layer.
//!
//! The bearer token is the owner id. With auth disabled every caller acts as
//! [`DEFAULT_OWNER`].

use crate::context::RequestContext;
use axum::http::HeaderMap;


/// Owner used for every request when auth is disabled.
pub const DEFAULT_OWNER: &str = "default";

/// Header carrying a caller-supplied correlation id.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

/// Builds the request context: owner from the bearer token (or the default
/// owner when auth is off), correlation id from the header or freshly made.
pub fn request_context(headers: &HeaderMap, auth_enabled: bool) -> Result<RequestContext, TokenError> {
    let owner_id = if auth_enabled {
        extract_bearer_token(headers)?
    } else {
        DEFAULT_OWNER.to_string()
    };

    let correlation_id = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    Ok(match correlation_id {
        Some(id) => RequestContext::with_correlation_id(owner_id, id),
        None => RequestContext::new(owner_id),
    })
}

fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    // Expect "Bearer <token>"
    let parts: Vec<&str> = header_value.splitn(2, ' ').collect();

    if parts.len() != 2 {
        return Err(TokenError::InvalidFormat);
    }

    if !parts[0].eq_ignore_ascii_case("bearer") {
        return Err(TokenError::InvalidFormat);
    }

    let token = parts[1].trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(token.to_string())
}

/// Token extraction errors
#[derive(Debug, PartialEq, Clone)]
pub enum TokenError {
    /// Authorization header not present
    Missing,
    /// Not "Bearer <token>"
    InvalidFormat,
    Empty,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Missing => write!(f, "Authorization token not provided"),
            TokenError::InvalidFormat => write!(f, "Invalid authorization token format"),
            TokenError::Empty => write!(f, "Authorization token is empty"),
        }
    }
}

impl std::error::Error for TokenError {}
