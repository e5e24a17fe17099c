//! Error taxonomy shared by every destination component.
//!
//! Synchronous operations return [`DestinationError`] to the caller. Export
//! transport failures never surface here; they are written to the export log.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors surfaced by the broker, validator, lifecycle manager and orchestrator.
#[derive(Error, Debug)]
pub enum DestinationError {
    /// Operator misconfiguration (e.g. OAuth client id/secret unset).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The provider rejected an authorization code. Codes are single-use, so
    /// the user has to restart the consent flow.
    #[error("Token exchange failed with status {status_code}: {provider_body}")]
    TokenExchange {
        status_code: u16,
        provider_body: String,
    },

    #[error("Authentication required for {provider}: no stored token")]
    AuthenticationRequired { provider: String },

    #[error("Token for {provider} expired at {expired_at}")]
    TokenExpired {
        provider: String,
        expired_at: DateTime<Utc>,
    },

    #[error("Missing required fields for {storage_type}: {}", .missing.join(", "))]
    IncompleteCredentials {
        storage_type: String,
        missing: Vec<String>,
    },

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Persistence layer unavailable. Safe to retry.
    #[error("Storage failure: {0}")]
    Storage(String),
}

impl DestinationError {
    /// Stable machine-readable tag, used in API bodies and audit details.
    pub fn kind(&self) -> &'static str {
        match self {
            DestinationError::Configuration(_) => "missing_config",
            DestinationError::TokenExchange { .. } => "token_exchange_failed",
            DestinationError::AuthenticationRequired { .. } => "authentication_required",
            DestinationError::TokenExpired { .. } => "token_expired",
            DestinationError::IncompleteCredentials { .. } => "incomplete_credentials",
            DestinationError::Transport(_) => "transport_failure",
            DestinationError::PreconditionFailed(_) => "precondition_failed",
            DestinationError::NotFound(_) => "not_found",
            DestinationError::Unauthorized(_) => "unauthorized",
            DestinationError::InvalidInput(_) => "invalid_input",
            DestinationError::Storage(_) => "storage_failure",
        }
    }

    /// Whether repeating the same call unchanged can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DestinationError::Storage(_) | DestinationError::Transport(_)
        )
    }
}

impl From<anyhow::Error> for DestinationError {
    fn from(e: anyhow::Error) -> Self {
        DestinationError::Storage(format!("{:#}", e))
    }
}

pub type Result<T> = std::result::Result<T, DestinationError>;
