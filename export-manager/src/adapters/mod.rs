//! Shipped export adapters.
//!
//! - `custom_api` - POST to a user-supplied HTTP endpoint
//! - `google_drive` / `onedrive` - upload with the stored OAuth token
//! - `aws_s3` / `ftp` / `sftp` - hand bytes to an [`ObjectTransport`]

pub mod custom_api;
pub mod google_drive;
pub mod object;
pub mod onedrive;
pub mod transport;

pub use custom_api::CustomApiAdapter;
pub use google_drive::GoogleDriveAdapter;
pub use object::ObjectAdapter;
pub use onedrive::OneDriveAdapter;
pub use transport::{ObjectTarget, ObjectTransport, SpoolTransport};

use crate::adapter::ExportJob;
use dataport::destination::{StorageConfig, StorageType};
use dataport::{DestinationError, Result};

/// Re-checks required config keys and returns the typed view.
pub(crate) fn storage_config(job: &ExportJob, storage_type: StorageType) -> Result<StorageConfig> {
    StorageConfig::validate(storage_type, job.destination.config.expose())
}

/// Access token for a drive upload. Expired tokens are refused: refreshing is
/// an explicit user action.
pub(crate) fn bearer_token(job: &ExportJob, storage_type: StorageType) -> Result<String> {
    let provider = storage_type.as_str().to_string();
    match &job.token {
        None => Err(DestinationError::AuthenticationRequired { provider }),
        Some(token) if token.is_expired() => Err(DestinationError::TokenExpired {
            provider,
            expired_at: token.expires_at.unwrap_or_default(),
        }),
        Some(token) => Ok(token.access_token.expose().clone()),
    }
}

pub(crate) fn transport_error(e: reqwest::Error) -> DestinationError {
    DestinationError::Transport(e.to_string())
}

/// Passes 2xx responses through and turns anything else into a transport
/// failure carrying the status and body.
pub(crate) async fn check_status(response: reqwest::Response, target: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DestinationError::Transport(format!(
        "{} returned {}: {}",
        target,
        status.as_u16(),
        body
    )))
}

/// Joins path segments with single slashes, skipping empty ones.
pub(crate) fn join_path(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
