//! Destination records and their lifecycle.
//!
//! A destination is a configured export target. Its `storage_type` is
//! normalised once, when the record enters the system, so nothing downstream
//! branches on raw type strings.

mod config;
mod lifecycle;
mod store;

pub use config::{
    CustomApiConfig, DriveConfig, FileTransferConfig, S3Config, StorageConfig,
};
pub use lifecycle::{DestinationUpdate, LifecycleManager, NewDestination};
pub use store::DestinationStore;

use crate::oauth::OAuthProvider;
use crate::secret::Secret;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Opaque key-value configuration as submitted by the UI.
pub type ConfigMap = Map<String, Value>;

/// Storage backend a destination writes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    GoogleDrive,
    #[serde(rename = "onedrive")]
    OneDrive,
    AwsS3,
    Ftp,
    Sftp,
    CustomApi,
}

impl StorageType {
    pub const ALL: [StorageType; 6] = [
        StorageType::GoogleDrive,
        StorageType::OneDrive,
        StorageType::AwsS3,
        StorageType::Ftp,
        StorageType::Sftp,
        StorageType::CustomApi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::GoogleDrive => "google_drive",
            StorageType::OneDrive => "onedrive",
            StorageType::AwsS3 => "aws_s3",
            StorageType::Ftp => "ftp",
            StorageType::Sftp => "sftp",
            StorageType::CustomApi => "custom_api",
        }
    }

    /// OAuth provider backing this storage type, if it uses interactive consent.
    pub fn oauth_provider(&self) -> Option<OAuthProvider> {
        match self {
            StorageType::GoogleDrive => Some(OAuthProvider::GoogleDrive),
            StorageType::OneDrive => Some(OAuthProvider::OneDrive),
            _ => None,
        }
    }

    /// Resolves the storage type of an incoming record.
    ///
    /// An explicit `storage_type` wins and must name a known type. Otherwise
    /// the legacy display label in `destination_type` is mapped, with unknown
    /// labels falling back to `custom_api`. The combined FTP/SFTP type is split
    /// on `config.protocol`.
    pub fn resolve(
        storage_type: Option<&str>,
        destination_type: Option<&str>,
        config: &ConfigMap,
    ) -> crate::Result<StorageType> {
        let key = match storage_type.map(str::trim).filter(|s| !s.is_empty()) {
            Some(explicit) => explicit.to_ascii_lowercase(),
            None => match destination_type.map(str::trim).unwrap_or_default() {
                "Google Drive" => "google_drive".to_string(),
                "Microsoft OneDrive" => "onedrive".to_string(),
                "AWS S3" => "aws_s3".to_string(),
                "FTP/SFTP" => "ftp_sftp".to_string(),
                _ => "custom_api".to_string(),
            },
        };

        if key == "ftp_sftp" {
            let protocol = config
                .get("protocol")
                .and_then(Value::as_str)
                .unwrap_or("ftp");
            return Ok(if protocol.eq_ignore_ascii_case("sftp") {
                StorageType::Sftp
            } else {
                StorageType::Ftp
            });
        }

        key.parse().map_err(crate::DestinationError::InvalidInput)
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StorageType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown storage type '{}'", s))
    }
}

/// Destination status as shown to the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DestinationStatus {
    Pending,
    Active,
    Failed,
    Inactive,
    Deleted,
}

impl DestinationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationStatus::Pending => "pending",
            DestinationStatus::Active => "active",
            DestinationStatus::Failed => "failed",
            DestinationStatus::Inactive => "inactive",
            DestinationStatus::Deleted => "deleted",
        }
    }
}

impl FromStr for DestinationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DestinationStatus::Pending),
            "active" => Ok(DestinationStatus::Active),
            "failed" => Ok(DestinationStatus::Failed),
            "inactive" => Ok(DestinationStatus::Inactive),
            "deleted" => Ok(DestinationStatus::Deleted),
            other => Err(format!("Unknown destination status '{}'", other)),
        }
    }
}

/// Serialization format of the exported file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExportFormat {
    #[default]
    #[serde(rename = "CSV", alias = "csv")]
    Csv,
    #[serde(rename = "JSON", alias = "json")]
    Json,
    #[serde(rename = "Parquet", alias = "parquet")]
    Parquet,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "CSV",
            ExportFormat::Json => "JSON",
            ExportFormat::Parquet => "Parquet",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Parquet => "parquet",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/json",
            ExportFormat::Parquet => "application/vnd.apache.parquet",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "parquet" => Ok(ExportFormat::Parquet),
            other => Err(format!("Unknown export format '{}'", other)),
        }
    }
}

/// A persisted destination record.
///
/// `config` stays wrapped in [`Secret`]; use [`Destination::storage_config`]
/// or [`DestinationView`] for anything that leaves the process.
#[derive(Clone, Debug)]
pub struct Destination {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub destination_type: Option<String>,
    pub storage_type: StorageType,
    pub status: DestinationStatus,
    pub export_format: ExportFormat,
    pub schedule: Option<String>,
    pub save_to_storage: bool,
    pub config: Secret<ConfigMap>,
    pub is_deleted: bool,
    pub deletion_marked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Destination {
    /// Typed view of the config for this destination's storage type.
    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig::from_map(self.storage_type, self.config.expose())
    }
}

/// Outward shape of a destination record, with credentials redacted.
#[derive(Clone, Debug, Serialize)]
pub struct DestinationView {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub destination_type: Option<String>,
    pub storage_type: StorageType,
    pub status: DestinationStatus,
    pub export_format: ExportFormat,
    pub schedule: Option<String>,
    pub save_to_storage: bool,
    pub config: StorageConfig,
    pub is_deleted: bool,
    pub deletion_marked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Destination> for DestinationView {
    fn from(d: &Destination) -> Self {
        Self {
            id: d.id.clone(),
            user_id: d.user_id.clone(),
            name: d.name.clone(),
            destination_type: d.destination_type.clone(),
            storage_type: d.storage_type,
            status: d.status,
            export_format: d.export_format,
            schedule: d.schedule.clone(),
            save_to_storage: d.save_to_storage,
            config: d.storage_config(),
            is_deleted: d.is_deleted,
            deletion_marked_at: d.deletion_marked_at,
            created_at: d.created_at,
            updated_at: d.updated_at,
        }
    }
}
