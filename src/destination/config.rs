//! Typed per-backend views of a destination's config map.
//!
//! Key names follow the wizard's camelCase payloads. Credential fields are
//! [`Secret`]s, so serializing a `StorageConfig` is always safe.

use super::{ConfigMap, StorageType};
use crate::error::{DestinationError, Result};
use crate::secret::Secret;
use serde::Serialize;
use serde_json::Value;

const DEFAULT_FTP_PORT: u16 = 21;
const DEFAULT_SFTP_PORT: u16 = 22;

/// Config for the OAuth-backed drive providers. Credentials live in the token store.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_path: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Config {
    pub access_key: Secret<String>,
    pub secret_key: Secret<String>,
    pub bucket: String,
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTransferConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<Secret<String>>,
    pub use_key_auth: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<Secret<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomApiConfig {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<Secret<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_header: Option<String>,
}

/// Config parsed for a specific storage type.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum StorageConfig {
    Drive(DriveConfig),
    S3(S3Config),
    FileTransfer(FileTransferConfig),
    CustomApi(CustomApiConfig),
}

impl StorageConfig {
    /// Parses leniently: absent or blank keys become empty values, which
    /// [`StorageConfig::missing_fields`] then reports.
    pub fn from_map(storage_type: StorageType, map: &ConfigMap) -> Self {
        match storage_type {
            StorageType::GoogleDrive | StorageType::OneDrive => StorageConfig::Drive(DriveConfig {
                folder_id: text(map, "folderId"),
                folder_path: text(map, "folderPath"),
            }),
            StorageType::AwsS3 => StorageConfig::S3(S3Config {
                access_key: Secret::new(text(map, "accessKey").unwrap_or_default()),
                secret_key: Secret::new(text(map, "secretKey").unwrap_or_default()),
                bucket: text(map, "bucket").unwrap_or_default(),
                region: text(map, "region").unwrap_or_default(),
                prefix: text(map, "prefix"),
            }),
            StorageType::Ftp | StorageType::Sftp => {
                let default_port = if storage_type == StorageType::Sftp {
                    DEFAULT_SFTP_PORT
                } else {
                    DEFAULT_FTP_PORT
                };
                StorageConfig::FileTransfer(FileTransferConfig {
                    protocol: storage_type.as_str().to_string(),
                    host: text(map, "host").unwrap_or_default(),
                    port: port(map).unwrap_or(default_port),
                    username: text(map, "username").unwrap_or_default(),
                    password: text(map, "password").map(Secret::new),
                    use_key_auth: flag(map, "useKeyAuth"),
                    private_key: text(map, "privateKey").map(Secret::new),
                    remote_path: text(map, "remotePath"),
                })
            }
            StorageType::CustomApi => StorageConfig::CustomApi(CustomApiConfig {
                base_url: text(map, "baseUrl").unwrap_or_default(),
                endpoint: text(map, "endpoint"),
                api_key: text(map, "apiKey").map(Secret::new),
                api_key_header: text(map, "apiKeyHeader"),
            }),
        }
    }

    /// Required keys that are absent or blank, in a stable order.
    pub fn missing_fields(&self) -> Vec<String> {
        let mut missing = Vec::new();
        match self {
            StorageConfig::Drive(_) => {}
            StorageConfig::S3(c) => {
                let required = [
                    ("accessKey", c.access_key.expose().as_str()),
                    ("secretKey", c.secret_key.expose().as_str()),
                    ("bucket", c.bucket.as_str()),
                    ("region", c.region.as_str()),
                ];
                for (name, value) in required {
                    if value.is_empty() {
                        missing.push(name.to_string());
                    }
                }
            }
            StorageConfig::FileTransfer(c) => {
                if c.host.is_empty() {
                    missing.push("host".to_string());
                }
                if c.username.is_empty() {
                    missing.push("username".to_string());
                }
                if c.use_key_auth {
                    if c.private_key.is_none() {
                        missing.push("privateKey".to_string());
                    }
                } else if c.password.is_none() {
                    missing.push("password".to_string());
                }
            }
            StorageConfig::CustomApi(c) => {
                if c.base_url.is_empty() {
                    missing.push("baseUrl".to_string());
                }
            }
        }
        missing
    }

    /// Parses and checks required keys, failing with `IncompleteCredentials`.
    pub fn validate(storage_type: StorageType, map: &ConfigMap) -> Result<Self> {
        let config = Self::from_map(storage_type, map);
        let missing = config.missing_fields();
        if missing.is_empty() {
            Ok(config)
        } else {
            Err(DestinationError::IncompleteCredentials {
                storage_type: storage_type.as_str().to_string(),
                missing,
            })
        }
    }
}

fn text(map: &ConfigMap, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn flag(map: &ConfigMap, key: &str) -> bool {
    match map.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn port(map: &ConfigMap) -> Option<u16> {
    match map.get("port")? {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
