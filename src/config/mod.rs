pub mod env;
pub use env::{apply_env_overrides, encryption_key_from_env};

use crate::oauth::OAuthProvider;
use crate::secret::Secret;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Complete dataport configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataportConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub exports: ExportsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// When false every request acts as owner `default`
    #[serde(default)]
    pub auth_enabled: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            auth_enabled: false,
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// SQLite file shared by all stores
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "dataport.db".to_string()
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Client registration for one OAuth provider. Endpoints fall back to the
/// provider's public ones when unset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthProviderSettings {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<Secret<String>>,
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub google_drive: OAuthProviderSettings,
    #[serde(default)]
    pub onedrive: OAuthProviderSettings,
}

impl OAuthConfig {
    pub fn provider(&self, provider: OAuthProvider) -> &OAuthProviderSettings {
        match provider {
            OAuthProvider::GoogleDrive => &self.google_drive,
            OAuthProvider::OneDrive => &self.onedrive,
        }
    }

    pub fn provider_mut(&mut self, provider: OAuthProvider) -> &mut OAuthProviderSettings {
        match provider {
            OAuthProvider::GoogleDrive => &mut self.google_drive,
            OAuthProvider::OneDrive => &mut self.onedrive,
        }
    }
}

/// Export execution configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExportsConfig {
    /// How long shutdown waits for in-flight exports before aborting them
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    /// Outbox for the object/file transports
    #[serde(default = "default_spool_dir")]
    pub spool_dir: String,
    /// Directory holding `<owner_id>.json` datasets
    #[serde(default = "default_dataset_dir")]
    pub dataset_dir: String,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_google_api_base")]
    pub google_api_base: String,
    #[serde(default = "default_graph_api_base")]
    pub graph_api_base: String,
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_spool_dir() -> String {
    "spool".to_string()
}

fn default_dataset_dir() -> String {
    "datasets".to_string()
}

fn default_http_timeout() -> u64 {
    60
}

fn default_google_api_base() -> String {
    "https://www.googleapis.com".to_string()
}

fn default_graph_api_base() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

impl Default for ExportsConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: default_shutdown_timeout(),
            spool_dir: default_spool_dir(),
            dataset_dir: default_dataset_dir(),
            http_timeout_secs: default_http_timeout(),
            google_api_base: default_google_api_base(),
            graph_api_base: default_graph_api_base(),
        }
    }
}

/// Load configuration from a TOML file. A missing file yields defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<DataportConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(DataportConfig::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: DataportConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}
