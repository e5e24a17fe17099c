use super::DataportConfig;
use crate::oauth::OAuthProvider;
use crate::secret::Secret;
use anyhow::{anyhow, Result};

/// Environment variable holding the base64 AES-256 master key.
pub const ENCRYPTION_KEY_VAR: &str = "DATAPORT_ENCRYPTION_KEY";

/// Apply `DATAPORT_*` overrides from the process environment.
pub fn apply_env_overrides(config: &mut DataportConfig) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

/// Apply overrides read through `lookup`. Unparseable values are ignored.
pub fn apply_overrides<F>(config: &mut DataportConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("DATAPORT_BIND_ADDR") {
        config.server.bind_addr = v;
    }
    if let Some(v) = lookup("DATAPORT_AUTH_ENABLED") {
        if let Ok(b) = v.parse::<bool>() {
            config.server.auth_enabled = b;
        }
    }
    if let Some(v) = lookup("DATAPORT_DATABASE_PATH") {
        config.storage.database_path = v;
    }
    if let Some(v) = lookup("DATAPORT_SPOOL_DIR") {
        config.exports.spool_dir = v;
    }
    if let Some(v) = lookup("DATAPORT_DATASET_DIR") {
        config.exports.dataset_dir = v;
    }
    if let Some(v) = lookup("DATAPORT_SHUTDOWN_TIMEOUT_SECS") {
        if let Ok(n) = v.parse::<u64>() {
            config.exports.shutdown_timeout_secs = n;
        }
    }

    for provider in [OAuthProvider::GoogleDrive, OAuthProvider::OneDrive] {
        let prefix = format!("DATAPORT_OAUTH_{}", provider.as_str().to_uppercase());
        let settings = config.oauth.provider_mut(provider);
        if let Some(v) = lookup(&format!("{}_CLIENT_ID", prefix)) {
            settings.client_id = Some(v);
        }
        if let Some(v) = lookup(&format!("{}_CLIENT_SECRET", prefix)) {
            settings.client_secret = Some(Secret::new(v));
        }
    }
}

/// Reads the master key. There is no file-based fallback.
pub fn encryption_key_from_env() -> Result<Secret<String>> {
    std::env::var(ENCRYPTION_KEY_VAR)
        .map(Secret::new)
        .map_err(|_| anyhow!("{} must be set (base64-encoded 32-byte key)", ENCRYPTION_KEY_VAR))
}
