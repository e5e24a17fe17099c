//! OAuth provider configurations.
//!
//! Defines the OAuth 2.0 endpoints and scopes for each drive provider.

use crate::config::OAuthProviderSettings;
use crate::secret::Secret;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Drive provider that authorizes through the consent flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OAuthProvider {
    #[serde(rename = "google_drive", alias = "google")]
    GoogleDrive,
    #[serde(rename = "onedrive", alias = "microsoft")]
    OneDrive,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::GoogleDrive => "google_drive",
            OAuthProvider::OneDrive => "onedrive",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OAuthProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google_drive" | "google" => Ok(OAuthProvider::GoogleDrive),
            "onedrive" | "microsoft" => Ok(OAuthProvider::OneDrive),
            other => Err(format!("Unknown OAuth provider '{}'", other)),
        }
    }
}

/// OAuth provider configuration
#[derive(Clone, Debug)]
pub struct OAuthProviderConfig {
    pub provider: OAuthProvider,

    /// OAuth authorization endpoint URL
    pub auth_url: String,

    /// OAuth token endpoint URL
    pub token_url: String,

    /// Required OAuth scopes
    pub scopes: Vec<String>,

    /// Client ID; `None` until the operator registers the app
    pub client_id: Option<String>,

    pub client_secret: Option<Secret<String>>,
}

impl OAuthProviderConfig {
    /// Public endpoints for `provider`, overridden by any configured values.
    pub fn from_settings(provider: OAuthProvider, settings: &OAuthProviderSettings) -> Self {
        let (auth_url, token_url, scopes) = match provider {
            OAuthProvider::GoogleDrive => (
                "https://accounts.google.com/o/oauth2/v2/auth",
                "https://oauth2.googleapis.com/token",
                vec!["https://www.googleapis.com/auth/drive.file"],
            ),
            OAuthProvider::OneDrive => (
                "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
                "https://login.microsoftonline.com/common/oauth2/v2.0/token",
                vec!["Files.ReadWrite", "offline_access"],
            ),
        };

        Self {
            provider,
            auth_url: settings.auth_url.clone().unwrap_or_else(|| auth_url.to_string()),
            token_url: settings
                .token_url
                .clone()
                .unwrap_or_else(|| token_url.to_string()),
            scopes: scopes.into_iter().map(|s| s.to_string()).collect(),
            client_id: settings.client_id.clone().filter(|id| !id.trim().is_empty()),
            client_secret: settings.client_secret.clone(),
        }
    }

    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }

    /// Build authorization URL for `client_id`, with an optional opaque state.
    pub fn build_auth_url(&self, client_id: &str, redirect_uri: &str, state: Option<&str>) -> String {
        let mut url = format!(
            "{}?client_id={}&redirect_uri={}&scope={}&response_type=code",
            self.auth_url,
            urlencoding::encode(client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&self.scope()),
        );
        if self.provider == OAuthProvider::GoogleDrive {
            // Needed for Google to issue a refresh token on every consent
            url.push_str("&access_type=offline&prompt=consent");
        }
        if let Some(state) = state {
            url.push_str("&state=");
            url.push_str(&urlencoding::encode(state));
        }
        url
    }
}
