//! OAuth token endpoint calls.
//!
//! Handles authorization-code exchange and refresh-token grants.

use super::provider::{OAuthProvider, OAuthProviderConfig};
use crate::error::{DestinationError, Result};
use crate::secret::Secret;
use serde::Deserialize;
use std::collections::HashMap;

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize, Debug, Clone)]
pub struct TokenResponse {
    pub access_token: Secret<String>,
    #[serde(default)]
    pub refresh_token: Option<Secret<String>>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Exchange an authorization code for tokens.
///
/// Codes are single-use, so a rejected exchange is never retried.
pub async fn exchange_code(
    client: &reqwest::Client,
    config: &OAuthProviderConfig,
    client_id: &str,
    client_secret: &str,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenResponse> {
    let scope = config.scope();
    let mut form_data = HashMap::new();
    form_data.insert("grant_type", "authorization_code");
    form_data.insert("code", code);
    form_data.insert("redirect_uri", redirect_uri);
    form_data.insert("client_id", client_id);
    form_data.insert("client_secret", client_secret);
    if config.provider == OAuthProvider::OneDrive {
        form_data.insert("scope", scope.as_str());
    }

    tracing::debug!(provider = %config.provider, "Exchanging authorization code at {}", config.token_url);
    post_token_form(client, &config.token_url, &form_data).await
}

/// Redeem a refresh token for a new access token.
pub async fn refresh(
    client: &reqwest::Client,
    config: &OAuthProviderConfig,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<TokenResponse> {
    let scope = config.scope();
    let mut form_data = HashMap::new();
    form_data.insert("grant_type", "refresh_token");
    form_data.insert("refresh_token", refresh_token);
    form_data.insert("client_id", client_id);
    form_data.insert("client_secret", client_secret);
    if config.provider == OAuthProvider::OneDrive {
        form_data.insert("scope", scope.as_str());
    }

    tracing::debug!(provider = %config.provider, "Refreshing token at {}", config.token_url);
    post_token_form(client, &config.token_url, &form_data).await
}

async fn post_token_form(
    client: &reqwest::Client,
    token_url: &str,
    form_data: &HashMap<&str, &str>,
) -> Result<TokenResponse> {
    let response = client
        .post(token_url)
        .header("Accept", "application/json")
        .form(form_data)
        .send()
        .await
        .map_err(|e| DestinationError::Transport(format!("Failed to reach token endpoint: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(DestinationError::TokenExchange {
            status_code: status.as_u16(),
            provider_body: body,
        });
    }

    let token_response: TokenResponse = response.json().await.map_err(|e| {
        DestinationError::TokenExchange {
            status_code: status.as_u16(),
            provider_body: format!("Unparseable token response: {}", e),
        }
    })?;

    tracing::debug!(
        has_refresh_token = token_response.refresh_token.is_some(),
        expires_in = ?token_response.expires_in,
        "Token endpoint call successful"
    );

    Ok(token_response)
}
