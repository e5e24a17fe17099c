//! OAuth consent broker for the drive providers.
//!
//! The broker keeps no per-attempt state: the client walks
//! `Idle -> AuthorizationRequested -> AwaitingCallback -> (TokenExchanged | Error)`
//! on its own, and only the final token write is durable. A fresh attempt
//! simply supersedes an abandoned one.

pub mod exchange;
pub mod provider;

pub use exchange::TokenResponse;
pub use provider::{OAuthProvider, OAuthProviderConfig};

use crate::activity::{self, AuditSink, NewActivity};
use crate::config::OAuthConfig;
use crate::context::RequestContext;
use crate::credentials::{OAuthToken, TokenStore};
use crate::error::{DestinationError, Result};
use crate::secret::Secret;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn, Instrument};

/// Callback payload relayed by the UI after the provider redirect.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackRequest {
    pub provider: OAuthProvider,
    pub code: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CallbackResponse {
    pub success: bool,
    pub provider: OAuthProvider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

pub struct OAuthBroker {
    providers: HashMap<OAuthProvider, OAuthProviderConfig>,
    tokens: Arc<TokenStore>,
    audit: Arc<dyn AuditSink>,
    http: reqwest::Client,
}

impl OAuthBroker {
    pub fn new(
        config: &OAuthConfig,
        tokens: Arc<TokenStore>,
        audit: Arc<dyn AuditSink>,
        http: reqwest::Client,
    ) -> Self {
        let providers = [OAuthProvider::GoogleDrive, OAuthProvider::OneDrive]
            .into_iter()
            .map(|p| (p, OAuthProviderConfig::from_settings(p, config.provider(p))))
            .collect();
        Self {
            providers,
            tokens,
            audit,
            http,
        }
    }

    /// Builds the consent URL. No side effects.
    pub fn build_authorization_url(
        &self,
        provider: OAuthProvider,
        redirect_uri: &str,
        state: Option<&str>,
    ) -> Result<String> {
        let config = self.provider_config(provider)?;
        let client_id = client_id(config)?;
        Ok(config.build_auth_url(client_id, redirect_uri, state))
    }

    /// Exchanges an authorization code. Does not persist anything.
    pub async fn exchange_code(
        &self,
        provider: OAuthProvider,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse> {
        let config = self.provider_config(provider)?;
        let client_id = client_id(config)?;
        let client_secret = client_secret(config)?;
        exchange::exchange_code(
            &self.http,
            config,
            client_id,
            client_secret.expose(),
            code,
            redirect_uri,
        )
        .await
    }

    /// Upserts the token for (owner, provider) and audits the exchange.
    pub async fn persist_token(
        &self,
        ctx: &RequestContext,
        provider: OAuthProvider,
        response: &TokenResponse,
    ) -> Result<OAuthToken> {
        let token = OAuthToken {
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone(),
            expires_at: response
                .expires_in
                .map(|seconds| Utc::now() + Duration::seconds(seconds)),
        };

        self.tokens.upsert(&ctx.owner_id, provider, &token)?;

        info!(provider = %provider, expires_at = ?token.expires_at, "OAuth token stored");
        activity::record(
            self.audit.as_ref(),
            NewActivity::new(ctx, "oauth_token_exchange", format!("Connected {}", provider)).details(
                json!({
                    "provider": provider,
                    "has_refresh_token": token.refresh_token.is_some(),
                    "expires_at": token.expires_at,
                }),
            ),
        );
        Ok(token)
    }

    /// Exchange followed by persist, as driven by the callback page.
    pub async fn complete_callback(
        &self,
        ctx: &RequestContext,
        request: CallbackRequest,
    ) -> Result<CallbackResponse> {
        let provider = request.provider;
        async {
            let result = async {
                let response = self
                    .exchange_code(provider, &request.code, &request.redirect_uri)
                    .await?;
                self.persist_token(ctx, provider, &response).await?;
                Ok::<_, DestinationError>(response.expires_in)
            }
            .await;

            match result {
                Ok(expires_in) => Ok(CallbackResponse {
                    success: true,
                    provider,
                    expires_in,
                }),
                Err(e) => Err(self.fail(ctx, "oauth_token_exchange_error", provider, e)),
            }
        }
        .instrument(ctx.span("oauth_callback"))
        .await
    }

    /// User-initiated refresh with the stored refresh token. The old refresh
    /// token is kept when the provider does not rotate it.
    pub async fn refresh_token(
        &self,
        ctx: &RequestContext,
        provider: OAuthProvider,
    ) -> Result<CallbackResponse> {
        async {
            let result = async {
                let stored = self
                    .tokens
                    .get(&ctx.owner_id, provider)?
                    .ok_or_else(|| DestinationError::AuthenticationRequired {
                        provider: provider.to_string(),
                    })?;
                let refresh_token = stored.refresh_token.clone().ok_or_else(|| {
                    DestinationError::AuthenticationRequired {
                        provider: provider.to_string(),
                    }
                })?;

                let config = self.provider_config(provider)?;
                let client_id = client_id(config)?;
                let client_secret = client_secret(config)?;
                let response = exchange::refresh(
                    &self.http,
                    config,
                    client_id,
                    client_secret.expose(),
                    refresh_token.expose(),
                )
                .await?;

                let token = OAuthToken {
                    access_token: response.access_token.clone(),
                    refresh_token: response.refresh_token.clone().or(Some(refresh_token)),
                    expires_at: response
                        .expires_in
                        .map(|seconds| Utc::now() + Duration::seconds(seconds)),
                };
                self.tokens.upsert(&ctx.owner_id, provider, &token)?;
                Ok::<_, DestinationError>(response.expires_in)
            }
            .await;

            match result {
                Ok(expires_in) => {
                    info!(provider = %provider, "OAuth token refreshed");
                    activity::record(
                        self.audit.as_ref(),
                        NewActivity::new(ctx, "oauth_token_refreshed", format!("Refreshed {} token", provider))
                            .details(json!({ "provider": provider, "expires_in": expires_in })),
                    );
                    Ok(CallbackResponse {
                        success: true,
                        provider,
                        expires_in,
                    })
                }
                Err(e) => Err(self.fail(ctx, "oauth_token_refresh_error", provider, e)),
            }
        }
        .instrument(ctx.span("oauth_refresh"))
        .await
    }

    /// Removes the stored token. Returns whether one existed.
    pub async fn disconnect(&self, ctx: &RequestContext, provider: OAuthProvider) -> Result<bool> {
        let removed = match self.tokens.delete(&ctx.owner_id, provider) {
            Ok(removed) => removed,
            Err(e) => return Err(self.fail(ctx, "oauth_token_revoke_error", provider, e.into())),
        };
        if removed {
            info!(owner_id = %ctx.owner_id, provider = %provider, "OAuth token revoked");
            activity::record(
                self.audit.as_ref(),
                NewActivity::new(ctx, "oauth_token_revoked", format!("Disconnected {}", provider))
                    .details(json!({ "provider": provider })),
            );
        }
        Ok(removed)
    }

    /// Providers the caller has a stored token for.
    pub async fn connected_providers(&self, ctx: &RequestContext) -> Result<Vec<String>> {
        Ok(self.tokens.list_by_owner(&ctx.owner_id)?)
    }

    fn provider_config(&self, provider: OAuthProvider) -> Result<&OAuthProviderConfig> {
        self.providers.get(&provider).ok_or_else(|| {
            DestinationError::Configuration(format!("OAuth provider {} is not configured", provider))
        })
    }

    fn fail(
        &self,
        ctx: &RequestContext,
        event_type: &str,
        provider: OAuthProvider,
        error: DestinationError,
    ) -> DestinationError {
        warn!(provider = %provider, error = %error, "OAuth operation failed");
        activity::record(
            self.audit.as_ref(),
            NewActivity::new(ctx, event_type, error.to_string())
                .details(json!({ "provider": provider, "kind": error.kind() })),
        );
        error
    }
}

fn client_id(config: &OAuthProviderConfig) -> Result<&str> {
    config.client_id.as_deref().ok_or_else(|| {
        DestinationError::Configuration(format!(
            "OAuth client id for {} is not set (DATAPORT_OAUTH_{}_CLIENT_ID)",
            config.provider,
            config.provider.as_str().to_uppercase()
        ))
    })
}

fn client_secret(config: &OAuthProviderConfig) -> Result<&Secret<String>> {
    config.client_secret.as_ref().ok_or_else(|| {
        DestinationError::Configuration(format!(
            "OAuth client secret for {} is not set (DATAPORT_OAUTH_{}_CLIENT_SECRET)",
            config.provider,
            config.provider.as_str().to_uppercase()
        ))
    })
}
