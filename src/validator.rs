//! Connection tests for saved and unsaved destinations.
//!
//! OAuth-backed types need a stored, unexpired token; expired tokens fail the
//! test instead of being refreshed behind the user's back. The other types
//! only get a structural check of their required keys.

use crate::activity::{self, AuditSink, NewActivity};
use crate::context::RequestContext;
use crate::credentials::TokenStore;
use crate::destination::{
    ConfigMap, DestinationStatus, LifecycleManager, StorageConfig, StorageType,
};
use crate::error::{DestinationError, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn, Instrument};

/// Outcome of a connection test. Validation failures are reported here, not
/// as errors.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TestResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Wizard payload for testing a configuration before it is saved.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConnectionTestRequest {
    #[serde(default)]
    pub storage_type: Option<String>,
    #[serde(default)]
    pub destination_type: Option<String>,
    #[serde(default)]
    pub connection_details: ConfigMap,
}

pub struct ConnectionValidator {
    lifecycle: Arc<LifecycleManager>,
    tokens: Arc<TokenStore>,
    audit: Arc<dyn AuditSink>,
}

impl ConnectionValidator {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        tokens: Arc<TokenStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            lifecycle,
            tokens,
            audit,
        }
    }

    /// Tests a saved destination and records the result as its status.
    pub async fn test_destination(&self, ctx: &RequestContext, id: &str) -> Result<TestResult> {
        async {
            let destination = self.lifecycle.get(ctx, id).await?;
            if destination.is_deleted {
                return Err(DestinationError::PreconditionFailed(format!(
                    "Destination {} is deleted",
                    id
                )));
            }

            let outcome = self
                .check(&ctx.owner_id, destination.storage_type, destination.config.expose())
                .await;
            let result = match outcome {
                Ok(message) => TestResult {
                    success: true,
                    message,
                    error: None,
                },
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => TestResult {
                    success: false,
                    message: e.to_string(),
                    error: Some(e.kind().to_string()),
                },
            };

            let status = if result.success {
                DestinationStatus::Active
            } else {
                DestinationStatus::Failed
            };
            self.lifecycle.record_status(id, status).await?;

            self.audit_result(ctx, Some(id), destination.storage_type, &result);
            Ok(result)
        }
        .instrument(ctx.span("connection_test"))
        .await
    }

    /// Tests an unsaved configuration. Writes no destination status.
    pub async fn test_details(
        &self,
        ctx: &RequestContext,
        request: ConnectionTestRequest,
    ) -> Result<TestResult> {
        async {
            let storage_type = match StorageType::resolve(
                request.storage_type.as_deref(),
                request.destination_type.as_deref(),
                &request.connection_details,
            ) {
                Ok(storage_type) => storage_type,
                Err(e) => {
                    warn!(error = %e, "Connection test rejected");
                    return Err(e);
                }
            };

            let result = match self
                .check(&ctx.owner_id, storage_type, &request.connection_details)
                .await
            {
                Ok(message) => TestResult {
                    success: true,
                    message,
                    error: None,
                },
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => TestResult {
                    success: false,
                    message: e.to_string(),
                    error: Some(e.kind().to_string()),
                },
            };

            self.audit_result(ctx, None, storage_type, &result);
            Ok(result)
        }
        .instrument(ctx.span("connection_test_details"))
        .await
    }

    /// Runs the per-type checks and returns the success message.
    async fn check(
        &self,
        owner_id: &str,
        storage_type: StorageType,
        config: &ConfigMap,
    ) -> Result<String> {
        if let Some(provider) = storage_type.oauth_provider() {
            let token = self.tokens.get(owner_id, provider)?.ok_or_else(|| {
                DestinationError::AuthenticationRequired {
                    provider: provider.to_string(),
                }
            })?;
            if let Some(expired_at) = token.expires_at.filter(|_| token.is_expired()) {
                return Err(DestinationError::TokenExpired {
                    provider: provider.to_string(),
                    expired_at,
                });
            }
            return Ok(format!("{} connection verified", display_name(storage_type)));
        }

        StorageConfig::validate(storage_type, config)?;
        Ok(format!(
            "{} configuration is complete",
            display_name(storage_type)
        ))
    }

    fn audit_result(
        &self,
        ctx: &RequestContext,
        destination_id: Option<&str>,
        storage_type: StorageType,
        result: &TestResult,
    ) {
        let event_type = if result.success {
            info!(storage_type = %storage_type, "Connection test succeeded");
            "connection_test_success"
        } else {
            warn!(storage_type = %storage_type, error = ?result.error, "Connection test failed");
            "connection_test_failure"
        };

        let mut entry = NewActivity::new(ctx, event_type, result.message.clone()).details(json!({
            "storage_type": storage_type,
            "error": result.error,
        }));
        if let Some(id) = destination_id {
            entry = entry.destination(id);
        }
        activity::record(self.audit.as_ref(), entry);
    }
}

fn display_name(storage_type: StorageType) -> &'static str {
    match storage_type {
        StorageType::GoogleDrive => "Google Drive",
        StorageType::OneDrive => "Microsoft OneDrive",
        StorageType::AwsS3 => "AWS S3",
        StorageType::Ftp => "FTP",
        StorageType::Sftp => "SFTP",
        StorageType::CustomApi => "Custom API",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityLog;
    use crate::credentials::{Cipher, OAuthToken};
    use crate::destination::{DestinationStore, NewDestination};
    use crate::oauth::OAuthProvider;
    use crate::secret::Secret;
    use chrono::{Duration, Utc};
    use serde_json::Value;

    struct Harness {
        validator: ConnectionValidator,
        lifecycle: Arc<LifecycleManager>,
        tokens: Arc<TokenStore>,
        log: Arc<ActivityLog>,
    }

    fn harness() -> Harness {
        let cipher = Cipher::from_bytes(&[3u8; 32]).unwrap();
        let log = Arc::new(ActivityLog::new(":memory:").unwrap());
        let store = Arc::new(DestinationStore::new(":memory:", cipher.clone()).unwrap());
        let lifecycle = Arc::new(LifecycleManager::new(store, log.clone()));
        let tokens = Arc::new(TokenStore::new(":memory:", cipher).unwrap());
        Harness {
            validator: ConnectionValidator::new(lifecycle.clone(), tokens.clone(), log.clone()),
            lifecycle,
            tokens,
            log,
        }
    }

    fn details(value: Value) -> ConfigMap {
        value.as_object().cloned().unwrap_or_default()
    }

    async fn create(h: &Harness, ctx: &RequestContext, storage_type: &str, config: Value) -> String {
        h.lifecycle
            .create(
                ctx,
                NewDestination {
                    name: format!("{} destination", storage_type),
                    storage_type: Some(storage_type.to_string()),
                    config: details(config),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_custom_api_with_base_url_becomes_active() {
        let h = harness();
        let ctx = RequestContext::new("user1");
        let id = create(&h, &ctx, "custom_api", json!({"baseUrl": "https://hooks.example.com"})).await;

        let result = h.validator.test_destination(&ctx, &id).await.unwrap();
        assert!(result.success);
        assert!(result.error.is_none());

        let d = h.lifecycle.get(&ctx, &id).await.unwrap();
        assert_eq!(d.status, DestinationStatus::Active);

        let events: Vec<String> = h
            .log
            .list_by_destination(&id)
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(events, vec!["destination_created", "connection_test_success"]);
    }

    #[tokio::test]
    async fn test_s3_without_region_fails_and_marks_failed() {
        let h = harness();
        let ctx = RequestContext::new("user1");
        let id = create(
            &h,
            &ctx,
            "aws_s3",
            json!({"accessKey": "AKIA", "secretKey": "s", "bucket": "b"}),
        )
        .await;

        let result = h.validator.test_destination(&ctx, &id).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("incomplete_credentials"));
        assert!(result.message.contains("region"));

        let d = h.lifecycle.get(&ctx, &id).await.unwrap();
        assert_eq!(d.status, DestinationStatus::Failed);
    }

    #[tokio::test]
    async fn test_ftp_key_auth_without_private_key() {
        let h = harness();
        let ctx = RequestContext::new("user1");
        let result = h
            .validator
            .test_details(
                &ctx,
                ConnectionTestRequest {
                    destination_type: Some("FTP/SFTP".to_string()),
                    connection_details: details(
                        json!({"protocol": "sftp", "host": "h", "username": "u", "useKeyAuth": true}),
                    ),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.message.contains("privateKey"));
        assert!(result.message.contains("sftp"));
    }

    #[tokio::test]
    async fn test_ftp_without_password() {
        let h = harness();
        let ctx = RequestContext::new("user1");
        let result = h
            .validator
            .test_details(
                &ctx,
                ConnectionTestRequest {
                    storage_type: Some("ftp".to_string()),
                    connection_details: details(json!({"host": "h", "username": "u"})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.message.contains("password"));
        let recent = h.log.list_by_owner("user1", 1).unwrap();
        assert_eq!(recent[0].event_type, "connection_test_failure");
        assert!(recent[0].destination_id.is_none());
    }

    #[tokio::test]
    async fn test_drive_without_token_requires_authentication() {
        let h = harness();
        let ctx = RequestContext::new("user1");
        let id = create(&h, &ctx, "google_drive", json!({})).await;

        let result = h.validator.test_destination(&ctx, &id).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("authentication_required"));
    }

    #[tokio::test]
    async fn test_expired_token_is_not_refreshed() {
        let h = harness();
        let ctx = RequestContext::new("user1");
        h.tokens
            .upsert(
                "user1",
                OAuthProvider::OneDrive,
                &OAuthToken {
                    access_token: Secret::from("at"),
                    refresh_token: Some(Secret::from("rt")),
                    expires_at: Some(Utc::now() - Duration::minutes(1)),
                },
            )
            .unwrap();
        let id = create(&h, &ctx, "onedrive", json!({})).await;

        let result = h.validator.test_destination(&ctx, &id).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("token_expired"));

        let stored = h.tokens.get("user1", OAuthProvider::OneDrive).unwrap().unwrap();
        assert_eq!(stored.access_token.expose(), "at");
    }

    #[tokio::test]
    async fn test_valid_token_passes() {
        let h = harness();
        let ctx = RequestContext::new("user1");
        h.tokens
            .upsert(
                "user1",
                OAuthProvider::GoogleDrive,
                &OAuthToken {
                    access_token: Secret::from("at"),
                    refresh_token: None,
                    expires_at: None,
                },
            )
            .unwrap();
        let id = create(&h, &ctx, "google_drive", json!({"folderId": "abc"})).await;

        let result = h.validator.test_destination(&ctx, &id).await.unwrap();
        assert!(result.success);
        assert_eq!(
            h.lifecycle.get(&ctx, &id).await.unwrap().status,
            DestinationStatus::Active
        );
    }

    #[tokio::test]
    async fn test_other_owner_cannot_test() {
        let h = harness();
        let id = create(
            &h,
            &RequestContext::new("user1"),
            "custom_api",
            json!({"baseUrl": "https://x"}),
        )
        .await;

        let err = h
            .validator
            .test_destination(&RequestContext::new("user2"), &id)
            .await
            .unwrap_err();
        assert!(matches!(err, DestinationError::NotFound(_)));
    }
}
