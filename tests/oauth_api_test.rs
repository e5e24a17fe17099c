// Integration tests for the OAuth consent endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use dataport::activity::ActivityLog;
use dataport::api::{create_destination_router, create_oauth_router, DestinationAppState, OAuthAppState};
use dataport::config::{OAuthConfig, OAuthProviderSettings};
use dataport::credentials::{Cipher, TokenStore};
use dataport::destination::{DestinationStore, LifecycleManager};
use dataport::oauth::{OAuthBroker, OAuthProvider};
use dataport::validator::ConnectionValidator;
use dataport::Secret;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    tokens: Arc<TokenStore>,
}

fn create_test_app(token_url: Option<String>) -> TestApp {
    let settings = OAuthProviderSettings {
        client_id: Some("client-123".to_string()),
        client_secret: Some(Secret::from("client-secret")),
        auth_url: None,
        token_url,
    };
    let oauth = OAuthConfig {
        google_drive: settings.clone(),
        onedrive: settings,
    };

    let cipher = Cipher::from_bytes(&[6u8; 32]).unwrap();
    let log = Arc::new(ActivityLog::new(":memory:").unwrap());
    let tokens = Arc::new(TokenStore::new(":memory:", cipher.clone()).unwrap());
    let store = Arc::new(DestinationStore::new(":memory:", cipher).unwrap());
    let lifecycle = Arc::new(LifecycleManager::new(store, log.clone()));
    let validator = Arc::new(ConnectionValidator::new(lifecycle.clone(), tokens.clone(), log.clone()));
    let broker = Arc::new(OAuthBroker::new(&oauth, tokens.clone(), log, reqwest::Client::new()));

    let router = create_oauth_router(OAuthAppState {
        broker,
        auth_enabled: false,
    })
    .merge(create_destination_router(DestinationAppState {
        lifecycle,
        validator,
        auth_enabled: false,
    }));

    TestApp { router, tokens }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn callback_body(provider: &str) -> Value {
    json!({
        "provider": provider,
        "code": "4/0AX4XfWh",
        "redirectUri": "http://localhost:5173/oauth/callback"
    })
}

/// The authorization URL carries client id, redirect URI, scopes and state.
#[tokio::test]
async fn test_authorize_url_for_google_drive() {
    let app = create_test_app(None);
    let (status, body) = send(
        &app.router,
        "GET",
        "/api/oauth/google_drive/authorize?redirect_uri=http%3A%2F%2Flocalhost%3A5173%2Foauth%2Fcallback&state=wizard-7",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["provider"], "google_drive");

    let url = body["authorization_url"].as_str().unwrap();
    let (base, query) = url.split_once('?').unwrap();
    assert_eq!(base, "https://accounts.google.com/o/oauth2/v2/auth");

    let params: HashMap<String, String> = serde_urlencoded::from_str(query).unwrap();
    assert_eq!(params["client_id"], "client-123");
    assert_eq!(params["redirect_uri"], "http://localhost:5173/oauth/callback");
    assert_eq!(params["scope"], "https://www.googleapis.com/auth/drive.file");
    assert_eq!(params["access_type"], "offline");
    assert_eq!(params["state"], "wizard-7");
}

#[tokio::test]
async fn test_unknown_provider_is_not_found() {
    let app = create_test_app(None);
    let (status, body) = send(
        &app.router,
        "GET",
        "/api/oauth/dropbox/authorize?redirect_uri=http%3A%2F%2Flocalhost",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

/// A successful callback stores one token and lets drive destinations pass
/// their connection test.
#[tokio::test]
async fn test_callback_persists_token_and_enables_drive_destination() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()))
        .with_status(200)
        .with_body(r#"{"access_token": "ya29.a0", "refresh_token": "1//0g", "expires_in": 3599, "token_type": "Bearer"}"#)
        .expect(2)
        .create_async()
        .await;
    let app = create_test_app(Some(format!("{}/token", server.url())));

    for _ in 0..2 {
        let (status, body) = send(&app.router, "POST", "/api/oauth/callback", Some(callback_body("google_drive"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["expires_in"], 3599);
    }
    mock.assert_async().await;

    let (_, connections) = send(&app.router, "GET", "/api/oauth/connections", None).await;
    assert_eq!(connections["providers"], json!(["google_drive"]));
    let token = app.tokens.get("default", OAuthProvider::GoogleDrive).unwrap().unwrap();
    assert_eq!(token.access_token.expose(), "ya29.a0");

    let (_, created) = send(
        &app.router,
        "POST",
        "/api/destinations",
        Some(json!({"name": "Team drive", "destination_type": "Google Drive", "config": {"folderId": "f1"}})),
    )
    .await;
    let id = created["id"].as_str().unwrap();
    let (status, result) = send(&app.router, "POST", &format!("/api/destinations/{}/test", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["success"], true);
}

/// A rejected code surfaces the provider body and stores nothing.
#[tokio::test]
async fn test_rejected_code_is_bad_gateway() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/token")
        .with_status(400)
        .with_body(r#"{"error": "invalid_grant", "error_description": "Bad Request"}"#)
        .create_async()
        .await;
    let app = create_test_app(Some(format!("{}/token", server.url())));

    let (status, body) = send(&app.router, "POST", "/api/oauth/callback", Some(callback_body("onedrive"))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["kind"], "token_exchange_failed");
    assert!(body["error"].as_str().unwrap().contains("invalid_grant"));
    assert!(app.tokens.get("default", OAuthProvider::OneDrive).unwrap().is_none());
}

/// Refresh without a stored token asks the user to reconnect.
#[tokio::test]
async fn test_refresh_without_token_requires_authentication() {
    let app = create_test_app(None);
    let (status, body) = send(&app.router, "POST", "/api/oauth/onedrive/refresh", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "authentication_required");
}

#[tokio::test]
async fn test_disconnect_removes_token() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/token")
        .with_status(200)
        .with_body(r#"{"access_token": "EwB4A8l6", "expires_in": 3600}"#)
        .create_async()
        .await;
    let app = create_test_app(Some(format!("{}/token", server.url())));
    send(&app.router, "POST", "/api/oauth/callback", Some(callback_body("onedrive"))).await;

    let (status, body) = send(&app.router, "DELETE", "/api/oauth/onedrive", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (_, body) = send(&app.router, "DELETE", "/api/oauth/onedrive", None).await;
    assert_eq!(body["success"], false);

    let (_, connections) = send(&app.router, "GET", "/api/oauth/connections", None).await;
    assert_eq!(connections["providers"], json!([]));
}
