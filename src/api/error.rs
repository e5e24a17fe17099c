//! HTTP mapping for domain errors.

use crate::auth::TokenError;
use crate::error::DestinationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::error;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: &'static str,
}

/// Application error returned by every handler
#[derive(Debug)]
pub enum AppError {
    Domain(DestinationError),
    Unauthorized(String),
    BadRequest(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Domain(e) => match e {
                DestinationError::InvalidInput(_) | DestinationError::IncompleteCredentials { .. } => {
                    StatusCode::BAD_REQUEST
                }
                DestinationError::Unauthorized(_) | DestinationError::AuthenticationRequired { .. } => {
                    StatusCode::UNAUTHORIZED
                }
                DestinationError::NotFound(_) => StatusCode::NOT_FOUND,
                DestinationError::TokenExpired { .. } => StatusCode::CONFLICT,
                DestinationError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
                DestinationError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
                DestinationError::TokenExchange { .. } | DestinationError::Transport(_) => {
                    StatusCode::BAD_GATEWAY
                }
                DestinationError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::Domain(e) => e.kind(),
            AppError::Unauthorized(_) => "unauthorized",
            AppError::BadRequest(_) => "invalid_input",
        }
    }
}

impl From<DestinationError> for AppError {
    fn from(e: DestinationError) -> Self {
        AppError::Domain(e)
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        AppError::Unauthorized(format!("Invalid token: {}", e))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let message = match self {
            AppError::Domain(e) => e.to_string(),
            AppError::Unauthorized(msg) | AppError::BadRequest(msg) => msg,
        };

        if status.is_server_error() {
            error!(kind, status = status.as_u16(), error = %message, "Request failed");
        }

        (
            status,
            Json(ErrorResponse {
                error: message,
                kind,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (DestinationError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                DestinationError::PreconditionFailed("x".into()),
                StatusCode::PRECONDITION_FAILED,
            ),
            (
                DestinationError::TokenExchange {
                    status_code: 400,
                    provider_body: "bad".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                DestinationError::Configuration("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (DestinationError::Storage("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (DestinationError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
        ];
        for (error, status) in cases {
            assert_eq!(AppError::from(error).status(), status);
        }
    }

    #[tokio::test]
    async fn test_body_carries_kind() {
        let response = AppError::from(DestinationError::NotFound("Destination d1 not found".into()))
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["kind"], "not_found");
        assert_eq!(json["error"], "Not found: Destination d1 not found");
    }
}
