//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use leakvault_common::IngestError;
use serde_json::json;
use thiserror::Error;

use crate::api::response::ErrorResponse;

/// Body returned for every authorization failure. Which check failed is
/// only logged.
pub const NOT_AUTHORIZED: &str = "not authorized";

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Ingest(err) => match err {
                IngestError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                IngestError::MalformedInput(_) => StatusCode::BAD_REQUEST,
                IngestError::NotFound(_) => StatusCode::NOT_FOUND,
                IngestError::AlreadyExists(_) | IngestError::DuplicateEntry(_) => {
                    StatusCode::CONFLICT
                },
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(reason = %self, "Request not authorized");
            return (status, Json(json!({ "error": NOT_AUTHORIZED }))).into_response();
        }

        let (code, message) = match status {
            StatusCode::BAD_REQUEST => ("BAD_REQUEST", self.to_string()),
            StatusCode::NOT_FOUND => ("NOT_FOUND", self.to_string()),
            StatusCode::CONFLICT => ("CONFLICT", self.to_string()),
            StatusCode::SERVICE_UNAVAILABLE => {
                tracing::error!(error = %self, "Dependency unavailable");
                ("UNAVAILABLE", "Service unavailable".to_string())
            },
            _ => {
                tracing::error!(error = %self, "Internal error");
                ("INTERNAL_ERROR", "An internal error occurred".to_string())
            },
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::from(IngestError::Unauthorized("inactive".into())).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::from(IngestError::MalformedInput("hash".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(IngestError::Persistence("pool closed".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::from(IngestError::Rejected("nul byte".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_unauthorized_body_hides_reason() {
        let response =
            AppError::from(IngestError::Unauthorized("platform mismatch".into())).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({ "error": "not authorized" }));
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let response =
            AppError::from(IngestError::Persistence("password=hunter2".into())).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(!String::from_utf8_lossy(&body).contains("hunter2"));
    }
}
