//! Error types and error handling for the application
//!
//! This module defines custom error types that can be converted to HTTP responses.
//! All errors implement `IntoResponse` to provide consistent error formatting.

use crate::chat::StoreError;
use crate::orchestrator::run_context::Superseded;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level error types
///
/// All errors that can occur in the application are represented by this enum.
/// Each variant implements automatic conversion to HTTP responses via `IntoResponse`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Request text or body is unusable
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Conversation has no run
    #[error("No run found for conversation {0}")]
    RunNotFound(String),

    /// The addressed run is no longer the conversation's active run
    #[error("Run superseded: {0}")]
    RunSuperseded(String),

    /// The run was already finalized
    #[error("Run already finalized: {0}")]
    RunAlreadyFinalized(String),

    /// Configuration update failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Conversation store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Internal server error (catch-all for unexpected errors)
    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<Superseded> for AppError {
    fn from(err: Superseded) -> Self {
        AppError::RunSuperseded(err.to_string())
    }
}

impl AppError {
    /// HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::RunNotFound(_) => StatusCode::NOT_FOUND,
            AppError::RunSuperseded(_) => StatusCode::CONFLICT,
            AppError::RunAlreadyFinalized(_) => StatusCode::CONFLICT,
            AppError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::InvalidRequest("empty".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::RunNotFound("conv-1".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::RunAlreadyFinalized("1".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Store(StoreError::Unavailable("down".to_string())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_error_body() {
        let response = AppError::RunSuperseded("run 1".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], 409);
        assert_eq!(body["error"], "Run superseded: run 1");
    }
}
