//! Unified error handling.
//!
//! Every handler returns `Result<T, AppError>`. The error renders as JSON
//! `{"error": "<kind>", "message": "<text>"}` so clients can branch on the kind.

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::repository::RepositoryError;

/// Application-level error taxonomy.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing, malformed, expired or otherwise invalid credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Role or ownership check failed.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Precondition failed or a concurrent writer won the race.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Status change not permitted from the current state.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Malformed input payload.
    #[error("validation error: {0}")]
    Validation(String),

    /// Storage failure.
    #[error("database error: {0}")]
    Database(#[from] RepositoryError),

    /// Any other server-side failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// ErrorBody
///
/// Wire format of every error response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl AppError {
    /// Machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::Validation(_) => "validation_error",
            Self::Database(_) | Self::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::InvalidTransition(_) => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Don't expose internal error details to clients
        let message = match &self {
            Self::Database(_) | Self::Internal(_) => {
                tracing::error!(error = %self, "request failed");
                "internal server error".to_string()
            }
            Self::Unauthorized(msg)
            | Self::Forbidden(msg)
            | Self::NotFound(msg)
            | Self::Conflict(msg)
            | Self::InvalidTransition(msg)
            | Self::Validation(msg) => msg.clone(),
        };

        let body = ErrorBody {
            error: self.kind().to_string(),
            message,
        };

        (self.status_code(), Json(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_status_codes() {
        fn get_status(err: AppError) -> StatusCode {
            err.into_response().status()
        }

        assert_eq!(
            get_status(AppError::Unauthorized("test".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(AppError::Forbidden("test".to_string())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            get_status(AppError::NotFound("test".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::Conflict("test".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(AppError::InvalidTransition("test".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(AppError::Validation("test".to_string())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            get_status(AppError::Internal("test".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let response = AppError::Internal("connection string leaked".to_string()).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(body.error, "internal");
        assert!(!body.message.contains("leaked"));
    }

    #[test]
    fn test_kinds_distinguish_conflict_from_invalid_transition() {
        assert_eq!(AppError::Conflict(String::new()).kind(), "conflict");
        assert_eq!(
            AppError::InvalidTransition(String::new()).kind(),
            "invalid_transition"
        );
    }
}
