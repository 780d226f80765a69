//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and how each variant
//! is rendered over HTTP.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mindhit_core::ai::AiError;
use mindhit_core::lifecycle::InvalidTransition;
use mindhit_core::ports::PortError;
use mindhit_core::SessionStatus;
use serde_json::json;
use tracing::error;

use crate::config::ConfigError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error from the underlying database library at boot.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration Error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} not found")]
    NotFound(String),

    /// The resource exists but belongs to someone else.
    #[error("access denied")]
    NotOwned,

    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    InvalidStateTransition(#[from] InvalidTransition),

    #[error("session is {0} and does not accept events")]
    SessionNotAcceptingEvents(SessionStatus),

    #[error("{0}")]
    Validation(String),

    #[error("token limit reached: {used} of {limit} tokens used")]
    UsageLimitExceeded { used: i64, limit: i64 },

    #[error("AI response is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("all ai providers failed: {0}")]
    AllProvidersFailed(String),

    #[error("storage failure: {0}")]
    Storage(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl From<PortError> for ApiError {
    fn from(e: PortError) -> Self {
        match e {
            PortError::NotFound(what) => ApiError::NotFound(what),
            PortError::Unauthorized => ApiError::Unauthorized,
            PortError::Unexpected(msg) => ApiError::Storage(msg),
        }
    }
}

impl From<AiError> for ApiError {
    fn from(e: AiError) -> Self {
        match e {
            AiError::InvalidJson(msg) => ApiError::InvalidJson(msg),
            other => ApiError::AllProvidersFailed(other.to_string()),
        }
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NotOwned => StatusCode::FORBIDDEN,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::InvalidStateTransition(_) | ApiError::SessionNotAcceptingEvents(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Validation(_) | ApiError::UsageLimitExceeded { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::NotOwned => "FORBIDDEN",
            ApiError::UsageLimitExceeded { .. } => "USAGE_LIMIT_EXCEEDED",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::InvalidStateTransition(_) | ApiError::SessionNotAcceptingEvents(_) => {
                "BAD_REQUEST"
            }
            _ => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Failures a background job may succeed at on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::Storage(_)
                | ApiError::AllProvidersFailed(_)
                | ApiError::UsageLimitExceeded { .. }
                | ApiError::Database(_)
                | ApiError::Io(_)
                | ApiError::Internal(_)
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        let body = json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        });
        (status, Json(body)).into_response()
    }
}
