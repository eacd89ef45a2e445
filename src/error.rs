use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::ports::StoreError;
use crate::providers::ProviderError;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("provider {provider} does not support {operation}")]
    UnsupportedOperation { provider: String, operation: String },

    /// Callback failed its authenticity check. Answered with 401 so the
    /// provider's retry machinery backs off.
    #[error("callback rejected: {0}")]
    Authenticity(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Callback body could not be normalized. Answered with 500 so the
    /// provider redelivers; the idempotency key was not consumed.
    #[error("malformed callback: {0}")]
    MalformedCallback(String),

    #[error("provider rejected the request: {0}")]
    ProviderRejected(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::UnknownProvider(_)
            | AppError::UnsupportedOperation { .. }
            | AppError::ProviderRejected(_) => StatusCode::BAD_REQUEST,
            AppError::Authenticity(_) | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::MalformedCallback(_) | AppError::Store(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unavailable(m) => AppError::ProviderUnavailable(m),
            ProviderError::CircuitOpen => {
                AppError::ProviderUnavailable("circuit breaker is open".to_string())
            }
            ProviderError::Protocol(m) => {
                AppError::ProviderUnavailable(format!("unexpected provider response: {}", m))
            }
            ProviderError::Rejected(m) => AppError::ProviderRejected(m),
            ProviderError::Unsupported {
                provider,
                operation,
            } => AppError::UnsupportedOperation {
                provider,
                operation,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
