//! Application error taxonomy.
//!
//! User-facing flows always receive a `{"success": false, "message": ...}`
//! envelope; compensation and notification failures are logged and swallowed
//! by their call sites rather than surfaced here.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Gateway response failed the reverse-hash check. The payload is
    /// untrusted input; nothing status-derived may be acted on.
    #[error("Payment response failed authenticity verification")]
    Authenticity,

    #[error("Payment error: {0}")]
    Payment(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Authenticity => StatusCode::BAD_REQUEST,
            AppError::Payment(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            AppError::Config(_) | AppError::Sqlx(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show the end user. Storage and config details stay in
    /// the logs.
    fn public_message(&self) -> String {
        match self {
            AppError::Sqlx(_) => "Database operation failed".to_string(),
            AppError::Config(_) => "Service misconfiguration".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "responding with error");
        let body = Json(json!({ "success": false, "message": self.public_message() }));
        (self.status_code(), body).into_response()
    }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

impl From<validator::ValidationErrors> for AppError {
    fn from(errs: validator::ValidationErrors) -> Self {
        AppError::Validation(errs.to_string())
    }
}
