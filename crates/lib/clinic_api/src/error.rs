//! Application error types.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use clinic_core::auth::AuthError;
use thiserror::Error;
use tracing::{debug, error};

use crate::models::{ErrorResponse, RateLimitResponse, SimpleErrorResponse};

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// 400 with a bare `{error}` body, used by the password reset endpoints.
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limited: {message}")]
    RateLimited { retry_after_secs: u64, message: String },

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.as_str()),
            AppError::BadRequest(m) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(SimpleErrorResponse { error: m.clone() }),
                )
                    .into_response();
            }
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.as_str()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.as_str()),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.as_str()),
            AppError::RateLimited {
                retry_after_secs,
                message,
            } => {
                return rate_limited_response(*retry_after_secs, message);
            }
            AppError::Internal(detail) => {
                error!("internal error: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                )
            }
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        });
        (status, body).into_response()
    }
}

/// `429` with a `Retry-After` header and the rate limit envelope.
pub fn rate_limited_response(retry_after_secs: u64, message: &str) -> Response {
    let body = Json(RateLimitResponse {
        status_code: StatusCode::TOO_MANY_REQUESTS.as_u16(),
        error: "RATE_LIMIT_EXCEEDED".to_string(),
        message: message.to_string(),
        timestamp: Utc::now().to_rfc3339(),
    });
    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
    response
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".into()),
            _ => AppError::Internal(e.to_string()),
        }
    }
}

/// Token and secret failures collapse into one client-visible message per
/// family; the specific kind is only logged.
impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials => AppError::Unauthorized("Invalid credentials".into()),
            AuthError::RateLimited { retry_after_secs } => AppError::RateLimited {
                retry_after_secs,
                message: "Too many login attempts. Please try again later.".into(),
            },
            AuthError::TokenExpired | AuthError::TokenRevoked | AuthError::TokenNotFound => {
                debug!(kind = e.kind(), "token rejected");
                AppError::Unauthorized("Invalid or expired token".into())
            }
            AuthError::SecretExpired | AuthError::SecretAlreadyUsed | AuthError::SecretNotFound => {
                debug!(kind = e.kind(), "reset secret rejected");
                AppError::BadRequest("Invalid or expired reset token".into())
            }
            AuthError::UnknownAccount => AppError::BadRequest("Email not found".into()),
            AuthError::ValidationError(msg) => AppError::BadRequest(msg),
            AuthError::Signing(msg) => AppError::Internal(msg),
            AuthError::DbError(e) => AppError::from(e),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}
