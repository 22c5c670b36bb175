//! Authentication primitives.
//!
//! Provides password hashing, JWT management and opaque token helpers shared
//! by the session services and `clinic_api`.

pub mod jwt;
pub mod password;
pub mod tokens;

use thiserror::Error;

/// Authentication errors.
///
/// Token and secret failures keep their specific kind for logging and audit;
/// the HTTP layer collapses each family into a single client-visible message.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Token expired")]
    TokenExpired,

    #[error("Token revoked")]
    TokenRevoked,

    #[error("Token not found")]
    TokenNotFound,

    #[error("Secret expired")]
    SecretExpired,

    #[error("Secret already used")]
    SecretAlreadyUsed,

    #[error("Secret not found")]
    SecretNotFound,

    #[error("Unknown account")]
    UnknownAccount,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Short machine-readable kind, used in logs and audit details.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::RateLimited { .. } => "RATE_LIMITED",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::TokenRevoked => "TOKEN_REVOKED",
            AuthError::TokenNotFound => "TOKEN_NOT_FOUND",
            AuthError::SecretExpired => "SECRET_EXPIRED",
            AuthError::SecretAlreadyUsed => "SECRET_ALREADY_USED",
            AuthError::SecretNotFound => "SECRET_NOT_FOUND",
            AuthError::UnknownAccount => "UNKNOWN_ACCOUNT",
            AuthError::ValidationError(_) => "VALIDATION_ERROR",
            AuthError::Signing(_) => "SIGNING_ERROR",
            AuthError::DbError(_) => "DB_ERROR",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
