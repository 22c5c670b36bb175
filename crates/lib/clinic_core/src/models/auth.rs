//! Authentication domain models.
//!
//! These are internal domain models, distinct from the HTTP request/response
//! models in `clinic_api` (which carry `#[serde(rename)]` for camelCase etc.).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity used to verify a login, owned by the user-management collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginIdentity {
    /// Subject id (user id).
    pub subject_id: String,
    /// Login name (e-mail address).
    pub email: String,
    /// Display name.
    pub name: Option<String>,
    /// bcrypt hash; `None` for accounts that cannot log in with a password.
    pub password_hash: Option<String>,
    /// Role names (e.g. `["admin"]`).
    pub roles: Vec<String>,
}

impl LoginIdentity {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Refresh token record. Only the SHA-256 hash of the opaque value is stored.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RefreshToken {
    pub id: String,
    pub token_hash: String,
    pub subject_id: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    /// Claimed by an in-flight refresh and not yet released.
    pub in_use: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RefreshToken {
    /// Non-revoked and not yet expired at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}

/// One-time secret (password reset token) record.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct OneTimeSecret {
    pub id: String,
    pub token_hash: String,
    pub subject_id: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OneTimeSecret {
    /// Unused and not yet expired at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.used && self.expires_at > now
    }
}

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: user ID (standard JWT `sub` claim).
    pub sub: String,
    /// User email.
    pub email: String,
    /// User roles (e.g. `["admin"]`).
    pub roles: Vec<String>,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Token id, unique per minted token.
    pub jti: String,
}

impl TokenClaims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
