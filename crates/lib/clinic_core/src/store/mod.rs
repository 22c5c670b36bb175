//! Persistence seams for the session core.
//!
//! Each record family sits behind its own trait so the session services can
//! run against PostgreSQL in production and in-process maps in tests or
//! single-node deployments. Implementations own the atomicity each method
//! promises; callers never compose multi-step transactions themselves.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::auth::AuthError;
use crate::models::auth::{LoginIdentity, OneTimeSecret, RefreshToken};

pub use memory::{MemoryRefreshTokenStore, MemoryRevocationStore, MemorySecretStore, MemoryUserStore};
pub use postgres::{PgRefreshTokenStore, PgRevocationStore, PgSecretStore, PgUserStore};

/// Read access to login identities plus the credential update used by
/// password reset.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_login(&self, email: &str) -> Result<Option<LoginIdentity>, AuthError>;

    async fn find_by_id(&self, subject_id: &str) -> Result<Option<LoginIdentity>, AuthError>;

    async fn create_user(
        &self,
        email: &str,
        name: Option<&str>,
        password_hash: &str,
        roles: &[&str],
    ) -> Result<LoginIdentity, AuthError>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Revoke every token of `token.subject_id` and insert `token`, as one
    /// step per subject. Returns the number of tokens revoked.
    async fn replace_for_subject(&self, token: RefreshToken) -> Result<u64, AuthError>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, AuthError>;

    /// Mark the record in use and return it. At most one concurrent caller
    /// gets it; the record stays visible to revocation while claimed.
    async fn claim(&self, token_hash: &str) -> Result<Option<RefreshToken>, AuthError>;

    /// Clear the in-use mark unless the record was revoked or removed since
    /// it was claimed. Returns whether the record is usable again.
    async fn release(&self, token_hash: &str) -> Result<bool, AuthError>;

    async fn delete(&self, token_hash: &str) -> Result<bool, AuthError>;

    /// Revoke every token of the subject, claimed ones included, under the
    /// same per-subject critical section as `replace_for_subject`.
    async fn revoke_all_for_subject(&self, subject_id: &str) -> Result<u64, AuthError>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError>;
}

/// Hashes of access tokens revoked before their natural expiry.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    async fn revoke(&self, token_hash: &str, expires_at: DateTime<Utc>) -> Result<(), AuthError>;

    async fn is_revoked(&self, token_hash: &str) -> Result<bool, AuthError>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Delete any prior secret of the subject and insert `secret`.
    async fn replace_for_subject(&self, secret: OneTimeSecret) -> Result<(), AuthError>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<OneTimeSecret>, AuthError>;

    /// Validate the secret, store `new_password_hash` for its subject and mark
    /// the secret used, all in one step. Returns the subject id.
    ///
    /// Fails with `SecretNotFound`, `SecretAlreadyUsed` or `SecretExpired`,
    /// checked in that order.
    async fn redeem(
        &self,
        token_hash: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError>;

    /// Delete expired secrets, used or not.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError>;
}

/// The full set of stores the session services run on.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub revocations: Arc<dyn RevocationStore>,
    pub secrets: Arc<dyn SecretStore>,
}

impl Stores {
    /// In-process stores. State is lost on restart.
    pub fn memory() -> Self {
        let users = Arc::new(MemoryUserStore::new());
        Self {
            secrets: Arc::new(MemorySecretStore::new(users.clone())),
            users,
            refresh_tokens: Arc::new(MemoryRefreshTokenStore::new()),
            revocations: Arc::new(MemoryRevocationStore::new()),
        }
    }

    /// PostgreSQL-backed stores sharing one pool.
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(PgUserStore::new(pool.clone())),
            refresh_tokens: Arc::new(PgRefreshTokenStore::new(pool.clone())),
            revocations: Arc::new(PgRevocationStore::new(pool.clone())),
            secrets: Arc::new(PgSecretStore::new(pool)),
        }
    }
}
