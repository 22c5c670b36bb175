//! PostgreSQL stores.
//!
//! Per-subject critical sections use `pg_advisory_xact_lock(hashtext(subject))`
//! inside a transaction, so they release on commit or rollback.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use super::{RefreshTokenStore, RevocationStore, SecretStore, UserStore};
use crate::auth::AuthError;
use crate::models::auth::{LoginIdentity, OneTimeSecret, RefreshToken};

async fn lock_subject(tx: &mut Transaction<'_, Postgres>, subject_id: &str) -> Result<(), AuthError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(subject_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn roles(&self, user_id: &str) -> Result<Vec<String>, AuthError> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT role::text FROM user_roles WHERE user_id = $1::uuid ORDER BY role",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn identity(
        &self,
        row: Option<(String, String, Option<String>, Option<String>)>,
    ) -> Result<Option<LoginIdentity>, AuthError> {
        let Some((subject_id, email, name, password_hash)) = row else {
            return Ok(None);
        };
        let roles = self.roles(&subject_id).await?;
        Ok(Some(LoginIdentity {
            subject_id,
            email,
            name,
            password_hash,
            roles,
        }))
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_login(&self, email: &str) -> Result<Option<LoginIdentity>, AuthError> {
        let row = sqlx::query_as::<_, (String, String, Option<String>, Option<String>)>(
            "SELECT id::text, email, name, password_hash FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        self.identity(row).await
    }

    async fn find_by_id(&self, subject_id: &str) -> Result<Option<LoginIdentity>, AuthError> {
        let row = sqlx::query_as::<_, (String, String, Option<String>, Option<String>)>(
            "SELECT id::text, email, name, password_hash FROM users WHERE id = $1::uuid",
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;
        self.identity(row).await
    }

    async fn create_user(
        &self,
        email: &str,
        name: Option<&str>,
        password_hash: &str,
        roles: &[&str],
    ) -> Result<LoginIdentity, AuthError> {
        let mut tx = self.pool.begin().await?;
        let subject_id = sqlx::query_scalar::<_, String>(
            "INSERT INTO users (email, name, password_hash) VALUES ($1, $2, $3) RETURNING id::text",
        )
        .bind(email)
        .bind(name)
        .bind(password_hash)
        .fetch_one(&mut *tx)
        .await?;
        for role in roles {
            sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1::uuid, $2::user_role)")
                .bind(&subject_id)
                .bind(*role)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(LoginIdentity {
            subject_id,
            email: email.to_string(),
            name: name.map(str::to_string),
            password_hash: Some(password_hash.to_string()),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// Refresh tokens
// ---------------------------------------------------------------------------

pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert_refresh_token(
    tx: &mut Transaction<'_, Postgres>,
    token: &RefreshToken,
) -> Result<(), AuthError> {
    sqlx::query(
        "INSERT INTO refresh_tokens (id, token_hash, user_id, expires_at, revoked, in_use, created_at, updated_at) \
         VALUES ($1::uuid, $2, $3::uuid, $4, $5, $6, $7, $8)",
    )
    .bind(&token.id)
    .bind(&token.token_hash)
    .bind(&token.subject_id)
    .bind(token.expires_at)
    .bind(token.revoked)
    .bind(token.in_use)
    .bind(token.created_at)
    .bind(token.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn replace_for_subject(&self, token: RefreshToken) -> Result<u64, AuthError> {
        let mut tx = self.pool.begin().await?;
        lock_subject(&mut tx, &token.subject_id).await?;
        let revoked = sqlx::query(
            "UPDATE refresh_tokens SET revoked = true, updated_at = now() \
             WHERE user_id = $1::uuid AND NOT revoked",
        )
        .bind(&token.subject_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        insert_refresh_token(&mut tx, &token).await?;
        tx.commit().await?;
        Ok(revoked)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, AuthError> {
        let row = sqlx::query_as::<_, RefreshToken>(
            "SELECT id::text AS id, token_hash, user_id::text AS subject_id, expires_at, revoked, in_use, created_at, updated_at \
             FROM refresh_tokens WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn claim(&self, token_hash: &str) -> Result<Option<RefreshToken>, AuthError> {
        // Row locking serialises concurrent claims; the loser re-reads `in_use`.
        let row = sqlx::query_as::<_, RefreshToken>(
            "UPDATE refresh_tokens SET in_use = true, updated_at = now() \
             WHERE token_hash = $1 AND NOT in_use \
             RETURNING id::text AS id, token_hash, user_id::text AS subject_id, expires_at, revoked, in_use, created_at, updated_at",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn release(&self, token_hash: &str) -> Result<bool, AuthError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET in_use = false, updated_at = now() \
             WHERE token_hash = $1 AND in_use AND NOT revoked",
        )
        .bind(token_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, token_hash: &str) -> Result<bool, AuthError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_for_subject(&self, subject_id: &str) -> Result<u64, AuthError> {
        let mut tx = self.pool.begin().await?;
        lock_subject(&mut tx, subject_id).await?;
        let revoked = sqlx::query(
            "UPDATE refresh_tokens SET revoked = true, updated_at = now() \
             WHERE user_id = $1::uuid AND NOT revoked",
        )
        .bind(subject_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;
        Ok(revoked)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// Revocation ledger
// ---------------------------------------------------------------------------

pub struct PgRevocationStore {
    pool: PgPool,
}

impl PgRevocationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RevocationStore for PgRevocationStore {
    async fn revoke(&self, token_hash: &str, expires_at: DateTime<Utc>) -> Result<(), AuthError> {
        sqlx::query(
            "INSERT INTO revoked_tokens (token_hash, expires_at) VALUES ($1, $2) \
             ON CONFLICT (token_hash) DO NOTHING",
        )
        .bind(token_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_revoked(&self, token_hash: &str) -> Result<bool, AuthError> {
        let revoked = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM revoked_tokens WHERE token_hash = $1)",
        )
        .bind(token_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(revoked)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// One-time secrets
// ---------------------------------------------------------------------------

pub struct PgSecretStore {
    pool: PgPool,
}

impl PgSecretStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SecretStore for PgSecretStore {
    async fn replace_for_subject(&self, secret: OneTimeSecret) -> Result<(), AuthError> {
        let mut tx = self.pool.begin().await?;
        lock_subject(&mut tx, &secret.subject_id).await?;
        sqlx::query("DELETE FROM password_reset_tokens WHERE user_id = $1::uuid")
            .bind(&secret.subject_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO password_reset_tokens (id, token_hash, user_id, expires_at, used, created_at, updated_at) \
             VALUES ($1::uuid, $2, $3::uuid, $4, $5, $6, $7)",
        )
        .bind(&secret.id)
        .bind(&secret.token_hash)
        .bind(&secret.subject_id)
        .bind(secret.expires_at)
        .bind(secret.used)
        .bind(secret.created_at)
        .bind(secret.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<OneTimeSecret>, AuthError> {
        let row = sqlx::query_as::<_, OneTimeSecret>(
            "SELECT id::text AS id, token_hash, user_id::text AS subject_id, expires_at, used, created_at, updated_at \
             FROM password_reset_tokens WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn redeem(
        &self,
        token_hash: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let mut tx = self.pool.begin().await?;
        let secret = sqlx::query_as::<_, OneTimeSecret>(
            "SELECT id::text AS id, token_hash, user_id::text AS subject_id, expires_at, used, created_at, updated_at \
             FROM password_reset_tokens WHERE token_hash = $1 FOR UPDATE",
        )
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AuthError::SecretNotFound)?;
        if secret.used {
            return Err(AuthError::SecretAlreadyUsed);
        }
        if secret.expires_at <= now {
            return Err(AuthError::SecretExpired);
        }

        let updated = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1::uuid",
        )
        .bind(&secret.subject_id)
        .bind(new_password_hash)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(AuthError::UnknownAccount);
        }
        sqlx::query("UPDATE password_reset_tokens SET used = true, updated_at = $2 WHERE id = $1::uuid")
            .bind(&secret.id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(secret.subject_id)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM password_reset_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
