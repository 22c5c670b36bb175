//! One-time password reset secrets.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::auth::AuthError;
use crate::auth::password::{hash_password, validate_new_password};
use crate::auth::tokens::{generate_token, hash_token};
use crate::models::auth::OneTimeSecret;
use crate::store::SecretStore;
use crate::uuid::uuidv7;

/// A freshly created secret. `value` is what goes into the reset link.
#[derive(Debug, Clone)]
pub struct IssuedSecret {
    pub value: String,
    pub record: OneTimeSecret,
}

pub struct PasswordResets {
    store: Arc<dyn SecretStore>,
    ttl: Duration,
}

impl PasswordResets {
    pub fn new(store: Arc<dyn SecretStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Create a secret for `subject_id`, replacing any earlier one.
    pub async fn create(&self, subject_id: &str) -> Result<IssuedSecret, AuthError> {
        let now = Utc::now();
        let value = generate_token();
        let record = OneTimeSecret {
            id: uuidv7().to_string(),
            token_hash: hash_token(&value),
            subject_id: subject_id.to_string(),
            expires_at: now + self.ttl,
            used: false,
            created_at: now,
            updated_at: now,
        };
        self.store.replace_for_subject(record.clone()).await?;
        debug!(subject = subject_id, "password reset secret created");
        Ok(IssuedSecret { value, record })
    }

    /// Subject the secret belongs to, if it can still be redeemed.
    pub async fn validate(&self, value: &str) -> Result<String, AuthError> {
        self.validate_at(value, Utc::now()).await
    }

    pub async fn validate_at(&self, value: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
        let secret = self
            .store
            .find_by_hash(&hash_token(value))
            .await?
            .ok_or(AuthError::SecretNotFound)?;
        if secret.used {
            return Err(AuthError::SecretAlreadyUsed);
        }
        if secret.expires_at <= now {
            return Err(AuthError::SecretExpired);
        }
        Ok(secret.subject_id)
    }

    /// Redeem the secret and set the subject's new password in one step.
    /// Returns the subject id.
    pub async fn consume(&self, value: &str, new_password: &str) -> Result<String, AuthError> {
        self.consume_at(value, new_password, Utc::now()).await
    }

    pub async fn consume_at(
        &self,
        value: &str,
        new_password: &str,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        validate_new_password(new_password)?;
        let password_hash = hash_password(new_password)?;
        self.store
            .redeem(&hash_token(value), &password_hash, now)
            .await
    }

    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        self.store.purge_expired(now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::verify_password;
    use crate::store::{MemorySecretStore, MemoryUserStore, UserStore};

    async fn setup() -> (PasswordResets, Arc<MemoryUserStore>, String) {
        let users = Arc::new(MemoryUserStore::new());
        let user = users
            .create_user("nurse@clinic.test", None, "unused", &[])
            .await
            .unwrap();
        let resets = PasswordResets::new(
            Arc::new(MemorySecretStore::new(users.clone())),
            Duration::minutes(15),
        );
        (resets, users, user.subject_id)
    }

    #[tokio::test]
    async fn consumed_secret_is_never_accepted_again() {
        let (resets, users, subject) = setup().await;
        let issued = resets.create(&subject).await.unwrap();
        assert_eq!(resets.validate(&issued.value).await.unwrap(), subject);

        resets.consume(&issued.value, "new-password").await.unwrap();
        let stored = users.find_by_id(&subject).await.unwrap().unwrap();
        assert!(verify_password("new-password", stored.password_hash.as_deref().unwrap()).unwrap());

        assert!(matches!(
            resets.validate(&issued.value).await,
            Err(AuthError::SecretAlreadyUsed)
        ));
        assert!(matches!(
            resets.consume(&issued.value, "another-password").await,
            Err(AuthError::SecretAlreadyUsed)
        ));
    }

    #[tokio::test]
    async fn expired_secret_is_rejected() {
        let (resets, _, subject) = setup().await;
        let issued = resets.create(&subject).await.unwrap();
        let later = Utc::now() + Duration::minutes(16);
        assert!(matches!(
            resets.validate_at(&issued.value, later).await,
            Err(AuthError::SecretExpired)
        ));
        assert!(matches!(
            resets.consume_at(&issued.value, "new-password", later).await,
            Err(AuthError::SecretExpired)
        ));
    }

    #[tokio::test]
    async fn short_password_is_rejected_before_redeeming() {
        let (resets, _, subject) = setup().await;
        let issued = resets.create(&subject).await.unwrap();
        assert!(matches!(
            resets.consume(&issued.value, "short").await,
            Err(AuthError::ValidationError(_))
        ));
        assert!(resets.validate(&issued.value).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_secret_is_not_found() {
        let (resets, _, _) = setup().await;
        assert!(matches!(
            resets.validate("nope").await,
            Err(AuthError::SecretNotFound)
        ));
    }
}
