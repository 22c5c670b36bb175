//! Refresh token lifecycle: issue, look up, claim, release, revoke.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::auth::AuthError;
use crate::auth::tokens::{generate_token, hash_token};
use crate::models::auth::RefreshToken;
use crate::store::RefreshTokenStore;
use crate::uuid::uuidv7;

/// A freshly issued refresh token. `value` is the only copy of the raw token.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub value: String,
    pub record: RefreshToken,
}

pub struct RefreshTokens {
    store: Arc<dyn RefreshTokenStore>,
    ttl: Duration,
}

impl RefreshTokens {
    pub fn new(store: Arc<dyn RefreshTokenStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Issue a token for `subject_id`, revoking every earlier one.
    pub async fn issue(&self, subject_id: &str) -> Result<IssuedRefreshToken, AuthError> {
        let now = Utc::now();
        let value = generate_token();
        let record = RefreshToken {
            id: uuidv7().to_string(),
            token_hash: hash_token(&value),
            subject_id: subject_id.to_string(),
            expires_at: now + self.ttl,
            revoked: false,
            in_use: false,
            created_at: now,
            updated_at: now,
        };
        let revoked = self.store.replace_for_subject(record.clone()).await?;
        debug!(subject = subject_id, revoked, "refresh token issued");
        Ok(IssuedRefreshToken { value, record })
    }

    pub async fn find_by_value(&self, value: &str) -> Result<Option<RefreshToken>, AuthError> {
        self.store.find_by_hash(&hash_token(value)).await
    }

    pub async fn verify_and_consume(&self, value: &str) -> Result<RefreshToken, AuthError> {
        self.verify_and_consume_at(value, Utc::now()).await
    }

    /// Claim the token and check it: expiry first, then revocation.
    ///
    /// A failing token is deleted. A passing one stays claimed until
    /// [`release`](Self::release), so a concurrent consume of the same value
    /// finds nothing.
    pub async fn verify_and_consume_at(
        &self,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshToken, AuthError> {
        let token_hash = hash_token(value);
        let token = self
            .store
            .claim(&token_hash)
            .await?
            .ok_or(AuthError::TokenNotFound)?;
        let rejection = if token.expires_at <= now {
            Some(AuthError::TokenExpired)
        } else if token.revoked {
            Some(AuthError::TokenRevoked)
        } else {
            None
        };
        if let Some(e) = rejection {
            self.store.delete(&token_hash).await?;
            return Err(e);
        }
        Ok(token)
    }

    /// Make a consumed token usable again. Returns `false` when it was revoked
    /// while claimed.
    pub async fn release(&self, token: &RefreshToken) -> Result<bool, AuthError> {
        self.store.release(&token.token_hash).await
    }

    /// Drop a consumed token for good.
    pub async fn discard(&self, token: &RefreshToken) -> Result<(), AuthError> {
        self.store.delete(&token.token_hash).await?;
        Ok(())
    }

    pub async fn revoke_all_for_subject(&self, subject_id: &str) -> Result<u64, AuthError> {
        self.store.revoke_all_for_subject(subject_id).await
    }

    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        self.store.purge_expired(now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRefreshTokenStore;

    fn service() -> RefreshTokens {
        RefreshTokens::new(Arc::new(MemoryRefreshTokenStore::new()), Duration::days(7))
    }

    #[tokio::test]
    async fn issued_value_is_not_stored_in_clear() {
        let tokens = service();
        let issued = tokens.issue("s1").await.unwrap();
        assert_ne!(issued.record.token_hash, issued.value);
        let found = tokens.find_by_value(&issued.value).await.unwrap().unwrap();
        assert_eq!(found, issued.record);
    }

    #[tokio::test]
    async fn new_issue_revokes_previous() {
        let tokens = service();
        let first = tokens.issue("s1").await.unwrap();
        let second = tokens.issue("s1").await.unwrap();
        assert!(matches!(
            tokens.verify_and_consume(&first.value).await,
            Err(AuthError::TokenRevoked)
        ));
        // Fail-fast cleanup: the revoked record is gone.
        assert!(tokens.find_by_value(&first.value).await.unwrap().is_none());
        assert!(tokens.verify_and_consume(&second.value).await.is_ok());
    }

    #[tokio::test]
    async fn expiry_is_checked_before_revocation() {
        let tokens = service();
        let issued = tokens.issue("s1").await.unwrap();
        tokens.revoke_all_for_subject("s1").await.unwrap();
        let later = Utc::now() + Duration::days(8);
        assert!(matches!(
            tokens.verify_and_consume_at(&issued.value, later).await,
            Err(AuthError::TokenExpired)
        ));
        assert!(matches!(
            tokens.verify_and_consume(&issued.value).await,
            Err(AuthError::TokenNotFound)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumes_have_one_success() {
        let tokens = Arc::new(service());
        let issued = tokens.issue("s1").await.unwrap();
        let mut handles = Vec::new();
        for _ in 0..2 {
            let tokens = tokens.clone();
            let value = issued.value.clone();
            handles.push(tokio::spawn(async move {
                tokens.verify_and_consume(&value).await.is_ok()
            }));
        }
        let mut successes = 0;
        for h in handles {
            if h.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_issues_leave_one_live_token() {
        let tokens = Arc::new(service());
        let mut handles = Vec::new();
        for _ in 0..10 {
            let tokens = tokens.clone();
            handles.push(tokio::spawn(async move { tokens.issue("s1").await.unwrap() }));
        }
        let mut issued = Vec::new();
        for h in handles {
            issued.push(h.await.unwrap());
        }
        let mut live = 0;
        for token in &issued {
            if tokens.verify_and_consume(&token.value).await.is_ok() {
                live += 1;
            }
        }
        assert_eq!(live, 1);
    }

    #[tokio::test]
    async fn released_token_keeps_its_value() {
        let tokens = service();
        let issued = tokens.issue("s1").await.unwrap();
        let consumed = tokens.verify_and_consume(&issued.value).await.unwrap();
        assert!(tokens.release(&consumed).await.unwrap());
        let again = tokens.verify_and_consume(&issued.value).await.unwrap();
        assert_eq!(again.expires_at, issued.record.expires_at);
    }

    #[tokio::test]
    async fn revocation_while_claimed_prevents_release() {
        let tokens = service();
        let issued = tokens.issue("s1").await.unwrap();
        let consumed = tokens.verify_and_consume(&issued.value).await.unwrap();

        assert_eq!(tokens.revoke_all_for_subject("s1").await.unwrap(), 1);
        assert!(!tokens.release(&consumed).await.unwrap());
        assert!(matches!(
            tokens.verify_and_consume(&issued.value).await,
            Err(AuthError::TokenNotFound)
        ));
    }
}
