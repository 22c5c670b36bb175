//! In-process stores on `dashmap`.
//!
//! Per-subject atomicity comes from holding the subject's entry (and so its
//! shard lock) for the whole operation. Secondary hash indexes are only
//! written while that entry is held. Lock order is secrets, then users; the
//! refresh token index is never held while acquiring a subject entry.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{RefreshTokenStore, RevocationStore, SecretStore, UserStore};
use crate::auth::AuthError;
use crate::models::auth::{LoginIdentity, OneTimeSecret, RefreshToken};
use crate::uuid::uuidv7;

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: DashMap<String, LoginIdentity>,
    by_login: DashMap<String, String>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored password hash for a subject.
    pub fn set_password(&self, subject_id: &str, password_hash: &str) -> Result<(), AuthError> {
        let mut user = self
            .users
            .get_mut(subject_id)
            .ok_or(AuthError::UnknownAccount)?;
        user.password_hash = Some(password_hash.to_string());
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_login(&self, email: &str) -> Result<Option<LoginIdentity>, AuthError> {
        let Some(id) = self.by_login.get(email).map(|id| id.value().clone()) else {
            return Ok(None);
        };
        Ok(self.users.get(&id).map(|u| u.value().clone()))
    }

    async fn find_by_id(&self, subject_id: &str) -> Result<Option<LoginIdentity>, AuthError> {
        Ok(self.users.get(subject_id).map(|u| u.value().clone()))
    }

    async fn create_user(
        &self,
        email: &str,
        name: Option<&str>,
        password_hash: &str,
        roles: &[&str],
    ) -> Result<LoginIdentity, AuthError> {
        match self.by_login.entry(email.to_string()) {
            Entry::Occupied(_) => Err(AuthError::ValidationError(
                "Email already registered".into(),
            )),
            Entry::Vacant(slot) => {
                let identity = LoginIdentity {
                    subject_id: uuidv7().to_string(),
                    email: email.to_string(),
                    name: name.map(str::to_string),
                    password_hash: Some(password_hash.to_string()),
                    roles: roles.iter().map(|r| r.to_string()).collect(),
                };
                self.users
                    .insert(identity.subject_id.clone(), identity.clone());
                slot.insert(identity.subject_id.clone());
                Ok(identity)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Refresh tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryRefreshTokenStore {
    by_subject: DashMap<String, Vec<RefreshToken>>,
    /// token hash -> subject id
    index: DashMap<String, String>,
}

impl MemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop records revoked by an earlier call, then revoke the rest. Keeps at
    /// most one generation of revoked records per subject between sweeps.
    fn revoke_in_place(&self, tokens: &mut Vec<RefreshToken>) -> u64 {
        tokens.retain(|t| {
            if t.revoked {
                self.index.remove(&t.token_hash);
            }
            !t.revoked
        });
        let now = Utc::now();
        for token in tokens.iter_mut() {
            token.revoked = true;
            token.updated_at = now;
        }
        tokens.len() as u64
    }

    fn subject_of(&self, token_hash: &str) -> Option<String> {
        self.index.get(token_hash).map(|s| s.value().clone())
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshTokenStore {
    async fn replace_for_subject(&self, token: RefreshToken) -> Result<u64, AuthError> {
        let mut tokens = self
            .by_subject
            .entry(token.subject_id.clone())
            .or_default();
        let revoked = self.revoke_in_place(&mut tokens);
        self.index
            .insert(token.token_hash.clone(), token.subject_id.clone());
        tokens.push(token);
        Ok(revoked)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, AuthError> {
        let Some(subject) = self.subject_of(token_hash) else {
            return Ok(None);
        };
        Ok(self.by_subject.get(&subject).and_then(|tokens| {
            tokens.iter().find(|t| t.token_hash == token_hash).cloned()
        }))
    }

    async fn claim(&self, token_hash: &str) -> Result<Option<RefreshToken>, AuthError> {
        let Some(subject) = self.subject_of(token_hash) else {
            return Ok(None);
        };
        let Some(mut tokens) = self.by_subject.get_mut(&subject) else {
            return Ok(None);
        };
        let claimed = tokens
            .iter_mut()
            .find(|t| t.token_hash == token_hash && !t.in_use)
            .map(|t| {
                t.in_use = true;
                t.clone()
            });
        Ok(claimed)
    }

    async fn release(&self, token_hash: &str) -> Result<bool, AuthError> {
        let Some(subject) = self.subject_of(token_hash) else {
            return Ok(false);
        };
        let Some(mut tokens) = self.by_subject.get_mut(&subject) else {
            return Ok(false);
        };
        match tokens
            .iter_mut()
            .find(|t| t.token_hash == token_hash && t.in_use && !t.revoked)
        {
            Some(token) => {
                token.in_use = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, token_hash: &str) -> Result<bool, AuthError> {
        let Some(subject) = self.subject_of(token_hash) else {
            return Ok(false);
        };
        let Some(mut tokens) = self.by_subject.get_mut(&subject) else {
            return Ok(false);
        };
        let before = tokens.len();
        tokens.retain(|t| t.token_hash != token_hash);
        self.index.remove(token_hash);
        Ok(tokens.len() < before)
    }

    async fn revoke_all_for_subject(&self, subject_id: &str) -> Result<u64, AuthError> {
        Ok(self
            .by_subject
            .get_mut(subject_id)
            .map(|mut tokens| self.revoke_in_place(&mut tokens))
            .unwrap_or(0))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let mut purged = 0;
        self.by_subject.retain(|_, tokens| {
            tokens.retain(|t| {
                let keep = t.expires_at > now;
                if !keep {
                    self.index.remove(&t.token_hash);
                    purged += 1;
                }
                keep
            });
            !tokens.is_empty()
        });
        Ok(purged)
    }
}

// ---------------------------------------------------------------------------
// Revocation ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryRevocationStore {
    entries: DashMap<String, DateTime<Utc>>,
}

impl MemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn revoke(&self, token_hash: &str, expires_at: DateTime<Utc>) -> Result<(), AuthError> {
        self.entries
            .entry(token_hash.to_string())
            .or_insert(expires_at);
        Ok(())
    }

    async fn is_revoked(&self, token_hash: &str) -> Result<bool, AuthError> {
        Ok(self.entries.contains_key(token_hash))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at >= now);
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// One-time secrets
// ---------------------------------------------------------------------------

pub struct MemorySecretStore {
    by_subject: DashMap<String, OneTimeSecret>,
    /// secret hash -> subject id
    index: DashMap<String, String>,
    users: Arc<MemoryUserStore>,
}

impl MemorySecretStore {
    pub fn new(users: Arc<MemoryUserStore>) -> Self {
        Self {
            by_subject: DashMap::new(),
            index: DashMap::new(),
            users,
        }
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn replace_for_subject(&self, secret: OneTimeSecret) -> Result<(), AuthError> {
        let mut slot = self
            .by_subject
            .entry(secret.subject_id.clone())
            .or_insert_with(|| secret.clone());
        if slot.token_hash != secret.token_hash {
            self.index.remove(&slot.token_hash);
            *slot = secret.clone();
        }
        self.index.insert(secret.token_hash, secret.subject_id);
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<OneTimeSecret>, AuthError> {
        let Some(subject) = self.index.get(token_hash).map(|s| s.value().clone()) else {
            return Ok(None);
        };
        Ok(self
            .by_subject
            .get(&subject)
            .filter(|s| s.token_hash == token_hash)
            .map(|s| s.value().clone()))
    }

    async fn redeem(
        &self,
        token_hash: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let subject = self
            .index
            .get(token_hash)
            .map(|s| s.value().clone())
            .ok_or(AuthError::SecretNotFound)?;
        let mut secret = self
            .by_subject
            .get_mut(&subject)
            .filter(|s| s.token_hash == token_hash)
            .ok_or(AuthError::SecretNotFound)?;
        if secret.used {
            return Err(AuthError::SecretAlreadyUsed);
        }
        if secret.expires_at <= now {
            return Err(AuthError::SecretExpired);
        }
        self.users.set_password(&subject, new_password_hash)?;
        secret.used = true;
        secret.updated_at = now;
        Ok(subject)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let mut purged = 0;
        self.by_subject.retain(|_, secret| {
            let keep = secret.expires_at > now;
            if !keep {
                self.index.remove(&secret.token_hash);
                purged += 1;
            }
            keep
        });
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn refresh_token(subject: &str, hash: &str, expires_at: DateTime<Utc>) -> RefreshToken {
        let now = Utc::now();
        RefreshToken {
            id: uuidv7().to_string(),
            token_hash: hash.to_string(),
            subject_id: subject.to_string(),
            expires_at,
            revoked: false,
            in_use: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn secret(subject: &str, hash: &str, expires_at: DateTime<Utc>) -> OneTimeSecret {
        let now = Utc::now();
        OneTimeSecret {
            id: uuidv7().to_string(),
            token_hash: hash.to_string(),
            subject_id: subject.to_string(),
            expires_at,
            used: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn create_user_rejects_duplicate_login() {
        let users = MemoryUserStore::new();
        let created = users
            .create_user("a@clinic.test", Some("A"), "hash", &["admin"])
            .await
            .unwrap();
        assert!(created.has_role("admin"));
        let found = users.find_by_login("a@clinic.test").await.unwrap().unwrap();
        assert_eq!(found.subject_id, created.subject_id);
        assert!(
            users
                .create_user("a@clinic.test", None, "hash", &[])
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn replace_revokes_prior_tokens() {
        let store = MemoryRefreshTokenStore::new();
        let exp = Utc::now() + Duration::days(7);
        assert_eq!(store.replace_for_subject(refresh_token("s", "h1", exp)).await.unwrap(), 0);
        assert_eq!(store.replace_for_subject(refresh_token("s", "h2", exp)).await.unwrap(), 1);
        assert!(store.find_by_hash("h1").await.unwrap().unwrap().revoked);
        assert!(!store.find_by_hash("h2").await.unwrap().unwrap().revoked);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_replacements_leave_one_live_token() {
        let store = Arc::new(MemoryRefreshTokenStore::new());
        let exp = Utc::now() + Duration::days(7);
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .replace_for_subject(refresh_token("s", &format!("h{i}"), exp))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let now = Utc::now();
        let tokens = store.by_subject.get("s").unwrap().value().clone();
        assert_eq!(tokens.iter().filter(|t| t.is_live(now)).count(), 1);
    }

    #[tokio::test]
    async fn repeated_logins_do_not_accumulate_revoked_records() {
        let store = MemoryRefreshTokenStore::new();
        let exp = Utc::now() + Duration::days(7);
        for i in 0..50 {
            store
                .replace_for_subject(refresh_token("s", &format!("h{i}"), exp))
                .await
                .unwrap();
        }
        assert_eq!(store.by_subject.get("s").unwrap().len(), 2);
        assert_eq!(store.index.len(), 2);
        // The most recently replaced token still reports as revoked.
        assert!(store.find_by_hash("h48").await.unwrap().unwrap().revoked);
        assert!(store.find_by_hash("h0").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claim_has_one_winner() {
        let store = Arc::new(MemoryRefreshTokenStore::new());
        let exp = Utc::now() + Duration::days(7);
        store.replace_for_subject(refresh_token("s", "h", exp)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.claim("h").await.unwrap() }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(store.find_by_hash("h").await.unwrap().unwrap().in_use);
        assert!(store.release("h").await.unwrap());
        assert!(store.claim("h").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn release_fails_after_newer_login() {
        let store = MemoryRefreshTokenStore::new();
        let exp = Utc::now() + Duration::days(7);
        store.replace_for_subject(refresh_token("s", "old", exp)).await.unwrap();
        store.claim("old").await.unwrap().unwrap();
        store.replace_for_subject(refresh_token("s", "new", exp)).await.unwrap();
        assert!(!store.release("old").await.unwrap());
        assert!(store.find_by_hash("old").await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn revoke_all_reaches_claimed_tokens() {
        let store = MemoryRefreshTokenStore::new();
        let exp = Utc::now() + Duration::days(7);
        store.replace_for_subject(refresh_token("s", "h", exp)).await.unwrap();
        store.claim("h").await.unwrap().unwrap();
        assert_eq!(store.revoke_all_for_subject("s").await.unwrap(), 1);
        assert!(!store.release("h").await.unwrap());
        assert!(store.delete("h").await.unwrap());
        assert!(store.find_by_hash("h").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_drops_expired_tokens() {
        let store = MemoryRefreshTokenStore::new();
        let now = Utc::now();
        store
            .replace_for_subject(refresh_token("a", "expired", now - Duration::seconds(1)))
            .await
            .unwrap();
        store
            .replace_for_subject(refresh_token("b", "live", now + Duration::days(1)))
            .await
            .unwrap();
        assert_eq!(store.purge_expired(now).await.unwrap(), 1);
        assert!(store.find_by_hash("expired").await.unwrap().is_none());
        assert!(store.find_by_hash("live").await.unwrap().is_some());
        assert!(store.by_subject.get("a").is_none());
    }

    #[tokio::test]
    async fn revocation_entries_purge_after_expiry() {
        let ledger = MemoryRevocationStore::new();
        let now = Utc::now();
        ledger.revoke("gone", now - Duration::seconds(1)).await.unwrap();
        ledger.revoke("kept", now + Duration::minutes(5)).await.unwrap();
        assert!(ledger.is_revoked("gone").await.unwrap());
        assert_eq!(ledger.purge_expired(now).await.unwrap(), 1);
        assert!(!ledger.is_revoked("gone").await.unwrap());
        assert!(ledger.is_revoked("kept").await.unwrap());
    }

    #[tokio::test]
    async fn redeem_updates_password_once() {
        let users = Arc::new(MemoryUserStore::new());
        let user = users
            .create_user("r@clinic.test", None, "old-hash", &[])
            .await
            .unwrap();
        let secrets = MemorySecretStore::new(users.clone());
        let now = Utc::now();
        secrets
            .replace_for_subject(secret(&user.subject_id, "s1", now + Duration::minutes(15)))
            .await
            .unwrap();

        let subject = secrets.redeem("s1", "new-hash", now).await.unwrap();
        assert_eq!(subject, user.subject_id);
        let stored = users.find_by_id(&subject).await.unwrap().unwrap();
        assert_eq!(stored.password_hash.as_deref(), Some("new-hash"));

        assert!(matches!(
            secrets.redeem("s1", "other", now).await,
            Err(AuthError::SecretAlreadyUsed)
        ));
    }

    #[tokio::test]
    async fn replacing_a_secret_invalidates_the_previous_one() {
        let users = Arc::new(MemoryUserStore::new());
        let user = users.create_user("q@clinic.test", None, "h", &[]).await.unwrap();
        let secrets = MemorySecretStore::new(users);
        let now = Utc::now();
        let exp = now + Duration::minutes(15);
        secrets.replace_for_subject(secret(&user.subject_id, "first", exp)).await.unwrap();
        secrets.replace_for_subject(secret(&user.subject_id, "second", exp)).await.unwrap();
        assert!(secrets.find_by_hash("first").await.unwrap().is_none());
        assert!(matches!(
            secrets.redeem("first", "x", now).await,
            Err(AuthError::SecretNotFound)
        ));
        assert!(secrets.redeem("second", "x", now).await.is_ok());
    }

    #[tokio::test]
    async fn expired_secret_is_rejected_and_purged() {
        let users = Arc::new(MemoryUserStore::new());
        let user = users.create_user("e@clinic.test", None, "h", &[]).await.unwrap();
        let secrets = MemorySecretStore::new(users);
        let now = Utc::now();
        secrets
            .replace_for_subject(secret(&user.subject_id, "late", now - Duration::seconds(1)))
            .await
            .unwrap();
        assert!(matches!(
            secrets.redeem("late", "x", now).await,
            Err(AuthError::SecretExpired)
        ));
        assert_eq!(secrets.purge_expired(now).await.unwrap(), 1);
        assert!(secrets.find_by_hash("late").await.unwrap().is_none());
    }
}
