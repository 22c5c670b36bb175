//! Ledger of access tokens revoked before their natural expiry.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::auth::AuthError;
use crate::auth::tokens::hash_token;
use crate::store::RevocationStore;

pub struct RevocationLedger {
    store: Arc<dyn RevocationStore>,
}

impl RevocationLedger {
    pub fn new(store: Arc<dyn RevocationStore>) -> Self {
        Self { store }
    }

    /// Revoke `token` until `natural_expiry`, after which the entry may be purged.
    pub async fn revoke(&self, token: &str, natural_expiry: DateTime<Utc>) -> Result<(), AuthError> {
        self.store.revoke(&hash_token(token), natural_expiry).await
    }

    pub async fn is_revoked(&self, token: &str) -> Result<bool, AuthError> {
        self.store.is_revoked(&hash_token(token)).await
    }

    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        self.store.purge_expired(now).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::store::MemoryRevocationStore;

    #[tokio::test]
    async fn revoked_token_is_visible_immediately() {
        let ledger = RevocationLedger::new(Arc::new(MemoryRevocationStore::new()));
        let exp = Utc::now() + Duration::minutes(15);
        assert!(!ledger.is_revoked("header.payload.sig").await.unwrap());
        ledger.revoke("header.payload.sig", exp).await.unwrap();
        assert!(ledger.is_revoked("header.payload.sig").await.unwrap());
        assert!(!ledger.is_revoked("other.payload.sig").await.unwrap());
    }

    #[tokio::test]
    async fn entries_survive_until_natural_expiry() {
        let ledger = RevocationLedger::new(Arc::new(MemoryRevocationStore::new()));
        let exp = Utc::now() + Duration::minutes(15);
        ledger.revoke("t", exp).await.unwrap();
        assert_eq!(ledger.purge_expired(exp - Duration::seconds(1)).await.unwrap(), 0);
        assert_eq!(ledger.purge_expired(exp + Duration::seconds(1)).await.unwrap(), 1);
        assert!(!ledger.is_revoked("t").await.unwrap());
    }
}
