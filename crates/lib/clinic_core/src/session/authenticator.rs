//! Session authenticator: login, refresh, logout, request authorization and
//! password reset, orchestrated over the guard, stores and collaborators.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::refresh::RefreshTokens;
use super::reset::PasswordResets;
use super::revocation::RevocationLedger;
use crate::audit::{self, AuditAction, AuditEvent, AuditSink};
use crate::auth::AuthError;
use crate::auth::jwt::{generate_access_token, verify_access_token};
use crate::auth::password::verify_password;
use crate::config::{AuthConfig, TokenConfig};
use crate::mail::Mailer;
use crate::models::auth::{LoginIdentity, TokenClaims};
use crate::ratelimit::{BruteForceGuard, GuardDecision, retry_after_secs};
use crate::store::{Stores, UserStore};

/// Tokens handed to a client after login or refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub claims: TokenClaims,
    pub identity: LoginIdentity,
}

pub struct SessionAuthenticator {
    users: Arc<dyn UserStore>,
    guard: Arc<BruteForceGuard>,
    refresh_tokens: RefreshTokens,
    ledger: RevocationLedger,
    resets: PasswordResets,
    mailer: Arc<dyn Mailer>,
    audit: Arc<dyn AuditSink>,
    tokens: TokenConfig,
    jwt_secret: Vec<u8>,
}

impl SessionAuthenticator {
    pub fn new(
        stores: Stores,
        config: &AuthConfig,
        jwt_secret: impl Into<Vec<u8>>,
        audit: Arc<dyn AuditSink>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let guard = Arc::new(BruteForceGuard::new(config.guard.clone(), audit.clone()));
        Self {
            users: stores.users,
            guard,
            refresh_tokens: RefreshTokens::new(stores.refresh_tokens, config.tokens.refresh_ttl),
            ledger: RevocationLedger::new(stores.revocations),
            resets: PasswordResets::new(stores.secrets, config.tokens.reset_ttl),
            mailer,
            audit,
            tokens: config.tokens.clone(),
            jwt_secret: jwt_secret.into(),
        }
    }

    pub fn users(&self) -> &Arc<dyn UserStore> {
        &self.users
    }

    pub fn guard(&self) -> &Arc<BruteForceGuard> {
        &self.guard
    }

    pub fn refresh_tokens(&self) -> &RefreshTokens {
        &self.refresh_tokens
    }

    pub fn ledger(&self) -> &RevocationLedger {
        &self.ledger
    }

    pub fn resets(&self) -> &PasswordResets {
        &self.resets
    }

    /// Authenticate `username`/`password` from `ip`.
    ///
    /// The guard admits and reserves the attempt before any credential work.
    /// Unknown accounts and wrong passwords fail identically.
    pub async fn login(&self, username: &str, password: &str, ip: &str) -> Result<TokenPair, AuthError> {
        if let GuardDecision::Blocked { retry_after } = self.guard.begin_attempt(username, ip) {
            audit::emit(
                &self.audit,
                AuditEvent::new(AuditAction::LoginRejected)
                    .identifier(username)
                    .ip(ip)
                    .details("login blocked by brute-force guard"),
            )
            .await;
            return Err(AuthError::RateLimited {
                retry_after_secs: retry_after_secs(retry_after),
            });
        }

        let identity = match self.verify_credentials(username, password).await {
            Ok(identity) => identity,
            Err(e) => {
                self.guard.abandon_attempt(username, ip);
                return Err(e);
            }
        };
        let Some(identity) = identity else {
            self.guard.record_login_result(username, ip, false).await;
            return Err(AuthError::InvalidCredentials);
        };

        self.guard.record_login_result(username, ip, true).await;
        let pair = self.issue_pair(identity).await?;
        info!(subject = %pair.identity.subject_id, "login succeeded");
        audit::emit(
            &self.audit,
            AuditEvent::new(AuditAction::LoginSuccess)
                .subject(&pair.identity.subject_id)
                .identifier(username)
                .ip(ip),
        )
        .await;
        Ok(pair)
    }

    /// `Ok(None)` for an unknown account or a wrong password.
    async fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<LoginIdentity>, AuthError> {
        let identity = self.users.find_by_login(username).await?;
        let verified = match identity.as_ref().and_then(|i| i.password_hash.as_deref()) {
            Some(hash) => verify_password(password, hash)?,
            None => false,
        };
        Ok(identity.filter(|_| verified))
    }

    async fn issue_pair(&self, identity: LoginIdentity) -> Result<TokenPair, AuthError> {
        let (access_token, claims) =
            generate_access_token(&identity, self.tokens.access_ttl, &self.jwt_secret)?;
        let refresh = self.refresh_tokens.issue(&identity.subject_id).await?;
        Ok(TokenPair {
            access_token,
            refresh_token: refresh.value,
            expires_in: self.tokens.access_ttl.num_seconds(),
            claims,
            identity,
        })
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// The refresh token is claimed for the duration of the exchange and
    /// released unchanged at the end. A logout, password reset or newer login
    /// that revokes it in the meantime makes the exchange fail.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let record = match self.refresh_tokens.verify_and_consume(refresh_token).await {
            Ok(record) => record,
            Err(e) => {
                self.refresh_rejected(None, &e).await;
                return Err(e);
            }
        };
        let subject_id = record.subject_id.clone();

        let Some(identity) = self.users.find_by_id(&subject_id).await? else {
            self.refresh_tokens.discard(&record).await?;
            let e = AuthError::TokenNotFound;
            self.refresh_rejected(Some(&subject_id), &e).await;
            return Err(e);
        };
        let minted = generate_access_token(&identity, self.tokens.access_ttl, &self.jwt_secret);

        if !self.refresh_tokens.release(&record).await? {
            let e = AuthError::TokenRevoked;
            self.refresh_rejected(Some(&subject_id), &e).await;
            return Err(e);
        }
        let (access_token, claims) = minted?;

        debug!(subject = %subject_id, "access token refreshed");
        audit::emit(
            &self.audit,
            AuditEvent::new(AuditAction::TokenRefreshed).subject(&subject_id),
        )
        .await;
        Ok(TokenPair {
            access_token,
            refresh_token: refresh_token.to_string(),
            expires_in: self.tokens.access_ttl.num_seconds(),
            claims,
            identity,
        })
    }

    async fn refresh_rejected(&self, subject_id: Option<&str>, error: &AuthError) {
        debug!(reason = error.kind(), "refresh rejected");
        let mut event = AuditEvent::new(AuditAction::RefreshRejected).details(error.kind());
        if let Some(subject_id) = subject_id {
            event = event.subject(subject_id);
        }
        audit::emit(&self.audit, event).await;
    }

    /// Revoke the presented access token and every refresh token of its subject.
    pub async fn logout(&self, access_token: &str, claims: &TokenClaims) -> Result<(), AuthError> {
        self.ledger.revoke(access_token, claims.expires_at()).await?;
        let revoked = self
            .refresh_tokens
            .revoke_all_for_subject(&claims.sub)
            .await?;
        info!(subject = %claims.sub, revoked, "logged out");
        audit::emit(
            &self.audit,
            AuditEvent::new(AuditAction::Logout)
                .subject(&claims.sub)
                .identifier(&claims.email),
        )
        .await;
        Ok(())
    }

    /// Verify signature and expiry, then consult the revocation ledger.
    ///
    /// A bad signature or an expired token both yield `TokenExpired`.
    pub async fn authorize(&self, access_token: &str) -> Result<TokenClaims, AuthError> {
        let claims =
            verify_access_token(access_token, &self.jwt_secret).ok_or(AuthError::TokenExpired)?;
        if self.ledger.is_revoked(access_token).await? {
            return Err(AuthError::TokenRevoked);
        }
        Ok(claims)
    }

    /// Start a password reset for `email` and mail the secret.
    pub async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        let Some(identity) = self.users.find_by_login(email).await? else {
            audit::emit(
                &self.audit,
                AuditEvent::new(AuditAction::PasswordResetRejected)
                    .identifier(email)
                    .details(AuthError::UnknownAccount.kind()),
            )
            .await;
            return Err(AuthError::UnknownAccount);
        };

        let issued = self.resets.create(&identity.subject_id).await?;
        if let Err(e) = self
            .mailer
            .send_password_reset(&identity.email, &issued.value)
            .await
        {
            warn!(subject = %identity.subject_id, "failed to send password reset e-mail: {e}");
        }
        audit::emit(
            &self.audit,
            AuditEvent::new(AuditAction::PasswordResetRequested)
                .subject(&identity.subject_id)
                .identifier(email),
        )
        .await;
        Ok(())
    }

    /// Complete a password reset: redeem the secret, set the new password and
    /// revoke the subject's refresh tokens.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        let subject_id = match self.resets.consume(token, new_password).await {
            Ok(subject_id) => subject_id,
            Err(e) => {
                audit::emit(
                    &self.audit,
                    AuditEvent::new(AuditAction::PasswordResetRejected).details(e.kind()),
                )
                .await;
                return Err(e);
            }
        };
        let revoked = self
            .refresh_tokens
            .revoke_all_for_subject(&subject_id)
            .await?;
        info!(subject = %subject_id, revoked, "password reset completed");
        audit::emit(
            &self.audit,
            AuditEvent::new(AuditAction::PasswordResetCompleted).subject(&subject_id),
        )
        .await;
        Ok(())
    }
}
