//! JWT access token generation and verification.

use std::path::PathBuf;

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::info;

use super::AuthError;
use super::tokens::generate_token;
use crate::models::auth::{LoginIdentity, TokenClaims};
use crate::uuid::uuidv7;

/// Generate a signed JWT access token (HS256) for `identity`, valid for `ttl`.
///
/// Returns the encoded token together with its claims so callers can report
/// the expiry without decoding again.
pub fn generate_access_token(
    identity: &LoginIdentity,
    ttl: Duration,
    secret: &[u8],
) -> Result<(String, TokenClaims), AuthError> {
    let now = Utc::now();
    let claims = TokenClaims {
        sub: identity.subject_id.clone(),
        email: identity.email.clone(),
        roles: identity.roles.clone(),
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
        jti: uuidv7().to_string(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| AuthError::Signing(format!("jwt encode: {e}")))?;
    Ok((token, claims))
}

/// Verify a JWT access token, returning the claims on success.
///
/// Signature and expiry only; revocation is checked by the ledger.
pub fn verify_access_token(token: &str, secret: &[u8]) -> Option<TokenClaims> {
    let key = DecodingKey::from_secret(secret);
    let mut validation = Validation::default();
    validation.validate_exp = true;
    validation.leeway = 0;
    decode::<TokenClaims>(token, &key, &validation)
        .ok()
        .map(|data| data.claims)
}

/// Resolve the JWT secret: env var `JWT_SECRET` → `AUTH_SECRET` → persisted file.
pub fn resolve_jwt_secret() -> String {
    if let Ok(secret) = std::env::var("JWT_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    if let Ok(secret) = std::env::var("AUTH_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    let secret_path = jwt_secret_path();
    if let Ok(existing) = std::fs::read_to_string(&secret_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret = generate_token();
    if let Some(parent) = secret_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(&secret_path, &secret);
    info!(path = %secret_path.display(), "generated new JWT secret");
    secret
}

/// Path to the persisted JWT secret file.
fn jwt_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clinic")
        .join("jwt-secret")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> LoginIdentity {
        LoginIdentity {
            subject_id: "user-1".into(),
            email: "doctor@clinic.test".into(),
            name: None,
            password_hash: None,
            roles: vec!["admin".into()],
        }
    }

    #[test]
    fn generated_token_verifies() {
        let (token, claims) =
            generate_access_token(&identity(), Duration::minutes(15), b"secret").unwrap();
        let decoded = verify_access_token(&token, b"secret").expect("valid token");
        assert_eq!(decoded, claims);
        assert_eq!(decoded.sub, "user-1");
        assert!(decoded.has_role("admin"));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let (token, _) =
            generate_access_token(&identity(), Duration::minutes(15), b"secret").unwrap();
        assert!(verify_access_token(&token, b"other").is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let (token, _) =
            generate_access_token(&identity(), Duration::seconds(-5), b"secret").unwrap();
        assert!(verify_access_token(&token, b"secret").is_none());
    }

    #[test]
    fn tokens_minted_in_the_same_second_differ() {
        let (a, _) = generate_access_token(&identity(), Duration::minutes(1), b"s").unwrap();
        let (b, _) = generate_access_token(&identity(), Duration::minutes(1), b"s").unwrap();
        assert_ne!(a, b);
    }
}
