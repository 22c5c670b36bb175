//! Opaque token generation and hashing.
//!
//! Refresh tokens and password-reset secrets are random alphanumeric strings.
//! Only their SHA-256 hex digest is ever persisted; the same digest keys the
//! access-token revocation ledger.

use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use sha2::{Digest, Sha256};

/// Length of generated opaque tokens.
const TOKEN_LEN: usize = 64;

/// Generate a cryptographically random token (64 alphanumeric chars).
pub fn generate_token() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// SHA-256 hash a token for storage.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_unique_alphanumeric() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn hash_is_deterministic_hex() {
        let h = hash_token("abc");
        assert_eq!(h, hash_token("abc"));
        assert_eq!(h.len(), 64);
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
