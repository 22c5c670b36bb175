//! # clinic_core
//!
//! Session and credential core for the clinic backend: token issuance and
//! revocation, brute-force and API rate limiting, and one-time password
//! reset secrets.

pub mod audit;
pub mod auth;
pub mod config;
pub mod mail;
pub mod migrate;
pub mod models;
pub mod ratelimit;
pub mod session;
pub mod store;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
