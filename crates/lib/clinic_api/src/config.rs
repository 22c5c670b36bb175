//! API server configuration.

use std::net::IpAddr;
use std::str::FromStr;

use chrono::Duration;
use clinic_core::auth::jwt::resolve_jwt_secret;
use clinic_core::config::AuthConfig;
use tracing::warn;

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    /// PostgreSQL connection URL. `None` runs on in-memory stores.
    pub database_url: Option<String>,
    /// JWT signing secret.
    pub jwt_secret: String,
    /// Front-end base URL used in password reset links.
    pub reset_url_base: String,
    /// Socket peers whose `X-Forwarded-For`/`X-Real-IP` headers are believed.
    pub trusted_proxies: Vec<IpAddr>,
    /// Token lifetimes and abuse-protection thresholds.
    pub auth: AuthConfig,
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                     | Default                         |
    /// |------------------------------|---------------------------------|
    /// | `BIND_ADDR`                  | `127.0.0.1:3100`                |
    /// | `DATABASE_URL`               | unset (in-memory stores)        |
    /// | `JWT_SECRET` / `AUTH_SECRET` | generated & persisted to file   |
    /// | `RESET_URL_BASE`             | `http://localhost:3000`         |
    /// | `TRUSTED_PROXIES`            | empty (comma-separated IPs)     |
    /// | `ACCESS_TOKEN_TTL_SECS`      | `900`                           |
    /// | `REFRESH_TOKEN_TTL_SECS`     | `604800`                        |
    /// | `RESET_TOKEN_TTL_SECS`       | `900`                           |
    /// | `LOGIN_MAX_ATTEMPTS`         | `5`                             |
    /// | `LOGIN_WINDOW_SECS`          | `900`                           |
    /// | `RATE_LIMIT_PER_MINUTE`      | `100`                           |
    /// | `RATE_LIMIT_BLOCK_THRESHOLD` | `200`                           |
    /// | `RATE_LIMIT_BLOCK_SECS`      | `3600`                          |
    pub fn from_env() -> Self {
        let mut auth = AuthConfig::default();
        if let Some(secs) = env_parse::<i64>("ACCESS_TOKEN_TTL_SECS") {
            auth.tokens.access_ttl = Duration::seconds(secs);
        }
        if let Some(secs) = env_parse::<i64>("REFRESH_TOKEN_TTL_SECS") {
            auth.tokens.refresh_ttl = Duration::seconds(secs);
        }
        if let Some(secs) = env_parse::<i64>("RESET_TOKEN_TTL_SECS") {
            auth.tokens.reset_ttl = Duration::seconds(secs);
        }
        if let Some(max) = env_parse("LOGIN_MAX_ATTEMPTS") {
            auth.guard.max_failures = max;
        }
        if let Some(secs) = env_parse::<i64>("LOGIN_WINDOW_SECS") {
            auth.guard.window = Duration::seconds(secs);
        }
        if let Some(max) = env_parse("RATE_LIMIT_PER_MINUTE") {
            auth.rate_limit.max_per_window = max;
        }
        if let Some(threshold) = env_parse("RATE_LIMIT_BLOCK_THRESHOLD") {
            auth.rate_limit.block_threshold = threshold;
        }
        if let Some(secs) = env_parse::<i64>("RATE_LIMIT_BLOCK_SECS") {
            auth.rate_limit.block_duration = Duration::seconds(secs);
        }

        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3100".into()),
            database_url: std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()),
            jwt_secret: resolve_jwt_secret(),
            reset_url_base: std::env::var("RESET_URL_BASE")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            trusted_proxies: std::env::var("TRUSTED_PROXIES")
                .map(|raw| parse_ip_list(&raw))
                .unwrap_or_default(),
            auth,
        }
    }
}

/// Parse an environment variable, ignoring (with a warning) malformed values.
fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring malformed environment variable");
            None
        }
    }
}

/// Parse a comma-separated address list, skipping (with a warning) bad entries.
fn parse_ip_list(raw: &str) -> Vec<IpAddr> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                warn!(value = entry, "ignoring malformed trusted proxy address");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_reads_and_rejects() {
        // SAFETY: test-local variable names, no other thread reads them.
        unsafe {
            std::env::set_var("CLINIC_TEST_PARSE_OK", " 42 ");
            std::env::set_var("CLINIC_TEST_PARSE_BAD", "forty-two");
        }
        assert_eq!(env_parse::<u32>("CLINIC_TEST_PARSE_OK"), Some(42));
        assert_eq!(env_parse::<u32>("CLINIC_TEST_PARSE_BAD"), None);
        assert_eq!(env_parse::<u32>("CLINIC_TEST_PARSE_MISSING"), None);
    }

    #[test]
    fn trusted_proxy_list_skips_bad_entries() {
        let ips = parse_ip_list(" 10.0.0.2, not-an-ip,,::1 ");
        assert_eq!(
            ips,
            vec![
                "10.0.0.2".parse::<IpAddr>().unwrap(),
                "::1".parse::<IpAddr>().unwrap()
            ]
        );
    }
}
