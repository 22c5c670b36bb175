//! Session core configuration: token lifetimes, abuse-protection thresholds
//! and sweep cadence.
//!
//! Defaults mirror the production clinic deployment. `clinic_api` overlays
//! environment variables on top of these defaults.

use std::time::Duration as StdDuration;

use chrono::Duration;

/// Token lifetimes.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Access token lifetime (default 15 minutes).
    pub access_ttl: Duration,
    /// Refresh token lifetime (default 7 days).
    pub refresh_ttl: Duration,
    /// Password reset secret lifetime (default 15 minutes).
    pub reset_ttl: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(7),
            reset_ttl: Duration::minutes(15),
        }
    }
}

/// Brute-force guard thresholds.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Failed attempts that trigger a block (default 5).
    pub max_failures: u32,
    /// Attempt window; also the block duration (default 15 minutes).
    pub window: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            window: Duration::minutes(15),
        }
    }
}

/// General two-tier rate limit.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per window before throttling (default 100).
    pub max_per_window: u32,
    /// Throttle window (default 1 minute).
    pub window: Duration,
    /// Requests counted in the cumulative window that trigger a block (default 200).
    pub block_threshold: u32,
    /// The cumulative total, throttled requests included, resets only after
    /// this long without any request (default 1 minute).
    pub cumulative_reset_gap: Duration,
    /// Hard block duration (default 1 hour).
    pub block_duration: Duration,
    /// Idle time after which an identifier's counters are dropped (default 1 hour).
    pub idle_ttl: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_window: 100,
            window: Duration::minutes(1),
            block_threshold: 200,
            cumulative_reset_gap: Duration::minutes(1),
            block_duration: Duration::hours(1),
            idle_ttl: Duration::hours(1),
        }
    }
}

/// Background sweep cadence.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub refresh_tokens: StdDuration,
    pub reset_secrets: StdDuration,
    pub revocations: StdDuration,
    pub counters: StdDuration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            refresh_tokens: StdDuration::from_secs(60 * 60),
            reset_secrets: StdDuration::from_secs(30 * 60),
            revocations: StdDuration::from_secs(15 * 60),
            counters: StdDuration::from_secs(10 * 60),
        }
    }
}

/// Complete session core configuration.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub tokens: TokenConfig,
    pub guard: GuardConfig,
    pub rate_limit: RateLimitConfig,
    pub sweep: SweepConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_values() {
        let cfg = AuthConfig::default();
        assert_eq!(cfg.tokens.refresh_ttl, Duration::seconds(604_800));
        assert_eq!(cfg.tokens.reset_ttl, Duration::seconds(900));
        assert_eq!(cfg.guard.max_failures, 5);
        assert_eq!(cfg.rate_limit.max_per_window, 100);
        assert_eq!(cfg.rate_limit.block_threshold, 200);
        assert_eq!(cfg.rate_limit.block_duration, Duration::hours(1));
    }
}
