//! General two-tier API rate limiter.
//!
//! Tier one throttles an identifier once it exceeds `max_per_window` requests
//! in the current window; the rejection carries a retry hint and does not
//! escalate. Tier two counts every request, throttled ones included, and only
//! forgets them after a full `cumulative_reset_gap` with no traffic, so a
//! client that stays busy keeps accumulating even as the minute windows roll
//! over. Exceeding `block_threshold` hard-blocks the identifier for
//! `block_duration`. An expired block resets the identifier to zero counts.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::{CounterStore, MemoryCounterStore, RateWindow, retry_after_secs};
use crate::config::RateLimitConfig;

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Throttled { retry_after: Duration },
    Blocked { retry_after: Duration, newly_blocked: bool },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }

    /// Retry hint in whole seconds; zero when allowed.
    pub fn retry_after_secs(&self) -> u64 {
        match self {
            RateDecision::Allowed { .. } => 0,
            RateDecision::Throttled { retry_after } => retry_after_secs(*retry_after),
            RateDecision::Blocked { retry_after, .. } => retry_after_secs(*retry_after),
        }
    }
}

/// Counters for one identifier, for operational tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateStatus {
    pub identifier: String,
    pub count: u32,
    pub total: u32,
    pub blocked: bool,
    pub blocked_until: Option<DateTime<Utc>>,
    pub last_request: Option<DateTime<Utc>>,
}

/// A currently blocked identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedIdentifier {
    pub identifier: String,
    pub blocked_until: DateTime<Utc>,
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_store(Arc::new(MemoryCounterStore::new()), config)
    }

    pub fn with_store(store: Arc<dyn CounterStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn allow(&self, identifier: &str) -> bool {
        self.check(identifier).is_allowed()
    }

    pub fn check(&self, identifier: &str) -> RateDecision {
        self.check_at(identifier, Utc::now())
    }

    pub fn check_at(&self, identifier: &str, now: DateTime<Utc>) -> RateDecision {
        let cfg = &self.config;
        let mut decision = RateDecision::Allowed {
            remaining: cfg.max_per_window,
        };

        self.store.update(identifier, now, &mut |w| {
            if let Some(retry_after) = w.block_remaining(now) {
                decision = RateDecision::Blocked {
                    retry_after,
                    newly_blocked: false,
                };
                return;
            }
            if w.blocked_until.is_some() {
                *w = RateWindow::new(now);
            }
            if now - w.window_start >= cfg.window {
                w.count = 0;
                w.window_start = now;
            }
            if now - w.last_seen >= cfg.cumulative_reset_gap {
                w.total = 0;
            }

            w.total += 1;
            w.last_seen = now;

            if w.total > cfg.block_threshold {
                w.blocked_until = Some(now + cfg.block_duration);
                decision = RateDecision::Blocked {
                    retry_after: cfg.block_duration,
                    newly_blocked: true,
                };
                return;
            }
            if w.count >= cfg.max_per_window {
                decision = RateDecision::Throttled {
                    retry_after: w.window_start + cfg.window - now,
                };
                return;
            }
            w.count += 1;
            decision = RateDecision::Allowed {
                remaining: cfg.max_per_window - w.count,
            };
        });

        match decision {
            RateDecision::Blocked {
                newly_blocked: true,
                ..
            } => warn!(identifier, "identifier blocked due to excessive requests"),
            RateDecision::Throttled { .. } => warn!(identifier, "rate limit exceeded"),
            _ => {}
        }
        decision
    }

    pub fn status(&self, identifier: &str) -> RateStatus {
        self.status_at(identifier, Utc::now())
    }

    pub fn status_at(&self, identifier: &str, now: DateTime<Utc>) -> RateStatus {
        let Some(w) = self.store.get(identifier) else {
            return RateStatus {
                identifier: identifier.to_string(),
                count: 0,
                total: 0,
                blocked: false,
                blocked_until: None,
                last_request: None,
            };
        };
        let blocked = w.is_blocked(now);
        let expired_block = w.blocked_until.is_some() && !blocked;
        let count = if expired_block || now - w.window_start >= self.config.window {
            0
        } else {
            w.count
        };
        let total = if expired_block || now - w.last_seen >= self.config.cumulative_reset_gap {
            0
        } else {
            w.total
        };
        RateStatus {
            identifier: identifier.to_string(),
            count,
            total,
            blocked,
            blocked_until: w.blocked_until.filter(|_| blocked),
            last_request: Some(w.last_seen),
        }
    }

    /// All identifiers currently under a hard block.
    pub fn blocked(&self) -> Vec<BlockedIdentifier> {
        self.blocked_at(Utc::now())
    }

    pub fn blocked_at(&self, now: DateTime<Utc>) -> Vec<BlockedIdentifier> {
        let mut blocked: Vec<_> = self
            .store
            .snapshot()
            .into_iter()
            .filter_map(|(identifier, w)| {
                w.blocked_until
                    .filter(|until| *until > now)
                    .map(|blocked_until| BlockedIdentifier {
                        identifier,
                        blocked_until,
                    })
            })
            .collect();
        blocked.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        blocked
    }

    /// Administrative override: clear a block before its timer expires.
    ///
    /// Returns whether the identifier was blocked.
    pub fn unblock(&self, identifier: &str) -> bool {
        self.unblock_at(identifier, Utc::now())
    }

    pub fn unblock_at(&self, identifier: &str, now: DateTime<Utc>) -> bool {
        let was_blocked = self
            .store
            .remove(identifier)
            .is_some_and(|w| w.is_blocked(now));
        if was_blocked {
            info!(identifier, "identifier unblocked manually");
        }
        was_blocked
    }

    /// Clear all counters for an identifier.
    pub fn reset(&self, identifier: &str) {
        self.store.remove(identifier);
        info!(identifier, "rate limit statistics reset");
    }

    /// Drop identifiers idle for longer than `idle_ttl` that are not blocked.
    pub fn purge_idle(&self, now: DateTime<Utc>) -> usize {
        let idle_ttl = self.config.idle_ttl;
        self.store
            .retain(&mut |_, w| w.is_blocked(now) || now - w.last_seen < idle_ttl)
    }
}
