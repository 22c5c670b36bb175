//! Per-identifier request counting.
//!
//! Both the brute-force guard and the general API limiter keep one
//! [`RateWindow`] per identifier in a [`CounterStore`]. The store contract is
//! that [`CounterStore::update`] applies its closure atomically for a single
//! identifier while unrelated identifiers proceed in parallel. The in-process
//! [`MemoryCounterStore`] gets this from `dashmap`'s sharded locks.

pub mod guard;
pub mod limiter;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

pub use guard::{BruteForceGuard, GuardDecision};
pub use limiter::{BlockedIdentifier, RateDecision, RateLimiter, RateStatus};

/// Counting state for one identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateWindow {
    /// Attempts counted in the current window.
    pub count: u32,
    pub window_start: DateTime<Utc>,
    /// Requests counted since the last quiet gap (general limiter only).
    pub total: u32,
    /// Login attempts admitted but not yet resolved (guard only).
    pub pending: u32,
    /// A future value forces rejection regardless of counts.
    pub blocked_until: Option<DateTime<Utc>>,
    pub last_seen: DateTime<Utc>,
}

impl RateWindow {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            window_start: now,
            total: 0,
            pending: 0,
            blocked_until: None,
            last_seen: now,
        }
    }

    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.blocked_until, Some(until) if until > now)
    }

    /// Time left on an active block.
    pub fn block_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.blocked_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }
}

/// Storage for rate windows.
pub trait CounterStore: Send + Sync {
    /// Apply `f` atomically to the window for `key`, creating it at `now` if absent.
    fn update(&self, key: &str, now: DateTime<Utc>, f: &mut dyn FnMut(&mut RateWindow));

    fn get(&self, key: &str) -> Option<RateWindow>;

    fn remove(&self, key: &str) -> Option<RateWindow>;

    /// Keep only windows for which `keep` returns true. Returns the number removed.
    fn retain(&self, keep: &mut dyn FnMut(&str, &RateWindow) -> bool) -> usize;

    /// Point-in-time copy of all windows.
    fn snapshot(&self) -> Vec<(String, RateWindow)>;
}

/// In-process counter store.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    windows: DashMap<String, RateWindow>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl CounterStore for MemoryCounterStore {
    fn update(&self, key: &str, now: DateTime<Utc>, f: &mut dyn FnMut(&mut RateWindow)) {
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| RateWindow::new(now));
        f(entry.value_mut());
    }

    fn get(&self, key: &str) -> Option<RateWindow> {
        self.windows.get(key).map(|w| w.value().clone())
    }

    fn remove(&self, key: &str) -> Option<RateWindow> {
        self.windows.remove(key).map(|(_, w)| w)
    }

    fn retain(&self, keep: &mut dyn FnMut(&str, &RateWindow) -> bool) -> usize {
        let mut removed = 0;
        self.windows.retain(|k, w| {
            let kept = keep(k, w);
            if !kept {
                removed += 1;
            }
            kept
        });
        removed
    }

    fn snapshot(&self) -> Vec<(String, RateWindow)> {
        self.windows
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

/// Whole seconds to wait, rounded up, at least 1.
pub fn retry_after_secs(wait: Duration) -> u64 {
    let millis = wait.num_milliseconds().max(0) as u64;
    millis.div_ceil(1000).max(1)
}
