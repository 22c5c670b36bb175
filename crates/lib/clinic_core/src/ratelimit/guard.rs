//! Brute-force login guard.
//!
//! Counts failed logins per `credential:ip` in a fixed window that starts at
//! the first failure. Reaching the maximum blocks the identifier until the
//! window ends. A successful login forgives earlier failures.
//!
//! [`BruteForceGuard::begin_attempt`] admits an attempt and reserves its slot
//! in one atomic step, so concurrent attempts cannot all pass before the
//! first failure is recorded: admitted attempts plus recorded failures never
//! exceed the maximum.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use super::{CounterStore, MemoryCounterStore, RateWindow};
use crate::audit::{self, AuditAction, AuditEvent, AuditSink};
use crate::config::GuardConfig;

/// Outcome of a guard check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allowed { remaining: u32 },
    Blocked { retry_after: Duration },
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allowed { .. })
    }
}

pub struct BruteForceGuard {
    store: Arc<dyn CounterStore>,
    config: GuardConfig,
    audit: Arc<dyn AuditSink>,
}

impl BruteForceGuard {
    pub fn new(config: GuardConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self::with_store(Arc::new(MemoryCounterStore::new()), config, audit)
    }

    pub fn with_store(
        store: Arc<dyn CounterStore>,
        config: GuardConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            config,
            audit,
        }
    }

    /// Composite identifier for a credential and client address.
    pub fn identifier(credential: &str, ip: &str) -> String {
        format!("{credential}:{ip}")
    }

    pub fn check_login_allowed(&self, credential: &str, ip: &str) -> bool {
        self.check(credential, ip).is_allowed()
    }

    pub fn check(&self, credential: &str, ip: &str) -> GuardDecision {
        self.check_at(credential, ip, Utc::now())
    }

    pub fn check_at(&self, credential: &str, ip: &str, now: DateTime<Utc>) -> GuardDecision {
        let key = Self::identifier(credential, ip);
        let max = self.config.max_failures;
        let window = self.config.window;
        let mut decision = GuardDecision::Allowed { remaining: max };

        self.store.update(&key, now, &mut |w| {
            w.last_seen = now;
            if let Some(retry_after) = w.block_remaining(now) {
                decision = GuardDecision::Blocked { retry_after };
                return;
            }
            if w.blocked_until.is_some() || (w.count > 0 && now - w.window_start >= window) {
                restart(w, now);
            }
            decision = GuardDecision::Allowed {
                remaining: max.saturating_sub(w.count + w.pending),
            };
        });
        decision
    }

    /// Admit a login attempt and reserve its slot. Every admitted attempt must
    /// be resolved with [`record_login_result`](Self::record_login_result) or
    /// [`abandon_attempt`](Self::abandon_attempt).
    pub fn begin_attempt(&self, credential: &str, ip: &str) -> GuardDecision {
        self.begin_attempt_at(credential, ip, Utc::now())
    }

    pub fn begin_attempt_at(&self, credential: &str, ip: &str, now: DateTime<Utc>) -> GuardDecision {
        let key = Self::identifier(credential, ip);
        let max = self.config.max_failures;
        let window = self.config.window;
        let mut decision = GuardDecision::Allowed { remaining: max };

        self.store.update(&key, now, &mut |w| {
            w.last_seen = now;
            if let Some(retry_after) = w.block_remaining(now) {
                decision = GuardDecision::Blocked { retry_after };
                return;
            }
            if w.blocked_until.is_some() || (w.count > 0 && now - w.window_start >= window) {
                restart(w, now);
            }
            if w.count + w.pending >= max {
                // Saturated by attempts still in flight.
                let ends = w.window_start + window;
                decision = GuardDecision::Blocked {
                    retry_after: (ends - now).max(Duration::seconds(1)),
                };
                return;
            }
            if w.count == 0 && w.pending == 0 {
                w.window_start = now;
            }
            w.pending += 1;
            decision = GuardDecision::Allowed {
                remaining: max - w.count - w.pending,
            };
        });

        if !decision.is_allowed() {
            debug!(identifier = %key, "login attempt refused");
        }
        decision
    }

    /// Release a reservation whose attempt ended without a credential verdict.
    pub fn abandon_attempt(&self, credential: &str, ip: &str) {
        let key = Self::identifier(credential, ip);
        self.store.update(&key, Utc::now(), &mut |w| {
            w.pending = w.pending.saturating_sub(1);
        });
    }

    pub async fn record_login_result(&self, credential: &str, ip: &str, success: bool) {
        self.record_login_result_at(credential, ip, success, Utc::now())
            .await
    }

    pub async fn record_login_result_at(
        &self,
        credential: &str,
        ip: &str,
        success: bool,
        now: DateTime<Utc>,
    ) {
        let key = Self::identifier(credential, ip);
        if success {
            self.store.remove(&key);
            return;
        }

        let max = self.config.max_failures;
        let window = self.config.window;
        let mut attempts = 0;
        let mut newly_blocked = false;

        self.store.update(&key, now, &mut |w| {
            w.last_seen = now;
            w.pending = w.pending.saturating_sub(1);
            if w.is_blocked(now) {
                attempts = w.count;
                return;
            }
            if w.count == 0 || w.blocked_until.is_some() || now - w.window_start >= window {
                restart(w, now);
            }
            w.count += 1;
            attempts = w.count;
            if w.count >= max {
                w.blocked_until = Some(w.window_start + window);
                newly_blocked = true;
            }
        });

        debug!(identifier = %key, attempts, "login failure recorded");
        audit::emit(
            &self.audit,
            AuditEvent::new(AuditAction::LoginFailed)
                .identifier(credential)
                .ip(ip)
                .details(format!("attempts: {attempts}")),
        )
        .await;

        if newly_blocked {
            warn!(identifier = %key, attempts, "login blocked after repeated failures");
            audit::emit(
                &self.audit,
                AuditEvent::new(AuditAction::LoginBlocked)
                    .identifier(credential)
                    .ip(ip)
                    .details("max attempts exceeded"),
            )
            .await;
        }
    }

    /// Current window for an identifier, if any.
    pub fn status(&self, credential: &str, ip: &str) -> Option<RateWindow> {
        self.store.get(&Self::identifier(credential, ip))
    }

    /// Drop windows that no longer hold failures or blocks.
    pub fn purge_idle(&self, now: DateTime<Utc>) -> usize {
        let window = self.config.window;
        self.store.retain(&mut |_, w| {
            w.is_blocked(now)
                || (w.count > 0 && now - w.window_start < window)
                || (w.pending > 0 && now - w.last_seen < window)
        })
    }
}

/// Start a fresh window, keeping reservations of attempts still in flight.
fn restart(w: &mut RateWindow, now: DateTime<Utc>) {
    let pending = w.pending;
    *w = RateWindow::new(now);
    w.pending = pending;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::testing::RecordingSink;

    fn guard() -> (BruteForceGuard, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let guard = BruteForceGuard::new(GuardConfig::default(), sink.clone());
        (guard, sink)
    }

    #[tokio::test]
    async fn blocks_at_max_until_window_elapses() {
        let (guard, _) = guard();
        let t0 = Utc::now();

        for i in 0..5 {
            let at = t0 + Duration::seconds(i);
            assert!(guard.check_at("a@clinic.test", "10.0.0.1", at).is_allowed());
            guard
                .record_login_result_at("a@clinic.test", "10.0.0.1", false, at)
                .await;
        }

        let during = t0 + Duration::minutes(14);
        match guard.check_at("a@clinic.test", "10.0.0.1", during) {
            GuardDecision::Blocked { retry_after } => {
                assert_eq!(retry_after, Duration::minutes(1));
            }
            other => panic!("expected block, got {other:?}"),
        }

        let after = t0 + Duration::minutes(15);
        assert_eq!(
            guard.check_at("a@clinic.test", "10.0.0.1", after),
            GuardDecision::Allowed { remaining: 5 }
        );
        assert_eq!(guard.status("a@clinic.test", "10.0.0.1").unwrap().count, 0);
    }

    #[tokio::test]
    async fn success_forgives_previous_failures() {
        let (guard, _) = guard();
        let now = Utc::now();
        for _ in 0..4 {
            guard.record_login_result_at("b@clinic.test", "ip", false, now).await;
        }
        assert_eq!(
            guard.check_at("b@clinic.test", "ip", now),
            GuardDecision::Allowed { remaining: 1 }
        );
        guard.record_login_result_at("b@clinic.test", "ip", true, now).await;
        assert!(guard.status("b@clinic.test", "ip").is_none());
        assert_eq!(
            guard.check_at("b@clinic.test", "ip", now),
            GuardDecision::Allowed { remaining: 5 }
        );
    }

    #[tokio::test]
    async fn identifiers_are_independent() {
        let (guard, _) = guard();
        let now = Utc::now();
        for _ in 0..5 {
            guard.record_login_result_at("c@clinic.test", "ip-1", false, now).await;
        }
        assert!(!guard.check_at("c@clinic.test", "ip-1", now).is_allowed());
        assert!(guard.check_at("c@clinic.test", "ip-2", now).is_allowed());
        assert!(guard.check_at("d@clinic.test", "ip-1", now).is_allowed());
    }

    #[tokio::test]
    async fn stale_failures_start_a_new_window() {
        let (guard, _) = guard();
        let t0 = Utc::now();
        for _ in 0..4 {
            guard.record_login_result_at("e@clinic.test", "ip", false, t0).await;
        }
        let later = t0 + Duration::minutes(16);
        guard.record_login_result_at("e@clinic.test", "ip", false, later).await;
        let w = guard.status("e@clinic.test", "ip").unwrap();
        assert_eq!(w.count, 1);
        assert_eq!(w.window_start, later);
        assert!(guard.check_at("e@clinic.test", "ip", later).is_allowed());
    }

    #[tokio::test]
    async fn failures_and_blocks_are_audited() {
        let (guard, sink) = guard();
        let now = Utc::now();
        for _ in 0..5 {
            guard.record_login_result_at("f@clinic.test", "ip", false, now).await;
        }
        let actions = sink.actions();
        assert_eq!(
            actions
                .iter()
                .filter(|a| **a == AuditAction::LoginFailed)
                .count(),
            5
        );
        assert_eq!(
            actions
                .iter()
                .filter(|a| **a == AuditAction::LoginBlocked)
                .count(),
            1
        );
        assert_eq!(actions.last(), Some(&AuditAction::LoginBlocked));
    }

    #[tokio::test]
    async fn in_flight_attempts_count_toward_the_maximum() {
        let (guard, _) = guard();
        let now = Utc::now();
        for remaining in (0..5).rev() {
            assert_eq!(
                guard.begin_attempt_at("i@clinic.test", "ip", now),
                GuardDecision::Allowed { remaining }
            );
        }
        // Nothing recorded yet, but every slot is reserved.
        assert!(!guard.begin_attempt_at("i@clinic.test", "ip", now).is_allowed());

        for _ in 0..5 {
            guard.record_login_result_at("i@clinic.test", "ip", false, now).await;
        }
        let w = guard.status("i@clinic.test", "ip").unwrap();
        assert_eq!((w.count, w.pending), (5, 0));
        assert!(w.is_blocked(now));
    }

    #[tokio::test]
    async fn abandoned_attempt_frees_its_slot() {
        let (guard, _) = guard();
        let now = Utc::now();
        for _ in 0..5 {
            guard.begin_attempt_at("j@clinic.test", "ip", now);
        }
        assert!(!guard.begin_attempt_at("j@clinic.test", "ip", now).is_allowed());
        guard.abandon_attempt("j@clinic.test", "ip");
        assert!(guard.begin_attempt_at("j@clinic.test", "ip", now).is_allowed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_attempts_admit_at_most_the_maximum() {
        let (guard, _) = guard();
        let guard = Arc::new(guard);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let guard = guard.clone();
            handles.push(tokio::spawn(async move {
                guard.begin_attempt("k@clinic.test", "ip").is_allowed()
            }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }

    #[tokio::test]
    async fn purge_idle_keeps_active_windows() {
        let (guard, _) = guard();
        let now = Utc::now();
        guard.record_login_result_at("g@clinic.test", "ip", false, now).await;
        guard.check_at("h@clinic.test", "ip", now);
        assert_eq!(guard.purge_idle(now), 1);
        assert!(guard.status("g@clinic.test", "ip").is_some());
        assert_eq!(guard.purge_idle(now + Duration::minutes(16)), 1);
        assert!(guard.status("g@clinic.test", "ip").is_none());
    }
}
