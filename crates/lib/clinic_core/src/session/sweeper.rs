//! Periodic cleanup workers.
//!
//! Each record family is swept by its own tokio task on its own cadence.
//! A failed sweep is logged and retried on the next tick.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SessionAuthenticator;
use crate::auth::AuthError;
use crate::config::SweepConfig;
use crate::ratelimit::RateLimiter;

pub struct Sweeper {
    auth: Arc<SessionAuthenticator>,
    limiter: Arc<RateLimiter>,
    config: SweepConfig,
}

impl Sweeper {
    pub fn new(auth: Arc<SessionAuthenticator>, limiter: Arc<RateLimiter>, config: SweepConfig) -> Self {
        Self {
            auth,
            limiter,
            config,
        }
    }

    /// Spawn one task per record family. Tasks exit when `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let auth = self.auth;
        let limiter = self.limiter;
        let cfg = self.config;
        vec![
            {
                let auth = auth.clone();
                spawn_periodic("refresh_tokens", cfg.refresh_tokens, cancel.clone(), move || {
                    let auth = auth.clone();
                    async move { auth.refresh_tokens().purge_expired(Utc::now()).await }
                })
            },
            {
                let auth = auth.clone();
                spawn_periodic("reset_secrets", cfg.reset_secrets, cancel.clone(), move || {
                    let auth = auth.clone();
                    async move { auth.resets().purge_expired(Utc::now()).await }
                })
            },
            {
                let auth = auth.clone();
                spawn_periodic("revocations", cfg.revocations, cancel.clone(), move || {
                    let auth = auth.clone();
                    async move { auth.ledger().purge_expired(Utc::now()).await }
                })
            },
            spawn_periodic("counters", cfg.counters, cancel, move || {
                let auth = auth.clone();
                let limiter = limiter.clone();
                async move {
                    let now = Utc::now();
                    let purged = auth.guard().purge_idle(now) + limiter.purge_idle(now);
                    Ok::<_, AuthError>(purged as u64)
                }
            }),
        ]
    }
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    sweep: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<u64, AuthError>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match sweep().await {
                        Ok(0) => debug!(sweep = name, "nothing to purge"),
                        Ok(purged) => info!(sweep = name, purged, "purged expired records"),
                        Err(e) => warn!(sweep = name, "sweep failed: {e}"),
                    }
                }
                _ = cancel.cancelled() => {
                    debug!(sweep = name, "sweeper stopped");
                    return;
                }
            }
        }
    })
}
