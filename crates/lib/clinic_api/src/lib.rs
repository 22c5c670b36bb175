//! # clinic_api
//!
//! HTTP API library for the clinic session core.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use clinic_core::audit::AuditSink;
use clinic_core::mail::Mailer;
use clinic_core::ratelimit::RateLimiter;
use clinic_core::session::SessionAuthenticator;
use clinic_core::store::Stores;
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ApiConfig;
use crate::handlers::{auth, health, rate_limiting};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// API configuration.
    pub config: ApiConfig,
    pub auth: Arc<SessionAuthenticator>,
    /// General `/api/**` limiter.
    pub limiter: Arc<RateLimiter>,
    pub audit: Arc<dyn AuditSink>,
    /// PostgreSQL connection pool, absent on in-memory stores.
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        stores: Stores,
        audit: Arc<dyn AuditSink>,
        mailer: Arc<dyn Mailer>,
        pool: Option<PgPool>,
    ) -> Self {
        let auth = SessionAuthenticator::new(
            stores,
            &config.auth,
            config.jwt_secret.as_bytes().to_vec(),
            audit.clone(),
            mailer,
        );
        let limiter = RateLimiter::new(config.auth.rate_limit.clone());
        Self {
            config,
            auth: Arc::new(auth),
            limiter: Arc::new(limiter),
            audit,
            pool,
        }
    }
}

/// Run embedded database migrations.
///
/// Delegates to `clinic_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    clinic_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let require_auth = || {
        axum::middleware::from_fn_with_state(state.clone(), middleware::auth::require_auth)
    };

    // Login is covered by the brute-force guard, not the general limiter.
    let auth_public = Router::new()
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/refresh", post(auth::refresh_handler))
        .route("/auth/forgot-password", post(auth::forgot_password_handler))
        .route("/auth/reset-password", post(auth::reset_password_handler));

    let auth_protected = Router::new()
        .route("/auth/logout", post(auth::logout_handler))
        .route_layer(require_auth());

    let api_public = Router::new()
        .route("/api/health", get(health::health))
        .route("/api/rate-limiting/stats", get(rate_limiting::stats_handler))
        .route("/api/rate-limiting/reset", post(rate_limiting::reset_handler));

    let api_admin = Router::new()
        .route(
            "/api/rate-limiting/blocked",
            get(rate_limiting::blocked_handler),
        )
        .route(
            "/api/rate-limiting/unblock/{ip}",
            post(rate_limiting::unblock_handler),
        )
        .route_layer(require_auth());

    // Rate limiting runs before authentication on every `/api/**` route.
    let api = Router::new()
        .merge(api_public)
        .merge(api_admin)
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit,
        ));

    Router::new()
        .merge(auth_public)
        .merge(auth_protected)
        .merge(api)
        .layer(cors)
        .with_state(state)
}
