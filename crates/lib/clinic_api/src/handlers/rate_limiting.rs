//! Rate limit introspection and administration.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use clinic_core::audit::{self, AuditAction, AuditEvent};
use tracing::info;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::middleware::rate_limit::ClientIp;
use crate::models::{BlockedListResponse, MessageResponse, RateLimitStatsResponse};

const ADMIN_ROLE: &str = "admin";

/// `GET /api/rate-limiting/stats` — the caller's own counters.
pub async fn stats_handler(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
) -> Json<RateLimitStatsResponse> {
    let config = state.limiter.config();
    Json(RateLimitStatsResponse {
        status: state.limiter.status(&ip),
        max_per_minute: config.max_per_window,
        block_threshold: config.block_threshold,
        ip,
    })
}

/// `POST /api/rate-limiting/reset` — clear the caller's own counters.
pub async fn reset_handler(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
) -> Json<MessageResponse> {
    state.limiter.reset(&ip);
    Json(MessageResponse::new("Rate limit statistics reset"))
}

/// `GET /api/rate-limiting/blocked` — every blocked address. Admin only.
pub async fn blocked_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> AppResult<Json<BlockedListResponse>> {
    user.require_role(ADMIN_ROLE)?;
    let blocked = state.limiter.blocked();
    Ok(Json(BlockedListResponse {
        count: blocked.len(),
        blocked,
    }))
}

/// `POST /api/rate-limiting/unblock/{ip}` — lift a block early. Admin only.
pub async fn unblock_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(ip): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    user.require_role(ADMIN_ROLE)?;
    if !state.limiter.unblock(&ip) {
        return Err(AppError::NotFound(format!("{ip} is not blocked")));
    }
    info!(ip = %ip, admin = %user.claims.sub, "address unblocked");
    audit::emit(
        &state.audit,
        AuditEvent::new(AuditAction::ApiUnblocked)
            .subject(&user.claims.sub)
            .ip(&ip),
    )
    .await;
    Ok(Json(MessageResponse::new(format!("{ip} unblocked"))))
}
