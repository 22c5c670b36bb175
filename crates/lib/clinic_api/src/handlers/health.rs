//! Liveness endpoint.

use axum::Json;
use axum::extract::State;

use crate::AppState;
use crate::models::HealthResponse;

/// `GET /api/health` — process liveness plus database reachability when a
/// database is configured. Exempt from rate limiting.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_connected = match &state.pool {
        Some(pool) => Some(sqlx::query("SELECT 1").execute(pool).await.is_ok()),
        None => None,
    };
    Json(HealthResponse {
        status: "UP".to_string(),
        version: clinic_core::version().to_string(),
        db_connected,
    })
}
