//! Authentication middleware: Bearer token extraction, JWT verification and
//! the revocation ledger check.

use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use clinic_core::models::auth::TokenClaims;

use crate::AppState;
use crate::error::AppError;

/// Verified caller, stored in request extensions by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub claims: TokenClaims,
    /// The raw access token, needed to revoke it on logout.
    pub token: String,
}

impl AuthenticatedUser {
    pub fn require_role(&self, role: &str) -> Result<(), AppError> {
        if self.claims.has_role(role) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("{role} role required")))
        }
    }
}

/// Axum middleware: extracts `Authorization: Bearer <token>`, authorizes it
/// and injects `AuthenticatedUser` into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization scheme".into()))?
        .to_string();

    let claims = state.auth.authorize(&token).await?;

    request
        .extensions_mut()
        .insert(AuthenticatedUser { claims, token });

    Ok(next.run(request).await)
}
