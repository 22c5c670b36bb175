//! Authentication request handlers.

use axum::extract::State;
use axum::{Extension, Json};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::middleware::rate_limit::ClientIp;
use crate::models::{
    ForgotPasswordRequest, LoginRequest, MessageResponse, RefreshRequest, ResetPasswordRequest,
    TokenResponse,
};

/// `POST /auth/login` — authenticate with username (e-mail) + password.
pub async fn login_handler(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    if body.username.trim().is_empty() || body.password.is_empty() {
        return Err(AppError::Validation(
            "Username and password are required".into(),
        ));
    }
    let pair = state
        .auth
        .login(body.username.trim(), &body.password, &ip)
        .await?;
    Ok(Json(pair.into()))
}

/// `POST /auth/refresh` — exchange a refresh token for a new access token.
/// The refresh token itself is returned unchanged.
pub async fn refresh_handler(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<TokenResponse>> {
    let pair = state.auth.refresh(&body.refresh_token).await?;
    Ok(Json(pair.into()))
}

/// `POST /auth/logout` — revoke the caller's access token and refresh tokens.
pub async fn logout_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> AppResult<Json<MessageResponse>> {
    state.auth.logout(&user.token, &user.claims).await?;
    Ok(Json(MessageResponse::new("Logged out successfully")))
}

/// `POST /auth/forgot-password` — e-mail a one-time reset link.
pub async fn forgot_password_handler(
    State(state): State<AppState>,
    Json(body): Json<ForgotPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    state.auth.forgot_password(body.email.trim()).await?;
    Ok(Json(MessageResponse::new("Password reset email sent")))
}

/// `POST /auth/reset-password` — set a new password using a reset token.
pub async fn reset_password_handler(
    State(state): State<AppState>,
    Json(body): Json<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    state
        .auth
        .reset_password(&body.token, &body.new_password)
        .await?;
    Ok(Json(MessageResponse::new(
        "Password has been reset successfully",
    )))
}
