//! Login, logout and token refresh endpoints.

use axum::{
    extract::{Query, State},
    Extension,
};
use serde_json::{json, Value};

use super::{success, ApiResult, AppJson};
use crate::auth::{verify_password, AuthUser, TokenType};
use crate::errors::AppError;
use crate::models::{AccessTokenResponse, LoginRequest, LoginResponse, LogoutQuery, RefreshRequest};
use crate::AppState;

/// POST /api/login/ - Exchange credentials for an access/refresh token pair.
pub async fn login(
    State(state): State<AppState>,
    AppJson(request): AppJson<LoginRequest>,
) -> ApiResult<LoginResponse> {
    let username = request.username.trim();
    if username.is_empty() {
        return Err(AppError::field("username", "Username can not be empty."));
    }
    if request.password.is_empty() {
        return Err(AppError::field("password", "Password can not be empty."));
    }

    let user = state
        .repo
        .find_user_by_username(username)
        .await?
        .filter(|u| verify_password(&request.password, &u.password_hash))
        .ok_or_else(|| AppError::Validation("Invalid username or password.".to_string()))?;

    if !user.is_active {
        return Err(AppError::Validation("User account is inactive.".to_string()));
    }

    let access = state.tokens.issue(&user, TokenType::Access)?;
    let refresh = state.tokens.issue(&user, TokenType::Refresh)?;

    tracing::info!("User {} logged in", user.username);
    success(LoginResponse {
        message: "Login successful".to_string(),
        access,
        refresh,
        user,
    })
}

/// GET /api/logout/?refresh_token=... - Revoke a refresh token.
pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<LogoutQuery>,
) -> ApiResult<Value> {
    let token = params
        .refresh_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::field("refresh_token", "Refresh token is required."))?;

    let claims = state.tokens.verify(token, TokenType::Refresh)?;
    if claims.user_id()? != user.id {
        return Err(AppError::Unauthorized(
            "Refresh token belongs to another user".to_string(),
        ));
    }

    state
        .repo
        .blacklist_token(&claims.jti, user.id, claims.exp)
        .await?;

    tracing::info!("User {} logged out", user.username);
    success(json!({ "message": "Logout successful" }))
}

/// POST /api/token/refresh/ - Mint a new access token from a refresh token.
pub async fn refresh_token(
    State(state): State<AppState>,
    AppJson(request): AppJson<RefreshRequest>,
) -> ApiResult<AccessTokenResponse> {
    let token = request.refresh.trim();
    if token.is_empty() {
        return Err(AppError::field("refresh", "This field is required."));
    }

    let claims = state.tokens.verify(token, TokenType::Refresh)?;
    if state.repo.is_token_blacklisted(&claims.jti).await? {
        return Err(AppError::Unauthorized("Token is blacklisted".to_string()));
    }

    let user = state
        .repo
        .get_user(claims.user_id()?)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::Unauthorized("User not found or inactive".to_string()))?;

    let access = state.tokens.issue(&user, TokenType::Access)?;
    success(AccessTokenResponse { access })
}
