//! JWT authentication module.
//!
//! Access tokens gate every country endpoint; refresh tokens can be revoked.

mod password;
mod tokens;

pub use password::{hash_password, verify_password};
pub use tokens::{TokenIssuer, TokenType};

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::errors::AppError;
use crate::AppState;

/// The caller behind a verified access token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
}

/// Bearer authentication layer.
///
/// Rejects the request unless it carries a valid access token for an active user.
pub async fn jwt_auth_layer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = bearer_token(&request);
    match authenticate(&state, token).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

/// Extract the bearer token from the Authorization header.
fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

async fn authenticate(state: &AppState, token: Option<String>) -> Result<AuthUser, AppError> {
    let token = token.ok_or_else(|| {
        AppError::Unauthorized("Authentication credentials were not provided.".to_string())
    })?;

    let claims = state.tokens.verify(&token, TokenType::Access)?;
    let user = state
        .repo
        .get_user(claims.user_id()?)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::Unauthorized("User not found or inactive".to_string()))?;

    Ok(AuthUser {
        id: user.id,
        username: user.username,
    })
}
