//! User accounts and the authentication request/response bodies.

use serde::{Deserialize, Serialize};

/// A user allowed to call the API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub created_at: String,
    #[serde(skip)]
    pub password_hash: String,
}

/// Request body for `POST /api/login/`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Successful login payload.
#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub message: String,
    pub access: String,
    pub refresh: String,
    pub user: User,
}

/// Request body for `POST /api/token/refresh/`.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh: String,
}

/// Freshly minted access token.
#[derive(Debug, Clone, Serialize)]
pub struct AccessTokenResponse {
    pub access: String,
}

/// Query string for `GET /api/logout/`.
#[derive(Debug, Clone, Deserialize)]
pub struct LogoutQuery {
    #[serde(default)]
    pub refresh_token: Option<String>,
}
