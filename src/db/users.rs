//! User accounts and revoked refresh tokens.

use chrono::Utc;
use sqlx::Row;

use super::Repository;
use crate::errors::AppError;
use crate::models::User;

const USER_COLUMNS: &str = "id, username, email, password_hash, is_active, created_at";

impl Repository {
    // ==================== USER OPERATIONS ====================

    /// Look a user up by username, ignoring case.
    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {} FROM users WHERE username = ?", USER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(user_from_row))
    }

    /// Get a user by ID.
    pub async fn get_user(&self, id: i64) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(user_from_row))
    }

    /// Create the user, or reset the password and reactivate it if the name exists.
    pub async fn upsert_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, AppError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"INSERT INTO users (username, email, password_hash, is_active, created_at)
               VALUES (?, ?, ?, 1, ?)
               ON CONFLICT(username) DO UPDATE SET
                   email = excluded.email,
                   password_hash = excluded.password_hash,
                   is_active = 1"#,
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.find_user_by_username(username)
            .await?
            .ok_or_else(|| AppError::Internal(format!("User {} vanished after upsert", username)))
    }

    // ==================== TOKEN BLACKLIST ====================

    /// Revoke a refresh token by its `jti`. Revoking twice is harmless.
    pub async fn blacklist_token(
        &self,
        jti: &str,
        user_id: i64,
        expires_at: i64,
    ) -> Result<(), AppError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT OR IGNORE INTO token_blacklist (jti, user_id, expires_at, blacklisted_at) VALUES (?, ?, ?, ?)",
        )
        .bind(jti)
        .bind(user_id)
        .bind(expires_at)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Whether the refresh token with this `jti` was revoked.
    pub async fn is_token_blacklisted(&self, jti: &str) -> Result<bool, AppError> {
        let row = sqlx::query("SELECT 1 FROM token_blacklist WHERE jti = ?")
            .bind(jti)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Drop blacklist entries whose tokens have expired anyway.
    pub async fn purge_expired_tokens(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM token_blacklist WHERE expires_at < ?")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> User {
    let is_active: i32 = row.get("is_active");
    User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        is_active: is_active != 0,
        created_at: row.get("created_at"),
        password_hash: row.get("password_hash"),
    }
}
