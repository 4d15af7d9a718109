//! Configuration module for the countries backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::AppError;

/// Default upstream endpoint listing every country.
pub const DEFAULT_SOURCE_URL: &str = "https://restcountries.com/v3.1/all";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// HMAC secret for signing tokens; a random one is generated when unset
    pub jwt_secret: Option<String>,
    /// Lifetime of access tokens
    pub access_token_ttl: Duration,
    /// Lifetime of refresh tokens
    pub refresh_token_ttl: Duration,
    /// Upstream country list endpoint
    pub source_url: String,
    /// Timeout applied to the upstream fetch
    pub fetch_timeout: Duration,
    /// Run a sync before the server starts accepting requests
    pub sync_on_startup: bool,
    /// Abort the boot when the startup sync cannot reach the source
    pub sync_startup_strict: bool,
    /// Period of the background refresh job, disabled when unset
    pub sync_interval: Option<Duration>,
    /// Admin account ensured at boot
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let db_path = env::var("COUNTRIES_DB_PATH")
            .unwrap_or_else(|_| "./data/countries.sqlite".to_string())
            .into();

        let bind_addr = parse_var("COUNTRIES_BIND_ADDR", "127.0.0.1:8080".parse().ok())?
            .ok_or_else(|| AppError::Internal("Missing bind address".to_string()))?;

        let log_level = env::var("COUNTRIES_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let jwt_secret = env::var("COUNTRIES_JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty());

        let access_token_ttl = Duration::from_secs(
            parse_var("COUNTRIES_ACCESS_TOKEN_TTL_SECS", Some(300))?.unwrap_or(300),
        );
        let refresh_token_ttl = Duration::from_secs(
            parse_var("COUNTRIES_REFRESH_TOKEN_TTL_SECS", Some(86_400))?.unwrap_or(86_400),
        );

        let source_url =
            env::var("COUNTRIES_SOURCE_URL").unwrap_or_else(|_| DEFAULT_SOURCE_URL.to_string());

        let fetch_timeout = Duration::from_secs(
            parse_var("COUNTRIES_FETCH_TIMEOUT_SECS", Some(10))?.unwrap_or(10),
        );

        let sync_on_startup =
            parse_var("COUNTRIES_SYNC_ON_STARTUP", Some(false))?.unwrap_or(false);
        let sync_startup_strict =
            parse_var("COUNTRIES_SYNC_STARTUP_STRICT", Some(false))?.unwrap_or(false);

        let sync_interval = parse_var::<u64>("COUNTRIES_SYNC_INTERVAL_SECS", None)?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let admin_username = env::var("COUNTRIES_ADMIN_USERNAME").ok();
        let admin_password = env::var("COUNTRIES_ADMIN_PASSWORD").ok();

        Ok(Self {
            db_path,
            bind_addr,
            log_level,
            jwt_secret,
            access_token_ttl,
            refresh_token_ttl,
            source_url,
            fetch_timeout,
            sync_on_startup,
            sync_startup_strict,
            sync_interval,
            admin_username,
            admin_password,
        })
    }
}

/// Read and parse an optional variable, falling back to `default` when unset.
fn parse_var<T: FromStr>(name: &str, default: Option<T>) -> Result<Option<T>, AppError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::Internal(format!("Invalid {} value: {}", name, raw))),
        Err(_) => Ok(default),
    }
}
