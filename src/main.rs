//! Countries Backend
//!
//! A REST backend serving country metadata from SQLite, populated from a public
//! country API and guarded by JWT authentication.

mod api;
mod auth;
mod config;
mod db;
mod errors;
mod models;
mod query;
mod sync;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use auth::{hash_password, TokenIssuer};
use config::Config;
use db::Repository;
use errors::AppError;
use sync::{CountrySource, Synchronizer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub sync: Arc<Synchronizer>,
    pub tokens: Arc<TokenIssuer>,
}

#[derive(Debug, Parser)]
#[command(name = "countries-backend", version, about = "Country metadata REST backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Synchronize the database with the country API once and exit
    Populate,
    /// Create a user, or reset its password if it exists
    CreateUser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "")]
        email: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Database path: {:?}", config.db_path);

    let state = build_state(&config).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, state).await?,
        Command::Populate => {
            tracing::info!("Starting database population...");
            let report = state.sync.synchronize().await?;
            if let Some(reason) = report.aborted {
                return Err(AppError::Upstream(reason).into());
            }
            tracing::info!(
                "Database population completed. Created: {}, Updated: {}",
                report.created,
                report.updated
            );
        }
        Command::CreateUser {
            username,
            password,
            email,
        } => {
            let user = create_user(&state.repo, &username, &password, &email).await?;
            tracing::info!("User {} ({}) is ready", user.username, user.id);
        }
    }

    Ok(())
}

/// Open the database and wire up the shared services.
async fn build_state(config: &Config) -> Result<AppState, AppError> {
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    let source = CountrySource::new(config.source_url.clone(), config.fetch_timeout)?;
    let sync = Arc::new(Synchronizer::new(repo.clone(), source));

    let secret = match &config.jwt_secret {
        Some(secret) => secret.clone(),
        None => {
            tracing::warn!(
                "No JWT secret configured (COUNTRIES_JWT_SECRET). Tokens will not survive a restart!"
            );
            format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
        }
    };
    let tokens = Arc::new(TokenIssuer::new(
        secret.as_bytes(),
        config.access_token_ttl,
        config.refresh_token_ttl,
    ));

    Ok(AppState { repo, sync, tokens })
}

async fn create_user(
    repo: &Repository,
    username: &str,
    password: &str,
    email: &str,
) -> Result<models::User, AppError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(AppError::field("username", "Username cannot be empty."));
    }
    if password.is_empty() {
        return Err(AppError::field("password", "Password is required."));
    }
    repo.upsert_user(username, email.trim(), &hash_password(password))
        .await
}

async fn serve(config: Config, state: AppState) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Starting Countries Backend");
    tracing::info!("Bind address: {}", config.bind_addr);

    if let (Some(username), Some(password)) = (&config.admin_username, &config.admin_password) {
        create_user(&state.repo, username, password, "").await?;
        tracing::info!("Admin account {} ensured", username);
    }

    if config.sync_on_startup {
        let report = sync::run_startup_sync(&state.sync, config.sync_startup_strict).await?;
        tracing::info!(
            "Startup sync finished: {} created, {} updated",
            report.created,
            report.updated
        );
    }

    if let Some(period) = config.sync_interval {
        tracing::info!("Scheduling country refresh every {:?}", period);
        sync::spawn_refresh_job(state.sync.clone(), state.repo.clone(), period);
    }

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Routes requiring a valid access token
    let protected_routes = Router::new()
        .route(
            "/countries/",
            get(api::list_countries).post(api::create_country),
        )
        .route("/countries/sync/", post(api::trigger_sync))
        .route(
            "/countries/{id}/",
            get(api::get_country)
                .patch(api::update_country)
                .delete(api::delete_country),
        )
        .route("/countries/{id}/restore/", post(api::restore_country))
        .route("/logout/", get(api::logout))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::jwt_auth_layer,
        ));

    // Credential issuance (no auth required)
    let public_routes = Router::new()
        .route("/login/", post(api::login))
        .route("/token/refresh/", post(api::refresh_token));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", protected_routes.merge(public_routes))
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
