//! Manual trigger for the upstream synchronization.

use axum::{extract::State, Extension};

use super::{success, ApiResult};
use crate::auth::AuthUser;
use crate::sync::SyncReport;
use crate::AppState;

/// POST /api/countries/sync/ - Run a synchronization pass now.
///
/// An unreachable source is reported in the body, not as an error status.
pub async fn trigger_sync(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<SyncReport> {
    tracing::info!("User {} triggered a country sync", user.username);
    let report = state.sync.synchronize().await?;
    success(report)
}
