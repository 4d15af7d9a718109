//! Country API endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension,
};

use super::{created, success, ApiResult, AppJson};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::{Country, CountryData, CreateCountryRequest, UpdateCountryRequest};
use crate::query::{self, ListQuery, Page};
use crate::AppState;

/// GET /api/countries/ - List countries with filters and pagination.
pub async fn list_countries(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> ApiResult<Page<Country>> {
    let page = query::list_countries(&state.repo, &params).await?;
    success(page)
}

/// GET /api/countries/:id/ - Get a single country, active or not.
pub async fn get_country(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Country> {
    match state.repo.get_country(id).await? {
        Some(country) => success(country),
        None => Err(AppError::NotFound(format!("Country {} not found", id))),
    }
}

/// POST /api/countries/ - Create a new country.
pub async fn create_country(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    AppJson(request): AppJson<CreateCountryRequest>,
) -> ApiResult<Country> {
    let data = CountryData::from(request).validated()?;
    let country = state.repo.create_country(&data).await?;

    tracing::info!("User {} created country {} ({})", user.username, country.name, country.id);
    created(country)
}

/// PATCH /api/countries/:id/ - Partially update a country.
pub async fn update_country(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    AppJson(request): AppJson<UpdateCountryRequest>,
) -> ApiResult<Country> {
    let existing = state
        .repo
        .get_country(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Country {} not found", id)))?;

    let data = request.apply_to(existing.data())?;
    let country = state.repo.update_country(id, &data).await?;

    tracing::info!("User {} updated country {} ({})", user.username, country.name, id);
    success(country)
}

/// DELETE /api/countries/:id/ - Soft delete a country.
pub async fn delete_country(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.repo.soft_delete_country(id).await?;

    tracing::info!("User {} deactivated country {}", user.username, id);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/countries/:id/restore/ - Reactivate a soft-deleted country.
pub async fn restore_country(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<Country> {
    let country = state.repo.restore_country(id).await?;

    tracing::info!("User {} restored country {} ({})", user.username, country.name, id);
    success(country)
}
