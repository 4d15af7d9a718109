//! Filtered, paginated listing of countries.

use serde::{Deserialize, Serialize};

use crate::db::{ListFilter, Repository};
use crate::errors::AppError;
use crate::models::Country;

/// Page size used when none (or an unusable one) is requested.
pub const DEFAULT_PAGE_SIZE: i64 = 25;
/// Largest page size a caller may request.
pub const MAX_PAGE_SIZE: i64 = 100;
/// Token requesting the final page.
pub const LAST_PAGE: &str = "last";

const INVALID_PAGE: &str = "Invalid page number.";

/// Raw query string of `GET /api/countries/`.
///
/// Everything arrives as text so malformed values produce our own errors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub region_country_id: Option<String>,
    pub subregion_country_id: Option<String>,
    pub language: Option<String>,
    pub name: Option<String>,
    pub include_deleted: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

/// One page of results.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T: Serialize> {
    pub count: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub results: Vec<T>,
}

/// Requested page, before it is checked against the result size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageNumber {
    Number(i64),
    Last,
}

/// Resolved slice of the result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub page: i64,
    pub total_pages: i64,
    pub limit: i64,
    pub offset: i64,
}

pub fn parse_page(raw: Option<&str>) -> Result<PageNumber, AppError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(PageNumber::Number(1)),
        Some(LAST_PAGE) => Ok(PageNumber::Last),
        Some(value) => value
            .parse()
            .map(PageNumber::Number)
            .map_err(|_| AppError::NotFound(INVALID_PAGE.to_string())),
    }
}

/// Unusable sizes fall back to the default; oversized ones are capped.
pub fn parse_page_size(raw: Option<&str>) -> i64 {
    match raw.and_then(|s| s.trim().parse::<i64>().ok()) {
        Some(size) if size > 0 => size.min(MAX_PAGE_SIZE),
        _ => DEFAULT_PAGE_SIZE,
    }
}

/// Place the requested page over `count` results.
///
/// The first page always exists, even when there are no results.
pub fn paginate(count: i64, page: PageNumber, page_size: i64) -> Result<Window, AppError> {
    let total_pages = ((count + page_size - 1) / page_size).max(1);
    let page = match page {
        PageNumber::Last => total_pages,
        PageNumber::Number(n) => n,
    };
    if page < 1 || page > total_pages {
        return Err(AppError::NotFound(INVALID_PAGE.to_string()));
    }

    Ok(Window {
        page,
        total_pages,
        limit: page_size,
        offset: (page - 1) * page_size,
    })
}

/// List countries according to `query`, ordered by name.
pub async fn list_countries(repo: &Repository, query: &ListQuery) -> Result<Page<Country>, AppError> {
    let mut filter = ListFilter {
        include_deleted: parse_flag("include_deleted", query.include_deleted.as_deref())?,
        ..Default::default()
    };
    // A reference country without a region (or subregion) matches nothing.
    let mut matches_nothing = false;

    if let Some(id) = reference_id("region_country_id", query.region_country_id.as_deref())? {
        let reference = resolve_reference(repo, id).await?;
        if reference.region.is_empty() {
            matches_nothing = true;
        } else {
            filter.region = Some(reference.region);
        }
    }

    if let Some(id) = reference_id("subregion_country_id", query.subregion_country_id.as_deref())? {
        let reference = resolve_reference(repo, id).await?;
        if reference.subregion.is_empty() {
            matches_nothing = true;
        } else {
            filter.subregion = Some(reference.subregion);
        }
    }

    if let Some(language) = &query.language {
        let language = language.trim();
        if language.is_empty() {
            return Err(AppError::field("language", "Language cannot be empty."));
        }
        filter.language = Some(language.to_string());
    }

    if let Some(name) = &query.name {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::field("name", "Name cannot be empty."));
        }
        filter.name = Some(name.to_string());
    }

    let page = parse_page(query.page.as_deref())?;
    let page_size = parse_page_size(query.page_size.as_deref());

    let count = if matches_nothing {
        0
    } else {
        repo.count_countries(&filter).await?
    };
    let window = paginate(count, page, page_size)?;

    let results = if count == 0 {
        Vec::new()
    } else {
        repo.list_countries(&filter, window.limit, window.offset)
            .await?
    };

    Ok(Page {
        count,
        page: window.page,
        page_size,
        total_pages: window.total_pages,
        results,
    })
}

fn reference_id(param: &str, raw: Option<&str>) -> Result<Option<i64>, AppError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| AppError::field(param, format!("{} must be an integer.", param))),
    }
}

async fn resolve_reference(repo: &Repository, id: i64) -> Result<Country, AppError> {
    repo.get_country(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Country with ID {} does not exist.", id)))
}

fn parse_flag(param: &str, raw: Option<&str>) -> Result<bool, AppError> {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("false") | Some("0") | Some("no") => Ok(false),
        Some("true") | Some("1") | Some("yes") => Ok(true),
        Some(_) => Err(AppError::field(param, format!("{} must be a boolean.", param))),
    }
}
