//! Database repository for country operations.
//!
//! Uses prepared statements and transactions for data integrity.

use std::collections::HashSet;

use chrono::Utc;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::errors::AppError;
use crate::models::{Country, CountryData};

const COUNTRY_COLUMNS: &str = "id, name, capital, region, subregion, population, area, languages, currencies, timezones, flag, country_code, is_active, created_at, updated_at, deleted_at";

/// Rows per multi-row statement, keeping bound parameters well under SQLite's limit.
const BATCH_ROWS: usize = 500;

/// Resolved listing filter. Every present field narrows the result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListFilter {
    pub include_deleted: bool,
    pub region: Option<String>,
    pub subregion: Option<String>,
    pub language: Option<String>,
    pub name: Option<String>,
}

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pub(super) pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== QUERY OPERATIONS ====================

    /// Get a country by ID, active or not.
    pub async fn get_country(&self, id: i64) -> Result<Option<Country>, AppError> {
        let sql = format!("SELECT {} FROM countries WHERE id = ?", COUNTRY_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(country_from_row))
    }

    /// Count countries matching `filter`.
    pub async fn count_countries(&self, filter: &ListFilter) -> Result<i64, AppError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM countries");
        push_filter(&mut qb, filter);

        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// List one window of countries matching `filter`, ordered by name.
    pub async fn list_countries(
        &self,
        filter: &ListFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Country>, AppError> {
        let mut qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM countries", COUNTRY_COLUMNS));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY name ASC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(country_from_row).collect())
    }

    /// Names of every stored country, active or not.
    pub async fn country_names(&self) -> Result<HashSet<String>, AppError> {
        let names = sqlx::query_scalar::<_, String>("SELECT name FROM countries")
            .fetch_all(&self.pool)
            .await?;
        Ok(names.into_iter().collect())
    }

    // ==================== MANUAL WRITES ====================

    /// Create a new country from validated data.
    pub async fn create_country(&self, data: &CountryData) -> Result<Country, AppError> {
        self.ensure_name_available(&data.name, None).await?;

        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO countries (name, capital, region, subregion, population, area, languages, currencies, timezones, flag, country_code, name_folded, languages_folded, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)"
        )
        .bind(&data.name)
        .bind(&data.capital)
        .bind(&data.region)
        .bind(&data.subregion)
        .bind(data.population)
        .bind(data.area)
        .bind(to_json_array(&data.languages))
        .bind(to_json_array(&data.currencies))
        .bind(to_json_array(&data.timezones))
        .bind(&data.flag)
        .bind(&data.country_code)
        .bind(fold(&data.name))
        .bind(folded_json_array(&data.languages))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get_country(id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Country {} vanished after insert", id)))
    }

    /// Overwrite every mutable field of a country with validated data.
    pub async fn update_country(&self, id: i64, data: &CountryData) -> Result<Country, AppError> {
        self.ensure_name_available(&data.name, Some(id)).await?;

        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE countries SET name = ?, capital = ?, region = ?, subregion = ?, population = ?, area = ?, languages = ?, currencies = ?, timezones = ?, flag = ?, country_code = ?, name_folded = ?, languages_folded = ?, updated_at = ? WHERE id = ?"
        )
        .bind(&data.name)
        .bind(&data.capital)
        .bind(&data.region)
        .bind(&data.subregion)
        .bind(data.population)
        .bind(data.area)
        .bind(to_json_array(&data.languages))
        .bind(to_json_array(&data.currencies))
        .bind(to_json_array(&data.timezones))
        .bind(&data.flag)
        .bind(&data.country_code)
        .bind(fold(&data.name))
        .bind(folded_json_array(&data.languages))
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Country {} not found", id)));
        }

        self.get_country(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Country {} not found", id)))
    }

    /// Mark a country inactive. Deleting an inactive country changes nothing.
    pub async fn soft_delete_country(&self, id: i64) -> Result<(), AppError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE countries SET is_active = 0, deleted_at = ?, updated_at = ? WHERE id = ? AND is_active = 1",
        )
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 && self.get_country(id).await?.is_none() {
            return Err(AppError::NotFound(format!("Country {} not found", id)));
        }

        Ok(())
    }

    /// Reactivate a soft-deleted country.
    pub async fn restore_country(&self, id: i64) -> Result<Country, AppError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE countries SET is_active = 1, deleted_at = NULL, updated_at = ? WHERE id = ? AND is_active = 0",
        )
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_country(id).await? {
                Some(_) => Err(AppError::Validation(format!(
                    "Country {} is already active.",
                    id
                ))),
                None => Err(AppError::NotFound(format!("Country {} not found", id))),
            };
        }

        self.get_country(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Country {} not found", id)))
    }

    async fn ensure_name_available(&self, name: &str, except_id: Option<i64>) -> Result<(), AppError> {
        let taken = sqlx::query("SELECT id FROM countries WHERE name = ? AND id != ?")
            .bind(name)
            .bind(except_id.unwrap_or(-1))
            .fetch_optional(&self.pool)
            .await?;

        if taken.is_some() {
            return Err(AppError::field(
                "name",
                "country with this name already exists.",
            ));
        }
        Ok(())
    }

    // ==================== SYNC OPERATIONS ====================

    /// Persist one reconciliation pass atomically.
    ///
    /// `to_create` is inserted, `to_update` overwrites every mutable field of the
    /// rows with matching names. A failure in either batch rolls back both.
    pub async fn apply_sync_batch(
        &self,
        to_create: &[CountryData],
        to_update: &[CountryData],
    ) -> Result<(), AppError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        for chunk in to_create.chunks(BATCH_ROWS) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "INSERT INTO countries (name, capital, region, subregion, population, area, languages, currencies, timezones, flag, country_code, name_folded, languages_folded, is_active, created_at, updated_at) ",
            );
            qb.push_values(chunk, |mut row, country| {
                row.push_bind(country.name.clone())
                    .push_bind(country.capital.clone())
                    .push_bind(country.region.clone())
                    .push_bind(country.subregion.clone())
                    .push_bind(country.population)
                    .push_bind(country.area)
                    .push_bind(to_json_array(&country.languages))
                    .push_bind(to_json_array(&country.currencies))
                    .push_bind(to_json_array(&country.timezones))
                    .push_bind(country.flag.clone())
                    .push_bind(country.country_code.clone())
                    .push_bind(fold(&country.name))
                    .push_bind(folded_json_array(&country.languages))
                    .push_bind(true)
                    .push_bind(now.clone())
                    .push_bind(now.clone());
            });
            qb.build().execute(&mut *tx).await?;
        }

        for chunk in to_update.chunks(BATCH_ROWS) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "WITH incoming (name, capital, region, subregion, population, area, languages, currencies, timezones, flag, country_code, languages_folded) AS (",
            );
            qb.push_values(chunk, |mut row, country| {
                row.push_bind(country.name.clone())
                    .push_bind(country.capital.clone())
                    .push_bind(country.region.clone())
                    .push_bind(country.subregion.clone())
                    .push_bind(country.population)
                    .push_bind(country.area)
                    .push_bind(to_json_array(&country.languages))
                    .push_bind(to_json_array(&country.currencies))
                    .push_bind(to_json_array(&country.timezones))
                    .push_bind(country.flag.clone())
                    .push_bind(country.country_code.clone())
                    .push_bind(folded_json_array(&country.languages));
            });
            qb.push(
                r#") UPDATE countries SET
                    capital = incoming.capital,
                    region = incoming.region,
                    subregion = incoming.subregion,
                    population = incoming.population,
                    area = incoming.area,
                    languages = incoming.languages,
                    currencies = incoming.currencies,
                    timezones = incoming.timezones,
                    flag = incoming.flag,
                    country_code = incoming.country_code,
                    languages_folded = incoming.languages_folded,
                    updated_at = "#,
            )
            .push_bind(now.clone())
            .push(" FROM incoming WHERE countries.name = incoming.name");
            qb.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ListFilter) {
    qb.push(" WHERE 1 = 1");
    if !filter.include_deleted {
        qb.push(" AND is_active = 1");
    }
    if let Some(region) = &filter.region {
        qb.push(" AND region = ").push_bind(region.clone());
    }
    if let Some(subregion) = &filter.subregion {
        qb.push(" AND subregion = ").push_bind(subregion.clone());
    }
    // SQLite's lower() folds ASCII only, so matching runs on columns folded in Rust.
    if let Some(language) = &filter.language {
        qb.push(
            " AND EXISTS (SELECT 1 FROM json_each(countries.languages_folded) WHERE json_each.value = ",
        )
        .push_bind(fold(language))
        .push(")");
    }
    if let Some(name) = &filter.name {
        qb.push(" AND instr(name_folded, ")
            .push_bind(fold(name))
            .push(") > 0");
    }
}

// Helper functions for row conversion

fn country_from_row(row: &sqlx::sqlite::SqliteRow) -> Country {
    let is_active: i32 = row.get("is_active");
    let languages: String = row.get("languages");
    let currencies: String = row.get("currencies");
    let timezones: String = row.get("timezones");
    Country {
        id: row.get("id"),
        name: row.get("name"),
        capital: row.get("capital"),
        region: row.get("region"),
        subregion: row.get("subregion"),
        population: row.get("population"),
        area: row.get("area"),
        languages: parse_json_array(&languages),
        currencies: parse_json_array(&currencies),
        timezones: parse_json_array(&timezones),
        flag: row.get("flag"),
        country_code: row.get("country_code"),
        is_active: is_active != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        deleted_at: row.get("deleted_at"),
    }
}

fn to_json_array(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

/// Case-folded form used by the name and language filters.
fn fold(value: &str) -> String {
    value.to_lowercase()
}

fn folded_json_array(values: &[String]) -> String {
    let folded: Vec<String> = values.iter().map(|v| fold(v)).collect();
    to_json_array(&folded)
}

fn parse_json_array(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}
