//! Country model and the validation applied to manual writes.

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Upper sanity bound for population.
pub const MAX_POPULATION: i64 = 10_000_000_000;
/// Upper sanity bound for area in square kilometres.
pub const MAX_AREA: f64 = 100_000_000.0;
/// Population above which a capital is mandatory.
const CAPITAL_REQUIRED_ABOVE: i64 = 1_000_000;

const MAX_LANGUAGES: usize = 100;
const MAX_CURRENCIES: usize = 50;
const MAX_TIMEZONES: usize = 50;

/// A stored country record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Country {
    pub id: i64,
    pub name: String,
    pub capital: String,
    pub region: String,
    pub subregion: String,
    pub population: i64,
    pub area: f64,
    pub languages: Vec<String>,
    pub currencies: Vec<String>,
    pub timezones: Vec<String>,
    pub flag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
}

impl Country {
    /// The mutable payload of this record.
    pub fn data(&self) -> CountryData {
        CountryData {
            name: self.name.clone(),
            capital: self.capital.clone(),
            region: self.region.clone(),
            subregion: self.subregion.clone(),
            population: self.population,
            area: self.area,
            languages: self.languages.clone(),
            currencies: self.currencies.clone(),
            timezones: self.timezones.clone(),
            flag: self.flag.clone(),
            country_code: self.country_code.clone(),
        }
    }
}

/// Every field of a country that callers or the synchronizer may write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountryData {
    pub name: String,
    pub capital: String,
    pub region: String,
    pub subregion: String,
    pub population: i64,
    pub area: f64,
    pub languages: Vec<String>,
    pub currencies: Vec<String>,
    pub timezones: Vec<String>,
    pub flag: String,
    pub country_code: Option<String>,
}

/// Request body for creating a country.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCountryRequest {
    pub name: String,
    #[serde(default)]
    pub capital: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub subregion: String,
    #[serde(default)]
    pub population: i64,
    #[serde(default)]
    pub area: f64,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub currencies: Vec<String>,
    #[serde(default)]
    pub timezones: Vec<String>,
    #[serde(default)]
    pub flag: String,
    #[serde(default)]
    pub country_code: Option<String>,
}

impl From<CreateCountryRequest> for CountryData {
    fn from(request: CreateCountryRequest) -> Self {
        Self {
            name: request.name,
            capital: request.capital,
            region: request.region,
            subregion: request.subregion,
            population: request.population,
            area: request.area,
            languages: request.languages,
            currencies: request.currencies,
            timezones: request.timezones,
            flag: request.flag,
            country_code: request.country_code,
        }
    }
}

/// Request body for a partial update. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCountryRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub capital: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub subregion: Option<String>,
    #[serde(default)]
    pub population: Option<i64>,
    #[serde(default)]
    pub area: Option<f64>,
    #[serde(default)]
    pub languages: Option<Vec<String>>,
    #[serde(default)]
    pub currencies: Option<Vec<String>>,
    #[serde(default)]
    pub timezones: Option<Vec<String>>,
    #[serde(default)]
    pub flag: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
}

impl UpdateCountryRequest {
    /// Overlay the supplied fields onto `existing`.
    ///
    /// Only supplied fields go through the field rules, so a record stored by
    /// the synchronizer stays editable even when its other fields would not
    /// pass them. The cross-field rules still see the merged record.
    pub fn apply_to(self, existing: CountryData) -> Result<CountryData, AppError> {
        let country_code = match self.country_code {
            Some(code) => clean_country_code(Some(&code))?,
            None => existing.country_code,
        };

        let data = CountryData {
            name: supplied(self.name, existing.name, |v| clean_name(&v))?,
            capital: supplied(self.capital, existing.capital, |v| {
                clean_place("capital", "Capital", &v)
            })?,
            region: supplied(self.region, existing.region, |v| {
                clean_place("region", "Region", &v)
            })?,
            subregion: supplied(self.subregion, existing.subregion, |v| {
                clean_place("subregion", "Subregion", &v)
            })?,
            population: supplied(self.population, existing.population, check_population)?,
            area: supplied(self.area, existing.area, check_area)?,
            languages: supplied(self.languages, existing.languages, |v| {
                clean_list("languages", "language", &v, MAX_LANGUAGES)
            })?,
            currencies: supplied(self.currencies, existing.currencies, |v| {
                clean_list("currencies", "currency", &v, MAX_CURRENCIES)
            })?,
            timezones: supplied(self.timezones, existing.timezones, |v| {
                clean_list("timezones", "timezone", &v, MAX_TIMEZONES)
            })?,
            flag: supplied(self.flag, existing.flag, |v| clean_flag(&v))?,
            country_code,
        };

        data.check_consistency()?;
        Ok(data)
    }
}

fn supplied<T, U>(
    value: Option<T>,
    existing: U,
    check: impl FnOnce(T) -> Result<U, AppError>,
) -> Result<U, AppError> {
    value.map(check).transpose().map(|v| v.unwrap_or(existing))
}

impl CountryData {
    /// Validate and clean a manually submitted record.
    ///
    /// Returns the trimmed record, or the first failing field.
    pub fn validated(self) -> Result<CountryData, AppError> {
        let data = CountryData {
            name: clean_name(&self.name)?,
            capital: clean_place("capital", "Capital", &self.capital)?,
            region: clean_place("region", "Region", &self.region)?,
            subregion: clean_place("subregion", "Subregion", &self.subregion)?,
            population: check_population(self.population)?,
            area: check_area(self.area)?,
            languages: clean_list("languages", "language", &self.languages, MAX_LANGUAGES)?,
            currencies: clean_list("currencies", "currency", &self.currencies, MAX_CURRENCIES)?,
            timezones: clean_list("timezones", "timezone", &self.timezones, MAX_TIMEZONES)?,
            flag: clean_flag(&self.flag)?,
            country_code: clean_country_code(self.country_code.as_deref())?,
        };

        data.check_consistency()?;
        Ok(data)
    }

    fn check_consistency(&self) -> Result<(), AppError> {
        if self.languages.is_empty() && self.currencies.is_empty() && self.timezones.is_empty() {
            return Err(AppError::Validation(
                "At least one of languages, currencies, or timezones must be provided.".to_string(),
            ));
        }

        if self.population > CAPITAL_REQUIRED_ABOVE && self.capital.trim().is_empty() {
            return Err(AppError::field(
                "capital",
                "Capital is required for countries with a population over 1 million.",
            ));
        }

        Ok(())
    }
}

fn clean_name(value: &str) -> Result<String, AppError> {
    let name = value.trim();
    if name.is_empty() {
        return Err(AppError::field("name", "Country name cannot be empty."));
    }
    if name.chars().count() < 2 {
        return Err(AppError::field(
            "name",
            "Country name must be at least 2 characters long.",
        ));
    }
    if !is_letters_and_spaces(name) {
        return Err(AppError::field(
            "name",
            "Country name can only contain letters and spaces.",
        ));
    }
    Ok(name.to_string())
}

fn check_population(population: i64) -> Result<i64, AppError> {
    if population < 0 {
        return Err(AppError::field("population", "Population cannot be negative."));
    }
    if population > MAX_POPULATION {
        return Err(AppError::field(
            "population",
            "Population exceeds realistic limits.",
        ));
    }
    Ok(population)
}

fn check_area(area: f64) -> Result<f64, AppError> {
    if !area.is_finite() || area < 0.0 {
        return Err(AppError::field("area", "Area cannot be negative."));
    }
    if area > MAX_AREA {
        return Err(AppError::field("area", "Area exceeds realistic limits."));
    }
    Ok(area)
}

fn clean_flag(value: &str) -> Result<String, AppError> {
    let flag = value.trim();
    if !flag.is_empty() && !is_flag_url(flag) {
        return Err(AppError::field("flag", "Invalid URL format for flag."));
    }
    Ok(flag.to_string())
}

fn clean_country_code(value: Option<&str>) -> Result<Option<String>, AppError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(code) if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) => {
            Ok(Some(code.to_ascii_uppercase()))
        }
        Some(_) => Err(AppError::field(
            "countryCode",
            "Country code must be exactly two letters.",
        )),
    }
}

fn is_letters_and_spaces(value: &str) -> bool {
    value.chars().all(|c| c.is_alphabetic() || c.is_whitespace())
}

fn clean_place(field: &str, label: &str, value: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if !trimmed.is_empty() && !is_letters_and_spaces(trimmed) {
        return Err(AppError::field(
            field,
            format!("{} name can only contain letters and spaces.", label),
        ));
    }
    Ok(trimmed.to_string())
}

fn clean_list(
    field: &str,
    item: &str,
    values: &[String],
    max: usize,
) -> Result<Vec<String>, AppError> {
    if values.iter().any(|v| v.trim().is_empty()) {
        return Err(AppError::field(
            field,
            format!("Each {} must be a non-empty string.", item),
        ));
    }
    if values.len() > max {
        return Err(AppError::field(
            field,
            format!("Too many {} specified.", field),
        ));
    }
    Ok(values.iter().map(|v| v.trim().to_string()).collect())
}

fn is_flag_url(value: &str) -> bool {
    let has_scheme = ["http://", "https://", "www."]
        .iter()
        .any(|prefix| value.starts_with(prefix) && value.len() > prefix.len());
    has_scheme
        && !value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '<' | '>' | '"'))
}
