//! Client for the upstream country list and normalization of its records.

use std::time::Duration;

use serde_json::Value;

use crate::errors::AppError;
use crate::models::CountryData;

/// HTTP adapter for the external country API.
pub struct CountrySource {
    client: reqwest::Client,
    url: String,
}

impl CountrySource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch every raw country record, sorted by common name.
    ///
    /// Never fails: on any error the list is empty and the message says why.
    pub async fn fetch_external_records(&self) -> (Vec<Value>, Option<String>) {
        match self.fetch().await {
            Ok(mut records) => {
                records.sort_by(|a, b| common_name(a).cmp(common_name(b)));
                tracing::info!("Fetched {} countries from {}", records.len(), self.url);
                (records, None)
            }
            Err(message) => {
                tracing::warn!("Country fetch from {} failed: {}", self.url, message);
                (Vec::new(), Some(message))
            }
        }
    }

    async fn fetch(&self) -> Result<Vec<Value>, String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| describe(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP error occurred (status {})", status.as_u16()));
        }

        let body: Value = response.json().await.map_err(|e| describe(&e))?;
        match body {
            Value::Array(records) => Ok(records),
            other => Err(format!(
                "Expected a JSON array of countries, got {}",
                json_kind(&other)
            )),
        }
    }
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "The request to the country API timed out.".to_string()
    } else if err.is_connect() {
        "Could not connect to the country API.".to_string()
    } else if err.is_decode() {
        "Failed to decode JSON response from the country API.".to_string()
    } else {
        format!("An issue occurred with the request: {}", err)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn common_name(raw: &Value) -> &str {
    raw.pointer("/name/common")
        .and_then(Value::as_str)
        .unwrap_or("")
}

/// Flatten one raw upstream record.
///
/// Missing or wrong-typed fields degrade to empty values. Returns `None` only
/// when the record is not an object or has no usable name.
pub fn normalize(raw: &Value) -> Option<CountryData> {
    if !raw.is_object() {
        return None;
    }

    let name = common_name(raw).trim().to_string();
    if name.is_empty() {
        return None;
    }

    let capital = raw
        .get("capital")
        .and_then(Value::as_array)
        .and_then(|list| list.first())
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let population = match raw.get("population") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0)
            .max(0),
        _ => 0,
    };

    let area = raw
        .get("area")
        .and_then(Value::as_f64)
        .filter(|a| a.is_finite() && *a >= 0.0)
        .unwrap_or(0.0);

    let languages = object_values(raw.get("languages"), |v| v.as_str().map(str::to_string));

    let currencies = object_values(raw.get("currencies"), |v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => v.get("name").and_then(Value::as_str).map(str::to_string),
        _ => None,
    });

    let timezones = raw
        .get("timezones")
        .and_then(Value::as_array)
        .map(|list| non_empty_strings(list.iter().filter_map(Value::as_str)))
        .unwrap_or_default();

    let flag = raw
        .pointer("/flags/png")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let country_code = raw
        .get("cca2")
        .and_then(Value::as_str)
        .filter(|code| code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()))
        .map(str::to_ascii_uppercase);

    Some(CountryData {
        name,
        capital,
        region: string_field(raw, "region"),
        subregion: string_field(raw, "subregion"),
        population,
        area,
        languages,
        currencies,
        timezones,
        flag,
        country_code,
    })
}

fn string_field(raw: &Value, key: &str) -> String {
    raw.get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

/// The values of a JSON object mapped through `extract`, in key order.
fn object_values<F>(value: Option<&Value>, extract: F) -> Vec<String>
where
    F: Fn(&Value) -> Option<String>,
{
    let Some(Value::Object(map)) = value else {
        return Vec::new();
    };
    map.values()
        .filter_map(extract)
        .filter(|s| !s.trim().is_empty())
        .collect()
}

fn non_empty_strings<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    values
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .collect()
}
