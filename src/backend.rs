use crate::assembler::CargoParams;
use crate::builder::CargoQuery;
use crate::config::ProviderConfig;
use crate::error::{QueryError, Result};
use crate::literal::{DATETIME_FORMAT, DATE_FORMAT};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, trace};

/// Row of a `cargoquery` response: column name to raw cell text.
///
/// Cargo returns every cell as a string; `NULL` arrives as an empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CargoRow {
    pub columns: HashMap<String, String>,
}

impl CargoRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.columns.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.columns.get(key).map(String::as_str)
    }

    /// Parse a cell; a missing or unparsable cell is a `Materialize` error.
    pub fn get_parsed<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self
            .get(key)
            .ok_or_else(|| QueryError::Materialize(format!("missing column {}", key)))?;
        raw.trim()
            .parse()
            .map_err(|e| QueryError::Materialize(format!("column {} = {:?}: {}", key, raw, e)))
    }

    /// Like [`get_parsed`](Self::get_parsed), but empty or missing cells are `None`
    pub fn get_optional<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(_) => self.get_parsed(key).map(Some),
        }
    }

    /// Split a list field cell on its delimiter
    pub fn get_list(&self, key: &str, delimiter: char) -> Vec<&str> {
        self.get(key)
            .map(|raw| {
                raw.split(delimiter)
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)?.trim() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        }
    }

    /// Parse a `Datetime` cell; date-only cells read as midnight.
    pub fn get_datetime(&self, key: &str) -> Result<NaiveDateTime> {
        let raw = self
            .get(key)
            .ok_or_else(|| QueryError::Materialize(format!("missing column {}", key)))?
            .trim();
        NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT)
            .or_else(|_| {
                NaiveDate::parse_from_str(raw, DATE_FORMAT)
                    .map(|d| d.and_time(NaiveTime::MIN))
            })
            .map_err(|e| QueryError::Materialize(format!("column {} = {:?}: {}", key, raw, e)))
    }
}

/// Result of a query
pub type QueryResult = Vec<CargoRow>;

/// Turn a row into a caller type
pub trait FromRow: Sized {
    fn from_row(row: &CargoRow) -> Result<Self>;
}

impl FromRow for CargoRow {
    fn from_row(row: &CargoRow) -> Result<Self> {
        Ok(row.clone())
    }
}

/// Transport that executes `cargoquery` requests
#[async_trait]
pub trait CargoBackend: Send + Sync {
    /// Send one request and return its rows
    async fn cargo_query(&self, params: &CargoParams) -> Result<QueryResult>;

    /// Limits of the wiki behind this backend
    fn config(&self) -> ProviderConfig {
        ProviderConfig::default()
    }
}

/// Extract rows from a decoded `action=cargoquery` API response:
/// `{"cargoquery": [{"title": {"col": "value", ...}}, ...]}`.
pub fn rows_from_response(response: &Value) -> Result<QueryResult> {
    if let Some(error) = response.get("error") {
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(QueryError::Backend(info));
    }

    let items = response
        .get("cargoquery")
        .and_then(Value::as_array)
        .ok_or_else(|| QueryError::Materialize("response has no cargoquery array".to_string()))?;

    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        let cells = item
            .get("title")
            .and_then(Value::as_object)
            .ok_or_else(|| QueryError::Materialize(format!("malformed row {}", item)))?;
        let mut row = CargoRow::new();
        for (name, cell) in cells {
            let text = match cell {
                Value::Null => String::new(),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            row.insert(name.as_str(), text);
        }
        rows.push(row);
    }
    trace!("decoded {} cargoquery rows", rows.len());
    Ok(rows)
}

impl<'r, T: 'static> CargoQuery<'r, T> {
    /// Build with the backend's limits and send once
    pub async fn fetch<B>(&self, backend: &B) -> Result<QueryResult>
    where
        B: CargoBackend + ?Sized,
    {
        let params = self.build(&backend.config())?;
        debug!("cargoquery {}", params.to_query_string());
        backend.cargo_query(&params).await
    }

    /// Fetch and materialize every row
    pub async fn fetch_as<R, B>(&self, backend: &B) -> Result<Vec<R>>
    where
        R: FromRow,
        B: CargoBackend + ?Sized,
    {
        self.fetch(backend)
            .await?
            .iter()
            .map(R::from_row)
            .collect()
    }

    /// Fetch page after page until one comes back short.
    pub async fn fetch_all<B>(&self, backend: &B, page_size: u64) -> Result<QueryResult>
    where
        B: CargoBackend + ?Sized,
    {
        let mut rows = Vec::new();
        for page in self.pages(page_size) {
            let requested = page.state().limit().unwrap_or(page_size);
            let batch = page.fetch(backend).await?;
            let short = (batch.len() as u64) < requested;
            debug!(
                "page at offset {:?}: {} rows",
                page.state().offset(),
                batch.len()
            );
            rows.extend(batch);
            if short {
                break;
            }
        }
        Ok(rows)
    }
}
