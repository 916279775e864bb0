//! # Data Store Boundary
//!
//! The coordination core never owns the relational store. It reaches it through
//! [`DataStore`], a parameterized table-lookup capability keyed by table name
//! and equality filters. Rows are JSON objects so every collection shares one
//! shape.

pub mod cache;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::constants::fields;
use crate::error::StoreError;

pub use cache::{CacheInvalidator, NoopCacheInvalidator, RecordingCacheInvalidator};
pub use memory::InMemoryDataStore;
#[cfg(feature = "postgres")]
pub use postgres::PgDataStore;

pub type Row = Map<String, Value>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Conjunction of column equality conditions. An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::default().and_eq(column, value)
    }

    pub fn by_id(id: impl Into<Value>) -> Self {
        Self::eq(fields::ID, id)
    }

    pub fn and_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions
            .iter()
            .all(|(column, value)| row.get(column) == Some(value))
    }

    /// The filter as a JSON object, usable as a containment pattern
    pub fn to_json(&self) -> Value {
        Value::Object(self.conditions.iter().cloned().collect())
    }
}

#[async_trait]
pub trait DataStore: Send + Sync {
    async fn select(&self, table: &str, filter: &Filter) -> StoreResult<Vec<Row>>;

    /// Insert a row and return it as stored
    async fn insert(&self, table: &str, row: Row) -> StoreResult<Row>;

    /// Overlay `patch` onto every row matching `filter`
    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> StoreResult<()>;

    async fn delete(&self, table: &str, filter: &Filter) -> StoreResult<()>;
}

/// Row id as a string, whether stored as text or number
pub fn row_id(row: &Row) -> Option<String> {
    value_as_key(row.get(fields::ID)?)
}

/// Render a scalar JSON value as a lookup key
pub fn value_as_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn row_str<'a>(row: &'a Row, key: &str) -> Option<&'a str> {
    row.get(key).and_then(Value::as_str)
}

/// Numeric field, accepting numbers and numeric strings (Postgres `numeric`
/// columns arrive as strings through some drivers)
pub fn row_f64(row: &Row, key: &str) -> Option<f64> {
    match row.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn row_bool(row: &Row, key: &str) -> bool {
    row.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Build a row from a `json!` object literal; non-objects yield an empty row
pub fn row_from_value(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}
