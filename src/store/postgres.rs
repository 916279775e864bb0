//! PostgreSQL-backed [`DataStore`].
//!
//! Rows travel as JSONB: reads use `to_jsonb(t)`, filters become JSONB
//! containment (`@>`), and inserts/updates go through
//! `jsonb_populate_record` so column types come from the table definition.
//! Table names are checked against the catalog and column names against a
//! strict identifier pattern before they are spliced into SQL.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::debug;

use super::{DataStore, Filter, Row, StoreResult};
use crate::constants::tables;
use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct PgDataStore {
    pool: PgPool,
}

impl PgDataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Query {
                table: "<connect>".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn checked_table(table: &str) -> StoreResult<&str> {
    if tables::is_known(table) {
        Ok(table)
    } else {
        Err(StoreError::UnknownTable(table.to_string()))
    }
}

fn checked_columns(row: &Row) -> StoreResult<Vec<&str>> {
    row.keys()
        .map(|column| {
            let valid = column
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
                && column
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
            if valid {
                Ok(column.as_str())
            } else {
                Err(StoreError::InvalidIdentifier(column.clone()))
            }
        })
        .collect()
}

fn select_sql(table: &str) -> String {
    format!("SELECT to_jsonb(t) FROM {table} AS t WHERE to_jsonb(t) @> $1::jsonb")
}

fn insert_sql(table: &str, columns: &[&str]) -> String {
    let columns = columns.join(", ");
    format!(
        "INSERT INTO {table} ({columns}) \
         SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $1::jsonb) \
         RETURNING to_jsonb({table}.*)"
    )
}

fn update_sql(table: &str, columns: &[&str]) -> String {
    let assignments = columns
        .iter()
        .map(|c| format!("{c} = p.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {table} AS t SET {assignments} \
         FROM jsonb_populate_record(NULL::{table}, $1::jsonb) AS p \
         WHERE to_jsonb(t) @> $2::jsonb"
    )
}

fn delete_sql(table: &str) -> String {
    format!("DELETE FROM {table} AS t WHERE to_jsonb(t) @> $1::jsonb")
}

fn query_error(table: &str) -> impl Fn(sqlx::Error) -> StoreError + '_ {
    move |e| StoreError::Query {
        table: table.to_string(),
        reason: e.to_string(),
    }
}

fn into_row(value: Value) -> StoreResult<Row> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Serialization(format!(
            "expected a JSON object row, got {other}"
        ))),
    }
}

#[async_trait]
impl DataStore for PgDataStore {
    async fn select(&self, table: &str, filter: &Filter) -> StoreResult<Vec<Row>> {
        let table = checked_table(table)?;
        let rows: Vec<Value> = sqlx::query_scalar(&select_sql(table))
            .bind(filter.to_json())
            .fetch_all(&self.pool)
            .await
            .map_err(query_error(table))?;
        debug!(table = table, rows = rows.len(), "Selected rows");
        rows.into_iter().map(into_row).collect()
    }

    async fn insert(&self, table: &str, row: Row) -> StoreResult<Row> {
        let table = checked_table(table)?;
        let columns = checked_columns(&row)?;
        if columns.is_empty() {
            return Err(StoreError::Query {
                table: table.to_string(),
                reason: "cannot insert an empty row".to_string(),
            });
        }
        let sql = insert_sql(table, &columns);
        let inserted: Value = sqlx::query_scalar(&sql)
            .bind(Value::Object(row.clone()))
            .fetch_one(&self.pool)
            .await
            .map_err(query_error(table))?;
        into_row(inserted)
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> StoreResult<()> {
        let table = checked_table(table)?;
        let columns = checked_columns(&patch)?;
        if columns.is_empty() {
            return Ok(());
        }
        let sql = update_sql(table, &columns);
        let result = sqlx::query(&sql)
            .bind(Value::Object(patch.clone()))
            .bind(filter.to_json())
            .execute(&self.pool)
            .await
            .map_err(query_error(table))?;
        debug!(table = table, rows_affected = result.rows_affected(), "Updated rows");
        Ok(())
    }

    async fn delete(&self, table: &str, filter: &Filter) -> StoreResult<()> {
        let table = checked_table(table)?;
        sqlx::query(&delete_sql(table))
            .bind(filter.to_json())
            .execute(&self.pool)
            .await
            .map_err(query_error(table))?;
        Ok(())
    }
}
