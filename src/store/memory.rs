use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use super::{DataStore, Filter, Row, StoreResult};
use crate::constants::{fields, tables};
use crate::error::StoreError;

/// In-process store over the known table catalog
#[derive(Debug, Default)]
pub struct InMemoryDataStore {
    tables: RwLock<HashMap<String, Vec<Row>>>,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append rows to a table, bypassing id generation
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Row>) -> StoreResult<()> {
        check_table(table)?;
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
        Ok(())
    }

    /// Snapshot of a table's rows
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }
}

fn check_table(table: &str) -> StoreResult<()> {
    if tables::is_known(table) {
        Ok(())
    } else {
        Err(StoreError::UnknownTable(table.to_string()))
    }
}

#[async_trait]
impl DataStore for InMemoryDataStore {
    async fn select(&self, table: &str, filter: &Filter) -> StoreResult<Vec<Row>> {
        check_table(table)?;
        Ok(self
            .tables
            .read()
            .get(table)
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, table: &str, mut row: Row) -> StoreResult<Row> {
        check_table(table)?;
        if !row.contains_key(fields::ID) {
            row.insert(
                fields::ID.to_string(),
                Value::String(Uuid::new_v4().to_string()),
            );
        }
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> StoreResult<()> {
        check_table(table)?;
        let mut tables = self.tables.write();
        if let Some(rows) = tables.get_mut(table) {
            for row in rows.iter_mut().filter(|r| filter.matches(r)) {
                for (key, value) in &patch {
                    row.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, table: &str, filter: &Filter) -> StoreResult<()> {
        check_table(table)?;
        if let Some(rows) = self.tables.write().get_mut(table) {
            rows.retain(|r| !filter.matches(r));
        }
        Ok(())
    }
}
