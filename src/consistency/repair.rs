//! Auto-repair handlers, registered per rule id.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::types::ConsistencyViolation;
use crate::constants::tables;
use crate::error::{ConsistencyError, ConsistencyResult};
use crate::store::{value_as_key, CacheInvalidator, DataStore, Filter, row_from_value};

/// Collaborators a repair handler may write through
#[derive(Clone)]
pub struct RepairContext {
    pub store: Arc<dyn DataStore>,
    pub cache: Arc<dyn CacheInvalidator>,
}

/// Applies the `auto_repair_data` of a violation
#[async_trait]
pub trait RepairHandler: Send + Sync {
    async fn repair(
        &self,
        violation: &ConsistencyViolation,
        context: &RepairContext,
    ) -> ConsistencyResult<()>;
}

/// Cache key for a product's cached queries
pub fn product_cache_key(product_id: &str) -> String {
    format!("product:{product_id}")
}

/// Overwrites a product's stock with the available unit count
#[derive(Debug, Default, Clone, Copy)]
pub struct StockRepairHandler;

#[async_trait]
impl RepairHandler for StockRepairHandler {
    async fn repair(
        &self,
        violation: &ConsistencyViolation,
        context: &RepairContext,
    ) -> ConsistencyResult<()> {
        let repair_error = |reason: &str| ConsistencyError::Repair {
            rule_id: violation.rule_id.clone(),
            entity_id: violation.entity_id.clone(),
            reason: reason.to_string(),
        };

        let data = violation
            .auto_repair_data
            .as_ref()
            .ok_or_else(|| repair_error("missing repair data"))?;
        let product_id = data
            .get("productId")
            .and_then(value_as_key)
            .unwrap_or_else(|| violation.entity_id.clone());
        let correct_stock = data
            .get("correctStock")
            .and_then(Value::as_i64)
            .ok_or_else(|| repair_error("correctStock is not an integer"))?;

        context
            .store
            .update(
                tables::PRODUCTS,
                &Filter::by_id(product_id.clone()),
                row_from_value(json!({ "stock": correct_stock })),
            )
            .await?;
        context.cache.invalidate(&product_cache_key(&product_id));

        info!(
            product_id = %product_id,
            stock = correct_stock,
            "🔧 Product stock repaired"
        );
        Ok(())
    }
}
