//! Built-in resolution strategies.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::detection::updated_at_millis;
use super::types::{DataConflict, ResolutionStrategy};
use crate::constants::{fields, tables};
use crate::error::StrategyError;

pub const LATEST_WINS: &str = "latest-wins";
pub const MERGE: &str = "merge";
pub const BUSINESS_PRIORITY: &str = "business-priority";
pub const USER_DECISION: &str = "user-decision";
/// Strategy reported for externally supplied resolutions
pub const MANUAL: &str = "manual";

/// Builds the resolved copy of one entity type from (local, remote)
pub type PriorityHandler =
    Arc<dyn Fn(&Map<String, Value>, &Map<String, Value>) -> Map<String, Value> + Send + Sync>;

fn objects(conflict: &DataConflict) -> Result<(&Map<String, Value>, &Map<String, Value>), StrategyError> {
    match (conflict.local.as_object(), conflict.remote.as_object()) {
        (Some(local), Some(remote)) => Ok((local, remote)),
        _ => Err(StrategyError::InvalidPayload(format!(
            "{} {} copies must be JSON objects",
            conflict.entity, conflict.entity_id
        ))),
    }
}

/// The copy with the greater `updated_at`; remote on a tie
#[derive(Debug, Default, Clone, Copy)]
pub struct LatestWinsStrategy;

impl LatestWinsStrategy {
    fn pick(conflict: &DataConflict) -> Value {
        if updated_at_millis(&conflict.local) > updated_at_millis(&conflict.remote) {
            conflict.local.clone()
        } else {
            conflict.remote.clone()
        }
    }
}

impl ResolutionStrategy for LatestWinsStrategy {
    fn id(&self) -> &str {
        LATEST_WINS
    }

    fn name(&self) -> &str {
        "Latest wins"
    }

    fn description(&self) -> &str {
        "Keeps whichever copy was updated most recently"
    }

    fn resolve(&self, conflict: &DataConflict) -> Result<Value, StrategyError> {
        Ok(Self::pick(conflict))
    }
}

/// Remote copy overlaid with local fields that are missing remotely, or all
/// local fields when the local copy is strictly newer
#[derive(Debug, Default, Clone, Copy)]
pub struct MergeStrategy;

impl ResolutionStrategy for MergeStrategy {
    fn id(&self) -> &str {
        MERGE
    }

    fn name(&self) -> &str {
        "Field merge"
    }

    fn description(&self) -> &str {
        "Merges both copies field by field, preferring the more recent side"
    }

    fn resolve(&self, conflict: &DataConflict) -> Result<Value, StrategyError> {
        let (local, remote) = objects(conflict)?;
        let local_newer = updated_at_millis(&conflict.local) > updated_at_millis(&conflict.remote);

        let mut merged = remote.clone();
        for (key, value) in local {
            if key == fields::CREATED_AT || key == fields::UPDATED_AT {
                continue;
            }
            if local_newer || !remote.contains_key(key) {
                merged.insert(key.clone(), value.clone());
            }
        }
        Ok(Value::Object(merged))
    }
}

/// Domain rules per entity type; entities without a handler fall back to
/// latest-wins
pub struct BusinessPriorityStrategy {
    handlers: RwLock<HashMap<String, PriorityHandler>>,
}

impl BusinessPriorityStrategy {
    pub fn new() -> Self {
        let strategy = Self {
            handlers: RwLock::new(HashMap::new()),
        };
        strategy.register(tables::PRODUCTS, Arc::new(product_priority));
        strategy.register(tables::SALES, Arc::new(sale_priority));
        strategy
    }

    pub fn register(&self, entity: &str, handler: PriorityHandler) {
        self.handlers.write().insert(entity.to_string(), handler);
    }
}

impl Default for BusinessPriorityStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolutionStrategy for BusinessPriorityStrategy {
    fn id(&self) -> &str {
        BUSINESS_PRIORITY
    }

    fn name(&self) -> &str {
        "Business priority"
    }

    fn description(&self) -> &str {
        "Applies entity-specific business rules"
    }

    fn resolve(&self, conflict: &DataConflict) -> Result<Value, StrategyError> {
        let handler = self.handlers.read().get(&conflict.entity).cloned();
        match handler {
            Some(handler) => {
                let (local, remote) = objects(conflict)?;
                Ok(Value::Object(handler(local, remote)))
            }
            None => Ok(LatestWinsStrategy::pick(conflict)),
        }
    }
}

fn positive(copy: &Map<String, Value>, key: &str) -> Option<f64> {
    copy.get(key).and_then(Value::as_f64).filter(|v| *v > 0.0)
}

/// Local base; remote stock when non-negative; the higher of two positive prices
fn product_priority(local: &Map<String, Value>, remote: &Map<String, Value>) -> Map<String, Value> {
    let mut resolved = local.clone();
    if let Some(stock) = remote.get("stock").filter(|s| s.as_f64().is_some_and(|v| v >= 0.0)) {
        resolved.insert("stock".to_string(), stock.clone());
    }
    if let (Some(local_price), Some(remote_price)) = (positive(local, "price"), positive(remote, "price")) {
        let higher = if remote_price > local_price {
            &remote["price"]
        } else {
            &local["price"]
        };
        resolved.insert("price".to_string(), higher.clone());
    }
    resolved
}

/// Local base; a remotely completed sale stays completed unless cancelled locally
fn sale_priority(local: &Map<String, Value>, remote: &Map<String, Value>) -> Map<String, Value> {
    let mut resolved = local.clone();
    let remote_completed = remote.get("status").and_then(Value::as_str) == Some("completed");
    let local_cancelled = local.get("status").and_then(Value::as_str) == Some("cancelled");
    if remote_completed && !local_cancelled {
        resolved.insert("status".to_string(), Value::String("completed".to_string()));
    }
    resolved
}

/// Never resolves automatically
#[derive(Debug, Default, Clone, Copy)]
pub struct UserDecisionStrategy;

impl ResolutionStrategy for UserDecisionStrategy {
    fn id(&self) -> &str {
        USER_DECISION
    }

    fn name(&self) -> &str {
        "User decision"
    }

    fn description(&self) -> &str {
        "Waits for a person to choose the resolved data"
    }

    fn auto_apply(&self) -> bool {
        false
    }

    fn resolve(&self, conflict: &DataConflict) -> Result<Value, StrategyError> {
        Err(StrategyError::ManualResolutionRequired {
            entity: conflict.entity.clone(),
            entity_id: conflict.entity_id.clone(),
        })
    }
}
