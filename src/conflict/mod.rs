//! # Conflict Resolution
//!
//! Detects divergence between a local and a remote copy of an entity and
//! resolves it through pluggable [`ResolutionStrategy`] implementations.
//!
//! Detected conflicts wait in a pending queue until they are resolved, either
//! automatically or through [`ConflictResolver::resolve_manual_conflict`].
//!
//! Strategy selection:
//!
//! | conflict | strategy |
//! |---|---|
//! | `critical` severity | `user-decision` (manual) |
//! | `business_rule` type | `business-priority` |
//! | `low` severity | `latest-wins` |
//! | anything else | `merge` |

pub mod detection;
pub mod strategies;
pub mod types;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::ConflictConfig;
use crate::constants::events::{
    CONFLICT_DETECTED, CONFLICT_MANUAL_RESOLUTION_REQUIRED, CONFLICT_RESOLVED,
};
use crate::error::{ConflictError, StrategyError};
use crate::events::{EventBus, EventModule, EventOperation, SystemEvent};
use crate::logging::log_conflict_operation;

pub use detection::{
    classify_severity, differing_fields, has_version_conflict, updated_at_millis,
    BusinessRuleCheck,
};
pub use strategies::{
    BusinessPriorityStrategy, LatestWinsStrategy, MergeStrategy, PriorityHandler,
    UserDecisionStrategy, BUSINESS_PRIORITY, LATEST_WINS, MANUAL, MERGE, USER_DECISION,
};
pub use types::{
    ConflictResolutionResult, ConflictSeverity, ConflictType, DataConflict, ResolutionStrategy,
};

struct ResolverState {
    config: ConflictConfig,
    event_bus: EventBus,
    strategies: RwLock<HashMap<String, Arc<dyn ResolutionStrategy>>>,
    business_priority: Arc<BusinessPriorityStrategy>,
    critical_fields: RwLock<HashMap<String, Vec<String>>>,
    business_rules: RwLock<HashMap<String, Vec<BusinessRuleCheck>>>,
    pending: DashMap<String, DataConflict>,
}

#[derive(Clone)]
pub struct ConflictResolver {
    state: Arc<ResolverState>,
}

impl ConflictResolver {
    pub fn new(config: ConflictConfig, event_bus: EventBus) -> Self {
        let business_priority = Arc::new(BusinessPriorityStrategy::new());
        let builtins: [Arc<dyn ResolutionStrategy>; 4] = [
            Arc::new(LatestWinsStrategy),
            Arc::new(MergeStrategy),
            business_priority.clone(),
            Arc::new(UserDecisionStrategy),
        ];
        let strategies: HashMap<String, Arc<dyn ResolutionStrategy>> = builtins
            .into_iter()
            .map(|s| (s.id().to_string(), s))
            .collect();

        Self {
            state: Arc::new(ResolverState {
                config,
                event_bus,
                strategies: RwLock::new(strategies),
                business_priority,
                critical_fields: RwLock::new(detection::default_critical_fields()),
                business_rules: RwLock::new(detection::default_business_rules()),
                pending: DashMap::new(),
            }),
        }
    }

    /// Register a strategy, replacing any strategy with the same id
    pub fn register_strategy<S>(&self, strategy: S)
    where
        S: ResolutionStrategy + 'static,
    {
        self.state
            .strategies
            .write()
            .insert(strategy.id().to_string(), Arc::new(strategy));
    }

    /// Add a business rule check for an entity type
    pub fn register_business_rule<F>(&self, entity: &str, check: F)
    where
        F: Fn(&Value, &Value) -> Option<String> + Send + Sync + 'static,
    {
        self.state
            .business_rules
            .write()
            .entry(entity.to_string())
            .or_default()
            .push(Arc::new(check));
    }

    /// Set the business-priority handler for an entity type
    pub fn register_priority_handler<F>(&self, entity: &str, handler: F)
    where
        F: Fn(&Map<String, Value>, &Map<String, Value>) -> Map<String, Value>
            + Send
            + Sync
            + 'static,
    {
        self.state.business_priority.register(entity, Arc::new(handler));
    }

    /// Replace the fields whose divergence makes a conflict critical
    pub fn register_critical_fields(&self, entity: &str, fields: &[&str]) {
        self.state.critical_fields.write().insert(
            entity.to_string(),
            fields.iter().map(|f| f.to_string()).collect(),
        );
    }

    /// Compare two copies of an entity. A detected conflict is queued as
    /// pending and announced on `conflict:detected`.
    #[instrument(skip(self, local, remote))]
    pub async fn detect_conflict(
        &self,
        entity: &str,
        entity_id: &str,
        local: &Value,
        remote: &Value,
    ) -> Option<DataConflict> {
        let (conflict_type, severity) = self.classify(entity, local, remote)?;

        let conflict = DataConflict {
            id: format!("conflict_{}", Uuid::new_v4().simple()),
            entity: entity.to_string(),
            entity_id: entity_id.to_string(),
            conflict_type,
            local: local.clone(),
            remote: remote.clone(),
            timestamp: Utc::now(),
            severity,
            resolution_strategy: None,
        };
        self.state
            .pending
            .insert(conflict.id.clone(), conflict.clone());

        log_conflict_operation(
            "detect",
            &conflict.id,
            entity,
            entity_id,
            None,
            &format!("{conflict_type}/{severity}"),
        );
        self.emit(
            CONFLICT_DETECTED,
            EventOperation::Notification,
            &conflict,
            json!({ "conflict": conflict }),
        )
        .await;

        Some(conflict)
    }

    fn classify(
        &self,
        entity: &str,
        local: &Value,
        remote: &Value,
    ) -> Option<(ConflictType, ConflictSeverity)> {
        if has_version_conflict(local, remote) {
            let differing = differing_fields(local, remote);
            let critical_fields = self
                .state
                .critical_fields
                .read()
                .get(entity)
                .cloned()
                .unwrap_or_default();
            let severity = classify_severity(&differing, &critical_fields, &self.state.config);
            return Some((ConflictType::Version, severity));
        }

        let rules = self
            .state
            .business_rules
            .read()
            .get(entity)
            .cloned()
            .unwrap_or_default();
        rules.iter().find_map(|check| check(local, remote)).map(|description| {
            debug!(entity = entity, rule = %description, "Business rule conflict");
            (ConflictType::BusinessRule, ConflictSeverity::High)
        })
    }

    /// Strategy id for a conflict
    pub fn select_strategy(conflict: &DataConflict) -> &'static str {
        if conflict.severity == ConflictSeverity::Critical {
            USER_DECISION
        } else if conflict.conflict_type == ConflictType::BusinessRule {
            BUSINESS_PRIORITY
        } else if conflict.severity == ConflictSeverity::Low {
            LATEST_WINS
        } else {
            MERGE
        }
    }

    /// Pick a strategy and resolve now when it auto-applies; otherwise ask
    /// for manual resolution.
    #[instrument(skip(self, conflict), fields(conflict_id = %conflict.id))]
    pub async fn handle_conflict(&self, mut conflict: DataConflict) -> ConflictResolutionResult {
        let strategy_id = Self::select_strategy(&conflict);
        let Some(strategy) = self.strategy(strategy_id) else {
            return ConflictResolutionResult::failed(
                strategy_id,
                ConflictError::StrategyNotFound(strategy_id.to_string()),
            );
        };

        conflict.resolution_strategy = Some(strategy_id.to_string());
        self.state
            .pending
            .insert(conflict.id.clone(), conflict.clone());

        if strategy.auto_apply() {
            return self.resolve_conflict(&conflict).await;
        }

        log_conflict_operation(
            "handle",
            &conflict.id,
            &conflict.entity,
            &conflict.entity_id,
            Some(strategy_id),
            "manual_resolution_required",
        );
        self.emit(
            CONFLICT_MANUAL_RESOLUTION_REQUIRED,
            EventOperation::Notification,
            &conflict,
            json!({ "conflict": conflict, "strategy": strategy_id }),
        )
        .await;

        ConflictResolutionResult::manual(strategy_id)
    }

    /// Run the conflict's strategy (or the selected one). Failures leave the
    /// conflict pending.
    pub async fn resolve_conflict(&self, conflict: &DataConflict) -> ConflictResolutionResult {
        let strategy_id = conflict
            .resolution_strategy
            .clone()
            .unwrap_or_else(|| Self::select_strategy(conflict).to_string());

        match self.resolve_with_strategy(&strategy_id, conflict) {
            Ok(resolved) => {
                self.finish(conflict, &strategy_id, resolved.clone()).await;
                ConflictResolutionResult::resolved(&strategy_id, resolved)
            }
            Err(e) => {
                warn!(
                    conflict_id = %conflict.id,
                    strategy = %strategy_id,
                    error = %e,
                    "Conflict resolution failed - conflict stays pending"
                );
                let manual = matches!(
                    e,
                    ConflictError::Strategy(StrategyError::ManualResolutionRequired { .. })
                );
                ConflictResolutionResult {
                    requires_manual_intervention: manual,
                    ..ConflictResolutionResult::failed(&strategy_id, e)
                }
            }
        }
    }

    /// Apply a strategy without touching the pending queue or emitting events
    pub fn resolve_with_strategy(
        &self,
        strategy_id: &str,
        conflict: &DataConflict,
    ) -> Result<Value, ConflictError> {
        let strategy = self
            .strategy(strategy_id)
            .ok_or_else(|| ConflictError::StrategyNotFound(strategy_id.to_string()))?;
        Ok(strategy.resolve(conflict)?)
    }

    /// Apply an externally supplied resolution to a pending conflict
    pub async fn resolve_manual_conflict(
        &self,
        conflict_id: &str,
        resolution: Value,
    ) -> ConflictResolutionResult {
        let Some(conflict) = self.get_conflict(conflict_id) else {
            return ConflictResolutionResult::failed(
                MANUAL,
                ConflictError::ConflictNotFound(conflict_id.to_string()),
            );
        };

        self.finish(&conflict, MANUAL, resolution.clone()).await;
        ConflictResolutionResult::resolved(MANUAL, resolution)
    }

    /// Pending conflicts, oldest first
    pub fn pending_conflicts(&self) -> Vec<DataConflict> {
        let mut conflicts: Vec<DataConflict> = self
            .state
            .pending
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        conflicts.sort_by_key(|c| c.timestamp);
        conflicts
    }

    pub fn get_conflict(&self, conflict_id: &str) -> Option<DataConflict> {
        self.state
            .pending
            .get(conflict_id)
            .map(|entry| entry.value().clone())
    }

    fn strategy(&self, strategy_id: &str) -> Option<Arc<dyn ResolutionStrategy>> {
        self.state.strategies.read().get(strategy_id).cloned()
    }

    async fn finish(&self, conflict: &DataConflict, strategy_id: &str, resolved: Value) {
        self.state.pending.remove(&conflict.id);
        log_conflict_operation(
            "resolve",
            &conflict.id,
            &conflict.entity,
            &conflict.entity_id,
            Some(strategy_id),
            "resolved",
        );
        self.emit(
            CONFLICT_RESOLVED,
            EventOperation::Resolve,
            conflict,
            json!({
                "conflict": conflict,
                "resolvedData": resolved,
                "strategy": strategy_id,
            }),
        )
        .await;
    }

    async fn emit(
        &self,
        event_type: &str,
        operation: EventOperation,
        conflict: &DataConflict,
        data: Value,
    ) {
        self.state
            .event_bus
            .emit(
                SystemEvent::new(
                    event_type,
                    EventModule::ConflictResolution,
                    operation,
                    conflict.entity_id.clone(),
                )
                .with_data(data),
            )
            .await;
    }
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("config", &self.state.config)
            .field("strategies", &self.state.strategies.read().len())
            .field("pending", &self.state.pending.len())
            .finish()
    }
}
