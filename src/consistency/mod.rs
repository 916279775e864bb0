//! # Data Consistency Layer
//!
//! Detect-and-repair checks over the external data store.
//!
//! Rules read full snapshots of the tables they declare and return
//! [`ConsistencyViolation`]s. Rules flagged `auto_repair` hand every violation
//! that carries repair data to the repair handler registered under the rule id.
//!
//! Once [`ConsistencyLayer::initialize`] has run:
//! - data change events re-check every high/critical rule reading the changed
//!   module's tables, emitting `consistency:violation` when something is found
//! - a periodic sweep runs every rule and emits one `consistency:report`
//!
//! [`ConsistencyLayer::destroy`] stops both.

pub mod repair;
pub mod rules;
pub mod types;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::ConsistencyConfig;
use crate::constants::events::{
    CONSISTENCY_REPAIRED, CONSISTENCY_REPORT, CONSISTENCY_VIOLATION, DATA_CHANGE_EVENTS,
};
use crate::error::{ConsistencyError, ConsistencyResult};
use crate::events::{EventBus, EventModule, EventOperation, SubscriptionId, SystemEvent};
use crate::logging::{log_consistency_check, log_error};
use crate::store::{CacheInvalidator, DataStore, Filter, NoopCacheInvalidator};

pub use repair::{product_cache_key, RepairContext, RepairHandler, StockRepairHandler};
pub use rules::builtin_rules;
pub use types::{
    ConsistencyReport, ConsistencyRule, ConsistencyViolation, EntitySnapshot, ReportStatus,
    ReportSummary, RulePriority, ValidationFn, ViolationSeverity,
};

struct LayerState {
    config: ConsistencyConfig,
    repair_context: RepairContext,
    event_bus: EventBus,
    rules: RwLock<Vec<ConsistencyRule>>,
    repair_handlers: RwLock<HashMap<String, Arc<dyn RepairHandler>>>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    initialized: AtomicBool,
}

#[derive(Clone)]
pub struct ConsistencyLayer {
    state: Arc<LayerState>,
}

impl ConsistencyLayer {
    pub fn new(config: ConsistencyConfig, store: Arc<dyn DataStore>, event_bus: EventBus) -> Self {
        Self::with_cache_invalidator(config, store, event_bus, Arc::new(NoopCacheInvalidator))
    }

    pub fn with_cache_invalidator(
        config: ConsistencyConfig,
        store: Arc<dyn DataStore>,
        event_bus: EventBus,
        cache: Arc<dyn CacheInvalidator>,
    ) -> Self {
        Self {
            state: Arc::new(LayerState {
                config,
                repair_context: RepairContext { store, cache },
                event_bus,
                rules: RwLock::new(Vec::new()),
                repair_handlers: RwLock::new(HashMap::new()),
                sweep_task: Mutex::new(None),
                subscriptions: Mutex::new(Vec::new()),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    /// Register the built-in rules and repair handlers, subscribe to data
    /// change events and start the periodic sweep. Calling it again is a no-op.
    pub fn initialize(&self) {
        if self.state.initialized.swap(true, Ordering::SeqCst) {
            debug!("Consistency layer already initialized");
            return;
        }

        for rule in builtin_rules(self.state.config.price_tolerance) {
            self.register_rule(rule);
        }
        self.register_repair_handler(rules::STOCK_CONSISTENCY, StockRepairHandler);

        if self.state.config.reactive_checks {
            let mut subscriptions = self.state.subscriptions.lock();
            for event_type in DATA_CHANGE_EVENTS {
                let layer = Arc::downgrade(&self.state);
                subscriptions.push(self.state.event_bus.subscribe(event_type, move |event| {
                    let layer = Weak::clone(&layer);
                    async move {
                        if let Some(state) = layer.upgrade() {
                            ConsistencyLayer { state }.handle_data_change(&event).await;
                        }
                        Ok(())
                    }
                }));
            }
        }

        *self.state.sweep_task.lock() = Some(self.spawn_sweep());

        info!(
            rules = self.state.rules.read().len(),
            sweep_interval_seconds = self.state.config.sweep_interval_seconds,
            reactive_checks = self.state.config.reactive_checks,
            "✅ Consistency layer initialized"
        );
    }

    /// Stop the periodic sweep and the reactive checks
    pub fn destroy(&self) {
        if let Some(task) = self.state.sweep_task.lock().take() {
            task.abort();
        }
        for subscription in self.state.subscriptions.lock().drain(..) {
            self.state.event_bus.unsubscribe(subscription);
        }
        self.state.initialized.store(false, Ordering::SeqCst);
        info!("Consistency layer destroyed");
    }

    /// Register a rule, replacing any rule with the same id
    pub fn register_rule(&self, rule: ConsistencyRule) {
        let mut rules = self.state.rules.write();
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
    }

    pub fn register_repair_handler<H>(&self, rule_id: &str, handler: H)
    where
        H: RepairHandler + 'static,
    {
        self.state
            .repair_handlers
            .write()
            .insert(rule_id.to_string(), Arc::new(handler));
    }

    /// Registered rules in registration order
    pub fn rules(&self) -> Vec<ConsistencyRule> {
        self.state.rules.read().clone()
    }

    /// Run one rule and, if it is auto-repairable, repair what it found.
    ///
    /// Returns the violations as detected, before any repair.
    #[instrument(skip(self))]
    pub async fn check_rule(&self, rule_id: &str) -> ConsistencyResult<Vec<ConsistencyViolation>> {
        let rule = self
            .state
            .rules
            .read()
            .iter()
            .find(|r| r.id == rule_id)
            .cloned()
            .ok_or_else(|| ConsistencyError::UnknownRule(rule_id.to_string()))?;

        let started = Instant::now();
        let snapshot = self.gather(&rule.entities).await?;
        let violations = rule
            .validate(&snapshot)
            .map_err(|e| ConsistencyError::Validation {
                rule_id: rule.id.clone(),
                reason: e.to_string(),
            })?;

        log_consistency_check(
            &rule.id,
            violations.len(),
            started.elapsed().as_millis() as u64,
            None,
        );

        if rule.auto_repair {
            for violation in violations.iter().filter(|v| v.auto_repair_data.is_some()) {
                self.repair(violation).await;
            }
        }

        Ok(violations)
    }

    /// Run every registered rule and emit the aggregated report.
    ///
    /// A rule that fails is logged and contributes no violations.
    #[instrument(skip(self))]
    pub async fn run_full_consistency_check(&self) -> ConsistencyReport {
        let rules = self.rules();
        let mut violations = Vec::new();
        let mut entities_checked = BTreeSet::new();

        for rule in &rules {
            entities_checked.extend(rule.entities.iter().cloned());
            match self.check_rule(&rule.id).await {
                Ok(found) => violations.extend(found),
                Err(e) => log_error(
                    "consistency",
                    "check_rule",
                    &e.to_string(),
                    Some(rule.id.as_str()),
                ),
            }
        }

        let worst = violations.iter().map(|v| v.severity).max();
        let report = ConsistencyReport {
            id: format!("report_{}", Uuid::new_v4().simple()),
            timestamp: Utc::now(),
            summary: ReportSummary::from_violations(&violations),
            status: ReportStatus::from_worst(worst),
            entities_checked: entities_checked.into_iter().collect(),
            violations,
        };

        info!(
            report_id = %report.id,
            status = %report.status,
            violations = report.summary.total,
            rules = rules.len(),
            "📊 Consistency sweep finished"
        );

        match serde_json::to_value(&report) {
            Ok(data) => {
                self.state
                    .event_bus
                    .emit(
                        SystemEvent::new(
                            CONSISTENCY_REPORT,
                            EventModule::Consistency,
                            EventOperation::Check,
                            report.id.clone(),
                        )
                        .with_data(data),
                    )
                    .await
            }
            Err(e) => error!(error = %e, "Failed to serialize consistency report"),
        }

        report
    }

    async fn gather(&self, entities: &[String]) -> ConsistencyResult<EntitySnapshot> {
        let mut snapshot = EntitySnapshot::new();
        for entity in entities {
            let rows = self
                .state
                .repair_context
                .store
                .select(entity, &Filter::all())
                .await?;
            snapshot.insert(entity, rows);
        }
        Ok(snapshot)
    }

    async fn repair(&self, violation: &ConsistencyViolation) {
        let handler = self
            .state
            .repair_handlers
            .read()
            .get(&violation.rule_id)
            .cloned();
        let Some(handler) = handler else {
            warn!(
                rule_id = %violation.rule_id,
                entity_id = %violation.entity_id,
                "No repair handler registered - skipping auto-repair"
            );
            return;
        };

        match handler.repair(violation, &self.state.repair_context).await {
            Ok(()) => {
                self.state
                    .event_bus
                    .emit(
                        SystemEvent::new(
                            CONSISTENCY_REPAIRED,
                            EventModule::Consistency,
                            EventOperation::Resolve,
                            violation.entity_id.clone(),
                        )
                        .with_data(json!({
                            "ruleId": violation.rule_id,
                            "entity": violation.entity,
                            "entityId": violation.entity_id,
                            "repairData": violation.auto_repair_data,
                        })),
                    )
                    .await;
            }
            Err(e) => log_error(
                "consistency",
                "auto_repair",
                &e.to_string(),
                Some(violation.entity_id.as_str()),
            ),
        }
    }

    async fn handle_data_change(&self, event: &SystemEvent) {
        let module = event.module.as_str();
        let tables = event.module.tables();
        let rule_ids: Vec<String> = self
            .state
            .rules
            .read()
            .iter()
            .filter(|r| r.priority.is_reactive() && r.reads_any(module, tables))
            .map(|r| r.id.clone())
            .collect();

        if rule_ids.is_empty() {
            return;
        }
        debug!(
            event_type = %event.event_type,
            module = module,
            rules = ?rule_ids,
            "Re-checking rules after data change"
        );

        for rule_id in rule_ids {
            match self.check_rule(&rule_id).await {
                Ok(violations) if !violations.is_empty() => {
                    self.state
                        .event_bus
                        .emit(
                            SystemEvent::new(
                                CONSISTENCY_VIOLATION,
                                EventModule::Consistency,
                                EventOperation::Violation,
                                rule_id.clone(),
                            )
                            .with_data(json!({
                                "ruleId": rule_id,
                                "trigger": event.event_type,
                                "violations": violations,
                            })),
                        )
                        .await;
                }
                Ok(_) => {}
                Err(e) => log_error("consistency", "reactive_check", &e.to_string(), Some(rule_id.as_str())),
            }
        }
    }

    fn spawn_sweep(&self) -> JoinHandle<()> {
        let layer = Arc::downgrade(&self.state);
        let period = self.state.config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(state) = layer.upgrade() else {
                    break;
                };
                ConsistencyLayer { state }.run_full_consistency_check().await;
            }
        })
    }
}

impl fmt::Debug for ConsistencyLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsistencyLayer")
            .field("config", &self.state.config)
            .field("rules", &self.state.rules.read().len())
            .field("initialized", &self.state.initialized.load(Ordering::Relaxed))
            .finish()
    }
}
