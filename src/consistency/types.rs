use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::ListenerError;
use crate::store::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulePriority {
    Low,
    Medium,
    High,
    Critical,
}

impl RulePriority {
    /// High and critical rules are re-checked whenever their data changes
    pub fn is_reactive(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl fmt::Display for RulePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Ordered so that `max()` yields the worst severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Warning,
    Error,
    Critical,
}

impl fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    #[default]
    Healthy,
    Warnings,
    Errors,
    Critical,
}

impl ReportStatus {
    /// Status for a pass, derived from its worst violation
    pub fn from_worst(worst: Option<ViolationSeverity>) -> Self {
        match worst {
            None => Self::Healthy,
            Some(ViolationSeverity::Warning) => Self::Warnings,
            Some(ViolationSeverity::Error) => Self::Errors,
            Some(ViolationSeverity::Critical) => Self::Critical,
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Warnings => write!(f, "warnings"),
            Self::Errors => write!(f, "errors"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyViolation {
    pub rule_id: String,
    pub entity: String,
    pub entity_id: String,
    pub severity: ViolationSeverity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
    /// Payload consumed by the rule's repair handler
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_repair_data: Option<Value>,
}

impl ConsistencyViolation {
    pub fn new(
        rule_id: &str,
        entity: &str,
        entity_id: impl Into<String>,
        severity: ViolationSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            entity: entity.to_string(),
            entity_id: entity_id.into(),
            severity,
            message: message.into(),
            suggested_fix: None,
            auto_repair_data: None,
        }
    }

    pub fn with_suggested_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }

    pub fn with_repair_data(mut self, data: Value) -> Self {
        self.auto_repair_data = Some(data);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total: usize,
    pub critical: usize,
    pub errors: usize,
    pub warnings: usize,
    /// Violation count per rule id
    pub by_rule: BTreeMap<String, usize>,
}

impl ReportSummary {
    pub fn from_violations(violations: &[ConsistencyViolation]) -> Self {
        let mut summary = Self {
            total: violations.len(),
            ..Self::default()
        };
        for violation in violations {
            match violation.severity {
                ViolationSeverity::Critical => summary.critical += 1,
                ViolationSeverity::Error => summary.errors += 1,
                ViolationSeverity::Warning => summary.warnings += 1,
            }
            *summary.by_rule.entry(violation.rule_id.clone()).or_default() += 1;
        }
        summary
    }
}

/// Aggregate of one full validation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub violations: Vec<ConsistencyViolation>,
    pub entities_checked: Vec<String>,
    pub status: ReportStatus,
    pub summary: ReportSummary,
}

/// Full copies of the tables a rule reads
#[derive(Debug, Clone, Default)]
pub struct EntitySnapshot {
    tables: HashMap<String, Vec<Row>>,
}

impl EntitySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: &str, rows: Vec<Row>) -> Self {
        self.insert(table, rows);
        self
    }

    pub fn insert(&mut self, table: &str, rows: Vec<Row>) {
        self.tables.insert(table.to_string(), rows);
    }

    /// Rows of `table`; empty when the table was not gathered
    pub fn rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }
}

pub type ValidationFn =
    Arc<dyn Fn(&EntitySnapshot) -> Result<Vec<ConsistencyViolation>, ListenerError> + Send + Sync>;

/// A named check over one or more tables
#[derive(Clone)]
pub struct ConsistencyRule {
    pub id: String,
    pub name: String,
    /// Tables gathered into the snapshot before validation
    pub entities: Vec<String>,
    pub auto_repair: bool,
    pub priority: RulePriority,
    validate: ValidationFn,
}

impl ConsistencyRule {
    pub fn new<F>(id: &str, name: &str, entities: &[&str], priority: RulePriority, validate: F) -> Self
    where
        F: Fn(&EntitySnapshot) -> Result<Vec<ConsistencyViolation>, ListenerError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            entities: entities.iter().map(|e| e.to_string()).collect(),
            auto_repair: false,
            priority,
            validate: Arc::new(validate),
        }
    }

    pub fn with_auto_repair(mut self) -> Self {
        self.auto_repair = true;
        self
    }

    pub fn validate(&self, snapshot: &EntitySnapshot) -> Result<Vec<ConsistencyViolation>, ListenerError> {
        (self.validate)(snapshot)
    }

    /// Whether a change in one of `tables` (or in a module named `module`)
    /// touches this rule
    pub fn reads_any(&self, module: &str, tables: &[&str]) -> bool {
        self.entities
            .iter()
            .any(|entity| entity == module || tables.contains(&entity.as_str()))
    }
}

impl fmt::Debug for ConsistencyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsistencyRule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("entities", &self.entities)
            .field("auto_repair", &self.auto_repair)
            .field("priority", &self.priority)
            .finish()
    }
}
