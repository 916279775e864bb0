use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::StrategyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    Version,
    Constraint,
    Dependency,
    BusinessRule,
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Version => write!(f, "version"),
            Self::Constraint => write!(f, "constraint"),
            Self::Dependency => write!(f, "dependency"),
            Self::BusinessRule => write!(f, "business_rule"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Divergence between a local and a remote copy of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataConflict {
    pub id: String,
    pub entity: String,
    pub entity_id: String,
    pub conflict_type: ConflictType,
    pub local: Value,
    pub remote: Value,
    pub timestamp: DateTime<Utc>,
    pub severity: ConflictSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_strategy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_data: Option<Value>,
    pub applied_strategy: String,
    pub requires_manual_intervention: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConflictResolutionResult {
    pub fn resolved(strategy: &str, data: Value) -> Self {
        Self {
            success: true,
            resolved_data: Some(data),
            applied_strategy: strategy.to_string(),
            requires_manual_intervention: false,
            error: None,
        }
    }

    pub fn failed(strategy: &str, error: impl fmt::Display) -> Self {
        Self {
            success: false,
            resolved_data: None,
            applied_strategy: strategy.to_string(),
            requires_manual_intervention: false,
            error: Some(error.to_string()),
        }
    }

    pub fn manual(strategy: &str) -> Self {
        Self {
            success: false,
            resolved_data: None,
            applied_strategy: strategy.to_string(),
            requires_manual_intervention: true,
            error: None,
        }
    }
}

/// A pluggable resolution algorithm
pub trait ResolutionStrategy: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Strategies that don't auto-apply wait for a manual resolution
    fn auto_apply(&self) -> bool {
        true
    }

    fn resolve(&self, conflict: &DataConflict) -> Result<Value, StrategyError>;
}
