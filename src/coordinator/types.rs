use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;

use crate::error::ListenerError;
use crate::events::EventModule;

/// Transaction lifecycle: `active -> committed` or `active -> compensating -> aborted`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    #[default]
    Active,
    Committed,
    Aborted,
    Compensating,
}

impl TransactionStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Committed => write!(f, "committed"),
            Self::Aborted => write!(f, "aborted"),
            Self::Compensating => write!(f, "compensating"),
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "committed" => Ok(Self::Committed),
            "aborted" => Ok(Self::Aborted),
            "compensating" => Ok(Self::Compensating),
            _ => Err(format!("Invalid transaction status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Compensated,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Compensated => write!(f, "compensated"),
        }
    }
}

/// One unit of work inside a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStep {
    pub id: String,
    pub operation: String,
    pub module: EventModule,
    pub data: Value,
    /// Whether a compensation action was registered for this step
    pub has_compensation: bool,
    pub status: StepStatus,
    pub timestamp: DateTime<Utc>,
    /// Failure reason recorded by `fail_step`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Read-only snapshot of a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionContext {
    pub id: String,
    pub steps: Vec<TransactionStep>,
    pub status: TransactionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl TransactionContext {
    pub fn step(&self, step_id: &str) -> Option<&TransactionStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn count_steps(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

/// Reversing action for a step.
///
/// Captures whatever state it needs at step creation time; it runs at most once.
pub struct CompensationAction(Box<dyn FnOnce() -> BoxFuture<'static, Result<(), ListenerError>> + Send>);

impl CompensationAction {
    pub fn new<F, Fut>(action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        Self(Box::new(move || action().boxed()))
    }

    pub(crate) fn run(self) -> BoxFuture<'static, Result<(), ListenerError>> {
        (self.0)()
    }
}

impl fmt::Debug for CompensationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompensationAction")
    }
}

/// Transaction counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub active: usize,
    pub compensating: usize,
    pub committed: usize,
    pub aborted: usize,
}

impl CoordinatorStats {
    pub fn total(&self) -> usize {
        self.active + self.compensating + self.committed + self.aborted
    }
}
