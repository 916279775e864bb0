//! Error types for the coordination core.
//!

use crate::config::ConfigurationError;
use thiserror::Error;

/// Error type produced by listeners, compensations and repair handlers.
///
/// These are user-supplied closures, so any error type is accepted and `?`
/// works inside them.
pub type ListenerError = anyhow::Error;

#[derive(Debug, Error)]
pub enum RetailCoreError {
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Consistency error: {0}")]
    Consistency(#[from] ConsistencyError),
    #[error("Conflict error: {0}")]
    Conflict(#[from] ConflictError),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RetailCoreError>;
pub type CoordinatorResult<T> = std::result::Result<T, CoordinatorError>;

/// Contract violations raised by the transaction coordinator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("Transaction {transaction_id} not found")]
    TransactionNotFound { transaction_id: String },

    #[error("Step {step_id} not found in transaction {transaction_id}")]
    StepNotFound {
        transaction_id: String,
        step_id: String,
    },

    #[error("Transaction {transaction_id} is not active (status: {status})")]
    TransactionNotActive {
        transaction_id: String,
        status: String,
    },

    #[error(
        "Transaction {transaction_id} cannot be committed: {pending} pending and {failed} failed steps"
    )]
    UncommittableSteps {
        transaction_id: String,
        pending: usize,
        failed: usize,
    },
}

/// Error returned by `execute_in_transaction`.
///
/// `Action` carries the caller's own error unchanged, after the step has been
/// marked failed and compensation has run.
#[derive(Debug, Error)]
pub enum ExecutionError<E> {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    #[error("Step {step_id} failed: {error}")]
    Action { step_id: String, error: E },
}

impl<E> ExecutionError<E> {
    /// The original action error, if the failure came from the action itself
    pub fn into_action_error(self) -> Option<E> {
        match self {
            Self::Action { error, .. } => Some(error),
            Self::Coordinator(_) => None,
        }
    }

    pub fn is_action_error(&self) -> bool {
        matches!(self, Self::Action { .. })
    }
}

/// Failures talking to the external data store
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("Query failed on {table}: {reason}")]
    Query { table: String, reason: String },
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Serialization(error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConsistencyError {
    #[error("Unknown consistency rule: {0}")]
    UnknownRule(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Rule {rule_id} validation failed: {reason}")]
    Validation { rule_id: String, reason: String },
    #[error("Repair failed for {rule_id} on {entity_id}: {reason}")]
    Repair {
        rule_id: String,
        entity_id: String,
        reason: String,
    },
}

pub type ConsistencyResult<T> = std::result::Result<T, ConsistencyError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConflictError {
    #[error("Resolution strategy not found: {0}")]
    StrategyNotFound(String),
    #[error("Conflict {0} not found")]
    ConflictNotFound(String),
    #[error(transparent)]
    Strategy(#[from] StrategyError),
}

/// Errors raised by a resolution strategy
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StrategyError {
    /// No automatic strategy applies; the conflict needs a human decision
    #[error("Manual resolution required for {entity} {entity_id}")]
    ManualResolutionRequired { entity: String, entity_id: String },
    #[error("Invalid conflict payload: {0}")]
    InvalidPayload(String),
}
