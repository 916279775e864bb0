//! # Transaction Coordinator
//!
//! Saga-style coordinator for multi-step operations that touch several modules
//! (inventory, sales, clients).
//!
//! ## Overview
//!
//! A caller begins a transaction, then runs each unit of work through
//! [`TransactionCoordinator::execute_in_transaction`] together with an optional
//! [`CompensationAction`]. When a step fails, every previously completed step is
//! compensated in reverse order and the transaction ends `aborted`. When all
//! steps complete the caller commits.
//!
//! - Transactions still `active` after the configured timeout (30 s by default)
//!   are aborted through the same compensation path as a manual abort.
//! - A compensation that fails is logged and skipped; the remaining steps are
//!   still compensated.
//! - Terminal transactions stay queryable for a short grace period, then are
//!   removed. [`TransactionCoordinator::cleanup`] sweeps anything older than the
//!   retention window.
//!
//! ## Late step calls
//!
//! An action can still be running when its transaction is aborted by timeout.
//! Its eventual `complete_step` runs the step's compensation immediately, marks
//! the step `compensated` and returns [`CoordinatorError::TransactionNotActive`].
//! A late `fail_step` only records the failure.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use retail_core::coordinator::{CompensationAction, TransactionCoordinator};
//! use retail_core::events::{EventBus, EventModule};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = TransactionCoordinator::new(EventBus::new());
//! let tx = coordinator.begin_transaction(None);
//!
//! coordinator
//!     .execute_in_transaction(
//!         &tx,
//!         "reserve-stock",
//!         EventModule::Inventory,
//!         || async { Ok::<_, std::io::Error>(()) },
//!         Some(CompensationAction::new(|| async { Ok(()) })),
//!     )
//!     .await?;
//!
//! coordinator.commit_transaction(&tx).await?;
//! # Ok(())
//! # }
//! ```

pub mod types;

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::TransactionConfig;
use crate::constants::events::{
    TRANSACTION_ABORTED, TRANSACTION_COMMITTED, TRANSACTION_COMPENSATED,
};
use crate::error::{CoordinatorError, CoordinatorResult, ExecutionError};
use crate::events::{EventBus, EventMetadata, EventModule, EventOperation, SystemEvent};
use crate::logging::log_transaction_operation;

pub use types::{
    CompensationAction, CoordinatorStats, StepStatus, TransactionContext, TransactionStatus,
    TransactionStep,
};

struct StepRecord {
    step: TransactionStep,
    compensation: Option<CompensationAction>,
}

struct TransactionRecord {
    id: String,
    steps: Vec<StepRecord>,
    status: TransactionStatus,
    start_time: chrono::DateTime<Utc>,
    /// Monotonic start, used for timeouts and retention
    started: Instant,
    metadata: Option<Value>,
    timeout_task: Option<JoinHandle<()>>,
}

impl TransactionRecord {
    fn snapshot(&self) -> TransactionContext {
        TransactionContext {
            id: self.id.clone(),
            steps: self.steps.iter().map(|s| s.step.clone()).collect(),
            status: self.status,
            start_time: self.start_time,
            metadata: self.metadata.clone(),
        }
    }

    fn step_mut(&mut self, step_id: &str) -> CoordinatorResult<&mut StepRecord> {
        let transaction_id = self.id.clone();
        self.steps
            .iter_mut()
            .find(|s| s.step.id == step_id)
            .ok_or_else(|| CoordinatorError::StepNotFound {
                transaction_id,
                step_id: step_id.to_string(),
            })
    }

    fn not_active(&self) -> CoordinatorError {
        CoordinatorError::TransactionNotActive {
            transaction_id: self.id.clone(),
            status: self.status.to_string(),
        }
    }

    fn cancel_timeout(&mut self) {
        if let Some(task) = self.timeout_task.take() {
            task.abort();
        }
    }

    /// Module reported on lifecycle events: the first step's, or inventory
    fn primary_module(&self) -> EventModule {
        self.steps
            .first()
            .map(|s| s.step.module)
            .unwrap_or(EventModule::Inventory)
    }

    fn event_metadata(&self) -> EventMetadata {
        let user_id = self
            .metadata
            .as_ref()
            .and_then(|m| m.get("userId"))
            .and_then(Value::as_str)
            .map(str::to_string);
        EventMetadata {
            timestamp: Utc::now(),
            correlation_id: Some(self.id.clone()),
            user_id,
        }
    }
}

struct CoordinatorState {
    config: TransactionConfig,
    event_bus: EventBus,
    transactions: Mutex<HashMap<String, TransactionRecord>>,
}

/// Saga coordinator. Cloning yields another handle to the same coordinator.
#[derive(Clone)]
pub struct TransactionCoordinator {
    state: Arc<CoordinatorState>,
}

impl TransactionCoordinator {
    pub fn new(event_bus: EventBus) -> Self {
        Self::with_config(event_bus, TransactionConfig::default())
    }

    pub fn with_config(event_bus: EventBus, config: TransactionConfig) -> Self {
        Self {
            state: Arc::new(CoordinatorState {
                config,
                event_bus,
                transactions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start a new `active` transaction and arm its timeout
    pub fn begin_transaction(&self, metadata: Option<Value>) -> String {
        let transaction_id = format!("tx_{}", Uuid::new_v4().simple());
        let timeout = self.state.config.timeout();

        let timeout_task = tokio::spawn(Self::timeout_watchdog(
            Arc::downgrade(&self.state),
            transaction_id.clone(),
            timeout,
        ));

        self.state.transactions.lock().insert(
            transaction_id.clone(),
            TransactionRecord {
                id: transaction_id.clone(),
                steps: Vec::new(),
                status: TransactionStatus::Active,
                start_time: Utc::now(),
                started: Instant::now(),
                metadata,
                timeout_task: Some(timeout_task),
            },
        );

        log_transaction_operation("begin", &transaction_id, None, "active", None);
        transaction_id
    }

    /// Append a `pending` step to an active transaction
    pub fn add_step(
        &self,
        transaction_id: &str,
        operation: &str,
        module: EventModule,
        data: Value,
        compensation: Option<CompensationAction>,
    ) -> CoordinatorResult<String> {
        let mut transactions = self.state.transactions.lock();
        let record = Self::record_mut(&mut transactions, transaction_id)?;
        if record.status != TransactionStatus::Active {
            return Err(record.not_active());
        }

        let step_id = format!("step_{}", Uuid::new_v4().simple());
        record.steps.push(StepRecord {
            step: TransactionStep {
                id: step_id.clone(),
                operation: operation.to_string(),
                module,
                data,
                has_compensation: compensation.is_some(),
                status: StepStatus::Pending,
                timestamp: Utc::now(),
                error: None,
            },
            compensation,
        });

        debug!(
            transaction_id = transaction_id,
            step_id = %step_id,
            operation = operation,
            module = %module,
            "Step added"
        );

        Ok(step_id)
    }

    /// Mark a step `completed`
    pub async fn complete_step(&self, transaction_id: &str, step_id: &str) -> CoordinatorResult<()> {
        let late_compensation = {
            let mut transactions = self.state.transactions.lock();
            let record = Self::record_mut(&mut transactions, transaction_id)?;
            let active = record.status == TransactionStatus::Active;
            let step = record.step_mut(step_id)?;
            step.step.status = StepStatus::Completed;
            if active {
                return Ok(());
            }
            step.compensation.take()
        };

        warn!(
            transaction_id = transaction_id,
            step_id = step_id,
            "Step completed after its transaction stopped being active - compensating it"
        );

        if let Some(action) = late_compensation {
            if self.run_compensation(transaction_id, step_id, action).await {
                self.set_step_status(transaction_id, step_id, StepStatus::Compensated);
            }
        }

        Err(self
            .with_record(transaction_id, |record| record.not_active())
            .unwrap_or(CoordinatorError::TransactionNotFound {
                transaction_id: transaction_id.to_string(),
            }))
    }

    /// Mark a step `failed` and compensate the transaction
    pub async fn fail_step(
        &self,
        transaction_id: &str,
        step_id: &str,
        error: &str,
    ) -> CoordinatorResult<()> {
        let should_compensate = {
            let mut transactions = self.state.transactions.lock();
            let record = Self::record_mut(&mut transactions, transaction_id)?;
            let active = record.status == TransactionStatus::Active;
            let step = record.step_mut(step_id)?;
            step.step.status = StepStatus::Failed;
            step.step.error = Some(error.to_string());
            if active {
                record.status = TransactionStatus::Compensating;
            }
            active
        };

        log_transaction_operation("fail_step", transaction_id, Some(step_id), "failed", Some(error));

        if should_compensate {
            self.compensate_transaction(transaction_id).await?;
        } else {
            warn!(
                transaction_id = transaction_id,
                step_id = step_id,
                error = error,
                "Step failed after its transaction stopped being active - ignored"
            );
        }

        Ok(())
    }

    /// Add a step, run `action`, and complete or fail the step with its outcome.
    ///
    /// On failure the transaction is compensated before the action's own error
    /// is returned in [`ExecutionError::Action`].
    #[instrument(skip(self, action, compensation), fields(transaction_id = %transaction_id))]
    pub async fn execute_in_transaction<T, E, F, Fut>(
        &self,
        transaction_id: &str,
        operation: &str,
        module: EventModule,
        action: F,
        compensation: Option<CompensationAction>,
    ) -> Result<T, ExecutionError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let step_id = self.add_step(transaction_id, operation, module, Value::Null, compensation)?;

        match action().await {
            Ok(value) => {
                self.complete_step(transaction_id, &step_id).await?;
                Ok(value)
            }
            Err(error) => {
                self.fail_step(transaction_id, &step_id, &error.to_string())
                    .await?;
                Err(ExecutionError::Action { step_id, error })
            }
        }
    }

    /// Commit a transaction whose steps are all `completed`
    pub async fn commit_transaction(&self, transaction_id: &str) -> CoordinatorResult<()> {
        let event = {
            let mut transactions = self.state.transactions.lock();
            let record = Self::record_mut(&mut transactions, transaction_id)?;
            if record.status != TransactionStatus::Active {
                return Err(record.not_active());
            }

            let pending = count_steps(record, StepStatus::Pending);
            let failed = count_steps(record, StepStatus::Failed);
            if pending > 0 || failed > 0 {
                return Err(CoordinatorError::UncommittableSteps {
                    transaction_id: transaction_id.to_string(),
                    pending,
                    failed,
                });
            }

            record.status = TransactionStatus::Committed;
            record.cancel_timeout();

            SystemEvent::new(
                TRANSACTION_COMMITTED,
                record.primary_module(),
                EventOperation::Update,
                transaction_id,
            )
            .with_data(json!({
                "transactionId": transaction_id,
                "steps": record.steps.len(),
                "durationMs": record.started.elapsed().as_millis() as u64,
                "metadata": record.metadata,
            }))
            .with_metadata(record.event_metadata())
        };

        log_transaction_operation("commit", transaction_id, None, "committed", None);
        self.state.event_bus.emit(event).await;
        self.schedule_removal(transaction_id, self.state.config.commit_grace());

        Ok(())
    }

    /// Abort and compensate a transaction.
    ///
    /// Unknown (already cleaned up) and already aborting transactions are a
    /// no-op. Committed transactions cannot be aborted.
    pub async fn abort_transaction(
        &self,
        transaction_id: &str,
        reason: Option<&str>,
    ) -> CoordinatorResult<()> {
        let event = {
            let mut transactions = self.state.transactions.lock();
            let Some(record) = transactions.get_mut(transaction_id) else {
                debug!(
                    transaction_id = transaction_id,
                    "Abort requested for unknown transaction - already cleaned up"
                );
                return Ok(());
            };

            match record.status {
                TransactionStatus::Aborted | TransactionStatus::Compensating => return Ok(()),
                TransactionStatus::Committed => return Err(record.not_active()),
                TransactionStatus::Active => {}
            }

            record.status = TransactionStatus::Compensating;
            record.cancel_timeout();

            SystemEvent::new(
                TRANSACTION_ABORTED,
                record.primary_module(),
                EventOperation::Notification,
                transaction_id,
            )
            .with_data(json!({
                "transactionId": transaction_id,
                "reason": reason,
            }))
            .with_metadata(record.event_metadata())
        };

        log_transaction_operation("abort", transaction_id, None, "compensating", reason);
        self.state.event_bus.emit(event).await;
        self.compensate_transaction(transaction_id).await
    }

    /// Run compensation for every `completed` step in reverse order, then mark
    /// the transaction `aborted`.
    ///
    /// Only `active` and `compensating` transactions can be compensated;
    /// committed and aborted ones are final.
    pub async fn compensate_transaction(&self, transaction_id: &str) -> CoordinatorResult<()> {
        let pending_compensations: Vec<(String, Option<CompensationAction>)> = {
            let mut transactions = self.state.transactions.lock();
            let record = Self::record_mut(&mut transactions, transaction_id)?;
            if record.status.is_terminal() {
                return Err(record.not_active());
            }
            record.status = TransactionStatus::Compensating;
            record
                .steps
                .iter_mut()
                .rev()
                .filter(|s| s.step.status == StepStatus::Completed)
                .map(|s| (s.step.id.clone(), s.compensation.take()))
                .collect()
        };

        info!(
            transaction_id = transaction_id,
            steps = pending_compensations.len(),
            "🔄 Compensating transaction"
        );

        let mut compensated = 0usize;
        let mut failed = 0usize;
        for (step_id, action) in pending_compensations {
            let Some(action) = action else {
                debug!(
                    transaction_id = transaction_id,
                    step_id = %step_id,
                    "Completed step has no compensation action"
                );
                continue;
            };

            if self.run_compensation(transaction_id, &step_id, action).await {
                self.set_step_status(transaction_id, &step_id, StepStatus::Compensated);
                compensated += 1;
            } else {
                failed += 1;
            }
        }

        let event = {
            let mut transactions = self.state.transactions.lock();
            let record = Self::record_mut(&mut transactions, transaction_id)?;
            record.status = TransactionStatus::Aborted;
            record.cancel_timeout();

            SystemEvent::new(
                TRANSACTION_COMPENSATED,
                record.primary_module(),
                EventOperation::Notification,
                transaction_id,
            )
            .with_data(json!({
                "transactionId": transaction_id,
                "compensatedSteps": compensated,
                "failedCompensations": failed,
            }))
            .with_metadata(record.event_metadata())
        };

        log_transaction_operation(
            "compensate",
            transaction_id,
            None,
            "aborted",
            Some(format!("{compensated} compensated, {failed} failed").as_str()),
        );
        self.state.event_bus.emit(event).await;
        self.schedule_removal(transaction_id, self.state.config.compensation_cleanup());

        Ok(())
    }

    pub fn get_transaction_status(&self, transaction_id: &str) -> Option<TransactionContext> {
        self.with_record(transaction_id, TransactionRecord::snapshot)
    }

    /// Every tracked transaction, oldest first
    pub fn get_active_transactions(&self) -> Vec<TransactionContext> {
        let mut contexts: Vec<TransactionContext> = self
            .state
            .transactions
            .lock()
            .values()
            .map(TransactionRecord::snapshot)
            .collect();
        contexts.sort_by_key(|c| c.start_time);
        contexts
    }

    /// Remove committed/aborted transactions older than the retention window.
    /// Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let retention = self.state.config.retention();
        let mut transactions = self.state.transactions.lock();
        let before = transactions.len();
        transactions.retain(|_, record| {
            !(record.status.is_terminal() && record.started.elapsed() > retention)
        });
        let removed = before - transactions.len();
        if removed > 0 {
            debug!(removed = removed, "Cleaned up finished transactions");
        }
        removed
    }

    pub fn stats(&self) -> CoordinatorStats {
        let transactions = self.state.transactions.lock();
        let mut stats = CoordinatorStats::default();
        for record in transactions.values() {
            match record.status {
                TransactionStatus::Active => stats.active += 1,
                TransactionStatus::Compensating => stats.compensating += 1,
                TransactionStatus::Committed => stats.committed += 1,
                TransactionStatus::Aborted => stats.aborted += 1,
            }
        }
        stats
    }

    /// Call `cleanup` every `interval` until the coordinator is dropped
    pub fn spawn_cleanup_loop(&self, interval: Duration) -> JoinHandle<()> {
        let state = Arc::downgrade(&self.state);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(state) = state.upgrade() else {
                    break;
                };
                TransactionCoordinator { state }.cleanup();
            }
        })
    }

    async fn timeout_watchdog(
        state: Weak<CoordinatorState>,
        transaction_id: String,
        timeout: Duration,
    ) {
        sleep(timeout).await;
        let Some(state) = state.upgrade() else {
            return;
        };

        let still_active = {
            let mut transactions = state.transactions.lock();
            match transactions.get_mut(&transaction_id) {
                Some(record) if record.status == TransactionStatus::Active => {
                    // Detach this task's own handle so the abort path can't cancel it
                    record.timeout_task.take();
                    true
                }
                _ => false,
            }
        };

        if still_active {
            warn!(
                transaction_id = %transaction_id,
                timeout_seconds = timeout.as_secs(),
                "⏰ Transaction timed out - aborting"
            );
            let coordinator = TransactionCoordinator { state };
            if let Err(e) = coordinator
                .abort_transaction(&transaction_id, Some("timeout"))
                .await
            {
                error!(transaction_id = %transaction_id, error = %e, "Timeout abort failed");
            }
        }
    }

    /// Returns true when the compensation succeeded
    async fn run_compensation(
        &self,
        transaction_id: &str,
        step_id: &str,
        action: CompensationAction,
    ) -> bool {
        match AssertUnwindSafe(action.run()).catch_unwind().await {
            Ok(Ok(())) => {
                debug!(
                    transaction_id = transaction_id,
                    step_id = step_id,
                    "Step compensated"
                );
                true
            }
            Ok(Err(e)) => {
                error!(
                    transaction_id = transaction_id,
                    step_id = step_id,
                    error = %e,
                    "Compensation failed - continuing with remaining steps"
                );
                false
            }
            Err(_) => {
                error!(
                    transaction_id = transaction_id,
                    step_id = step_id,
                    "Compensation panicked - continuing with remaining steps"
                );
                false
            }
        }
    }

    fn set_step_status(&self, transaction_id: &str, step_id: &str, status: StepStatus) {
        let mut transactions = self.state.transactions.lock();
        if let Some(step) = transactions
            .get_mut(transaction_id)
            .and_then(|record| record.step_mut(step_id).ok())
        {
            step.step.status = status;
        }
    }

    fn schedule_removal(&self, transaction_id: &str, delay: Duration) {
        let state = Arc::downgrade(&self.state);
        let transaction_id = transaction_id.to_string();
        tokio::spawn(async move {
            sleep(delay).await;
            if let Some(state) = state.upgrade() {
                let mut transactions = state.transactions.lock();
                if transactions
                    .get(&transaction_id)
                    .is_some_and(|record| record.status.is_terminal())
                {
                    transactions.remove(&transaction_id);
                    debug!(transaction_id = %transaction_id, "Transaction removed");
                }
            }
        });
    }

    fn with_record<R>(
        &self,
        transaction_id: &str,
        f: impl FnOnce(&TransactionRecord) -> R,
    ) -> Option<R> {
        self.state.transactions.lock().get(transaction_id).map(f)
    }

    fn record_mut<'a>(
        transactions: &'a mut HashMap<String, TransactionRecord>,
        transaction_id: &str,
    ) -> CoordinatorResult<&'a mut TransactionRecord> {
        transactions
            .get_mut(transaction_id)
            .ok_or_else(|| CoordinatorError::TransactionNotFound {
                transaction_id: transaction_id.to_string(),
            })
    }
}

fn count_steps(record: &TransactionRecord, status: StepStatus) -> usize {
    record
        .steps
        .iter()
        .filter(|s| s.step.status == status)
        .count()
}

impl fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("config", &self.state.config)
            .field("stats", &self.stats())
            .finish()
    }
}
