//! # Coordination Configuration
//!
//! Typed configuration for the coordination core. Every timer and threshold the
//! components use lives here so deployments and tests can tune them without
//! touching code.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use retail_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let timeout = manager.config().transactions.timeout();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring config/retail-core.toml
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub event_bus: EventBusConfig,
    pub transactions: TransactionConfig,
    pub consistency: ConsistencyConfig,
    pub conflicts: ConflictConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Priority assigned when `subscribe` is called without one
    pub default_priority: i32,
    /// Log a warning when a queued subscription runs longer than this.
    /// The subscription is still awaited to completion. Unset disables it.
    pub slow_subscription_warn_ms: Option<u64>,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            default_priority: 100,
            slow_subscription_warn_ms: None,
        }
    }
}

impl EventBusConfig {
    pub fn slow_subscription_warning(&self) -> Option<Duration> {
        self.slow_subscription_warn_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Active transactions older than this are force-aborted
    pub timeout_seconds: u64,
    /// Committed transactions stay queryable this long
    pub commit_grace_seconds: u64,
    /// Compensated transactions stay queryable this long
    pub compensation_cleanup_seconds: u64,
    /// `cleanup()` removes terminal transactions older than this
    pub retention_seconds: u64,
    /// Interval of the owner-driven cleanup loop
    pub cleanup_interval_seconds: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            commit_grace_seconds: 5,
            compensation_cleanup_seconds: 1,
            retention_seconds: 60,
            cleanup_interval_seconds: 60,
        }
    }
}

impl TransactionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn commit_grace(&self) -> Duration {
        Duration::from_secs(self.commit_grace_seconds)
    }

    pub fn compensation_cleanup(&self) -> Duration {
        Duration::from_secs(self.compensation_cleanup_seconds)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsistencyConfig {
    pub sweep_interval_seconds: u64,
    /// Re-check high/critical rules when data change events arrive
    pub reactive_checks: bool,
    /// Allowed difference between line item totals and the sale total
    pub price_tolerance: f64,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 300,
            reactive_checks: true,
            price_tolerance: 0.01,
        }
    }
}

impl ConsistencyConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConflictConfig {
    /// More differing fields than this makes a version conflict `high`
    pub high_field_threshold: usize,
    /// More differing fields than this makes a version conflict `medium`
    pub medium_field_threshold: usize,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            high_field_threshold: 5,
            medium_field_threshold: 2,
        }
    }
}

impl CoordinationConfig {
    /// Reject configurations that would make timers fire immediately or
    /// severity thresholds overlap
    pub fn validate(&self) -> ConfigResult<()> {
        let durations = [
            ("transactions.timeout_seconds", self.transactions.timeout_seconds),
            (
                "transactions.commit_grace_seconds",
                self.transactions.commit_grace_seconds,
            ),
            (
                "transactions.compensation_cleanup_seconds",
                self.transactions.compensation_cleanup_seconds,
            ),
            (
                "transactions.retention_seconds",
                self.transactions.retention_seconds,
            ),
            (
                "transactions.cleanup_interval_seconds",
                self.transactions.cleanup_interval_seconds,
            ),
            (
                "consistency.sweep_interval_seconds",
                self.consistency.sweep_interval_seconds,
            ),
        ];

        for (field, value) in durations {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    "must be greater than zero",
                ));
            }
        }

        if self.event_bus.slow_subscription_warn_ms == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "event_bus.slow_subscription_warn_ms",
                "must be greater than zero when set",
            ));
        }

        if self.conflicts.medium_field_threshold >= self.conflicts.high_field_threshold {
            return Err(ConfigurationError::invalid_value(
                "conflicts.medium_field_threshold",
                "must be lower than conflicts.high_field_threshold",
            ));
        }

        let tolerance = self.consistency.price_tolerance;
        if tolerance.is_nan() || tolerance < 0.0 {
            return Err(ConfigurationError::invalid_value(
                "consistency.price_tolerance",
                "must be a non-negative number",
            ));
        }

        Ok(())
    }
}
