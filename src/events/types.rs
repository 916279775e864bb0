use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::constants::tables;

/// Logical module that produced an event or owns a transaction step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventModule {
    Sales,
    Inventory,
    Clients,
    Suppliers,
    Consistency,
    ConflictResolution,
    Ui,
}

impl EventModule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sales => "sales",
            Self::Inventory => "inventory",
            Self::Clients => "clients",
            Self::Suppliers => "suppliers",
            Self::Consistency => "consistency",
            Self::ConflictResolution => "conflict_resolution",
            Self::Ui => "ui",
        }
    }

    /// Collections whose rows belong to this module
    pub fn tables(&self) -> &'static [&'static str] {
        match self {
            Self::Inventory => &[tables::PRODUCTS, tables::PRODUCT_UNITS, tables::CATEGORIES],
            Self::Sales => &[tables::SALES, tables::SALE_ITEMS],
            Self::Clients => &[tables::CLIENTS],
            Self::Suppliers => &[
                tables::SUPPLIERS,
                tables::SUPPLIER_TRANSACTIONS,
                tables::SUPPLIER_TRANSACTION_ITEMS,
            ],
            Self::Consistency | Self::ConflictResolution | Self::Ui => &[],
        }
    }
}

impl fmt::Display for EventModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventModule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sales" => Ok(Self::Sales),
            "inventory" => Ok(Self::Inventory),
            "clients" => Ok(Self::Clients),
            "suppliers" => Ok(Self::Suppliers),
            "consistency" => Ok(Self::Consistency),
            "conflict_resolution" => Ok(Self::ConflictResolution),
            "ui" => Ok(Self::Ui),
            _ => Err(format!("Invalid event module: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOperation {
    Create,
    Update,
    Delete,
    Check,
    Resolve,
    Violation,
    Notification,
}

impl EventOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Check => "check",
            Self::Resolve => "resolve",
            Self::Violation => "violation",
            Self::Notification => "notification",
        }
    }
}

impl fmt::Display for EventOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl EventMetadata {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            correlation_id: None,
            user_id: None,
        }
    }
}

/// Immutable domain event dispatched through the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub module: EventModule,
    pub operation: EventOperation,
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EventMetadata>,
}

impl SystemEvent {
    pub fn new(
        event_type: impl Into<String>,
        module: EventModule,
        operation: EventOperation,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            module,
            operation,
            entity_id: entity_id.into(),
            data: None,
            metadata: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.correlation_id.as_deref())
    }

    /// Fill in metadata when the producer didn't supply any.
    ///
    /// The synthesized correlation id has the form `module_operation_millis`.
    pub(crate) fn ensure_metadata(&mut self) {
        if self.metadata.is_none() {
            let timestamp = Utc::now();
            self.metadata = Some(EventMetadata {
                timestamp,
                correlation_id: Some(format!(
                    "{}_{}_{}",
                    self.module,
                    self.operation,
                    timestamp.timestamp_millis()
                )),
                user_id: None,
            });
        }
    }
}
