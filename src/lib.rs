#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Retail Core
//!
//! Coordination core for retail inventory systems (products, serialized units,
//! suppliers, sales).
//!
//! ## Overview
//!
//! Multi-step writes in a retail back office touch several collections at once:
//! a sale reserves stock, charges a client and updates supplier records. This
//! crate keeps the derived state around those writes consistent, without owning
//! the relational store itself.
//!
//! ## Architecture
//!
//! Components, leaf first:
//!
//! - [`events`] - in-process event bus with a priority-ordered, strictly FIFO
//!   subscription queue and an independent fire-and-forget listener registry
//! - [`coordinator`] - saga-style transaction coordinator: steps with
//!   compensation actions, reverse-order rollback, timeout aborts
//! - [`consistency`] - detect-and-repair rules over the data store, run
//!   reactively on data changes and as a periodic sweep
//! - [`conflict`] - local/remote divergence detection and pluggable
//!   resolution strategies
//! - [`bootstrap`] - assembly root that wires the above from one configuration
//!
//! Supporting modules: [`store`] (data store boundary, in-memory and Postgres
//! implementations), [`config`], [`constants`], [`error`] and [`logging`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use retail_core::bootstrap::{BootstrapConfig, CoordinationSystem};
//! use retail_core::coordinator::CompensationAction;
//! use retail_core::events::EventModule;
//! use retail_core::store::InMemoryDataStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! retail_core::logging::init_structured_logging();
//! let system =
//!     CoordinationSystem::bootstrap(BootstrapConfig::default(), Arc::new(InMemoryDataStore::new()))?;
//!
//! let coordinator = system.coordinator();
//! let tx = coordinator.begin_transaction(None);
//! coordinator
//!     .execute_in_transaction(
//!         &tx,
//!         "reserve-stock",
//!         EventModule::Inventory,
//!         || async { Ok::<_, std::io::Error>(()) },
//!         Some(CompensationAction::new(|| async { Ok(()) })),
//!     )
//!     .await?;
//! coordinator.commit_transaction(&tx).await?;
//!
//! system.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod bootstrap;
pub mod config;
pub mod conflict;
pub mod consistency;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod logging;
pub mod store;

pub use bootstrap::{BootstrapConfig, CoordinationSystem, SystemStatus};
pub use config::{ConfigManager, CoordinationConfig};
pub use conflict::{ConflictResolutionResult, ConflictResolver, DataConflict};
pub use consistency::{ConsistencyLayer, ConsistencyReport, ConsistencyViolation};
pub use coordinator::{CompensationAction, TransactionCoordinator, TransactionStatus};
pub use error::{Result, RetailCoreError};
pub use events::{EventBus, EventModule, EventOperation, SystemEvent};
pub use store::{DataStore, Filter, InMemoryDataStore, Row};
