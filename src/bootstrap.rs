//! # Coordination System Bootstrap
//!
//! Assembly root for the coordination core. Builds one event bus, transaction
//! coordinator, consistency layer and conflict resolver from a single
//! configuration and data store, and owns their background tasks.
//!
//! Components are explicitly constructed and handed out by reference; nothing
//! is looked up through globals, so tests can run several systems side by side.
//!
//! ```rust,no_run
//! use retail_core::bootstrap::{BootstrapConfig, CoordinationSystem};
//! use retail_core::store::InMemoryDataStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> retail_core::Result<()> {
//! let system =
//!     CoordinationSystem::bootstrap(BootstrapConfig::default(), Arc::new(InMemoryDataStore::new()))?;
//! let tx = system.coordinator().begin_transaction(None);
//! system.coordinator().commit_transaction(&tx).await?;
//! system.shutdown().await;
//! # Ok(())
//! # }
//! ```

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{ConfigManager, CoordinationConfig};
use crate::conflict::ConflictResolver;
use crate::consistency::ConsistencyLayer;
use crate::coordinator::{CoordinatorStats, TransactionCoordinator};
use crate::error::Result;
use crate::events::{EventBus, EventBusStats};
use crate::store::{CacheInvalidator, DataStore, NoopCacheInvalidator};

/// Where to load configuration from
#[derive(Debug, Clone, Default)]
pub struct BootstrapConfig {
    /// Custom configuration directory (None = auto-detect)
    pub config_directory: Option<PathBuf>,
    /// Environment override (None = auto-detect)
    pub environment_override: Option<String>,
}

impl BootstrapConfig {
    pub fn for_testing() -> Self {
        Self {
            config_directory: None,
            environment_override: Some("test".to_string()),
        }
    }
}

/// Snapshot of the running system for monitoring
#[derive(Debug, Clone)]
pub struct SystemStatus {
    pub running: bool,
    pub environment: String,
    pub event_bus: EventBusStats,
    pub transactions: CoordinatorStats,
    pub consistency_rules: usize,
    pub pending_conflicts: usize,
}

pub struct CoordinationSystem {
    config_manager: Arc<ConfigManager>,
    store: Arc<dyn DataStore>,
    event_bus: EventBus,
    coordinator: TransactionCoordinator,
    consistency: ConsistencyLayer,
    conflicts: ConflictResolver,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl CoordinationSystem {
    /// Load configuration, then start the system.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bootstrap(config: BootstrapConfig, store: Arc<dyn DataStore>) -> Result<Self> {
        info!("🚀 BOOTSTRAP: Starting coordination system");

        let config_manager = match &config.environment_override {
            Some(env) => ConfigManager::load_from_directory_with_env(config.config_directory, env)?,
            None => ConfigManager::load_from_directory(config.config_directory)?,
        };

        info!(
            "✅ BOOTSTRAP: Configuration loaded for environment: {}",
            config_manager.environment()
        );

        Ok(Self::start(config_manager, store, Arc::new(NoopCacheInvalidator)))
    }

    /// Build every component from an already loaded configuration, initialize
    /// the consistency layer and start the transaction cleanup loop
    pub fn start(
        config_manager: Arc<ConfigManager>,
        store: Arc<dyn DataStore>,
        cache: Arc<dyn CacheInvalidator>,
    ) -> Self {
        let config = config_manager.config().clone();

        let event_bus = EventBus::with_config(config.event_bus.clone());
        let coordinator =
            TransactionCoordinator::with_config(event_bus.clone(), config.transactions.clone());
        let consistency = ConsistencyLayer::with_cache_invalidator(
            config.consistency.clone(),
            Arc::clone(&store),
            event_bus.clone(),
            cache,
        );
        let conflicts = ConflictResolver::new(config.conflicts.clone(), event_bus.clone());

        consistency.initialize();
        let cleanup_task = coordinator.spawn_cleanup_loop(config.transactions.cleanup_interval());

        info!(
            environment = config_manager.environment(),
            "✅ BOOTSTRAP: Coordination system started"
        );

        Self {
            config_manager,
            store,
            event_bus,
            coordinator,
            consistency,
            conflicts,
            cleanup_task: Mutex::new(Some(cleanup_task)),
            running: AtomicBool::new(true),
        }
    }

    pub fn config(&self) -> &CoordinationConfig {
        self.config_manager.config()
    }

    pub fn environment(&self) -> &str {
        self.config_manager.environment()
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    pub fn consistency(&self) -> &ConsistencyLayer {
        &self.consistency
    }

    pub fn conflicts(&self) -> &ConflictResolver {
        &self.conflicts
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            running: self.is_running(),
            environment: self.environment().to_string(),
            event_bus: self.event_bus.stats(),
            transactions: self.coordinator.stats(),
            consistency_rules: self.consistency.rules().len(),
            pending_conflicts: self.conflicts.pending_conflicts().len(),
        }
    }

    /// Stop background tasks and drain queued events
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Coordination system already stopped");
            return;
        }

        if let Some(task) = self.cleanup_task.lock().take() {
            task.abort();
        }
        self.consistency.destroy();
        self.event_bus.flush().await;

        info!("🛑 Coordination system stopped");
    }
}
