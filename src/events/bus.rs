//! # Event Bus
//!
//! Process-wide publish/subscribe hub for domain events.
//!
//! ## Architecture
//!
//! The bus keeps two independent listener registries:
//! - **Listeners** (`on`/`off`): invoked concurrently on every `emit`, joined
//!   before `emit` returns. One failing listener never affects the others.
//! - **Subscriptions** (`subscribe`): kept sorted by ascending priority and run
//!   by a single background processor that drains a FIFO queue. Subscriptions
//!   never run concurrently with each other and events are processed strictly
//!   in the order they were emitted, across all event types.
//!
//! When any subscription fails while processing an event, the processor queues a
//! `system.event_processing_error` event carrying the original event and the
//! collected errors. Failures while processing that error event are only logged.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use retail_core::events::{EventBus, EventModule, EventOperation, SystemEvent};
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! bus.subscribe_with_priority("inventory.updated", 10, |event| async move {
//!     tracing::info!(entity_id = %event.entity_id, "stock changed");
//!     Ok(())
//! });
//!
//! bus.emit(SystemEvent::new(
//!     "inventory.updated",
//!     EventModule::Inventory,
//!     EventOperation::Update,
//!     "prod_1",
//! ))
//! .await;
//! # }
//! ```

use crate::config::EventBusConfig;
use crate::constants::events::EVENT_PROCESSING_ERROR;
use crate::error::ListenerError;
use crate::events::types::{EventMetadata, EventOperation, SystemEvent};
use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Boxed async callback invoked with each matching event
pub type EventListener =
    Arc<dyn Fn(SystemEvent) -> BoxFuture<'static, Result<(), ListenerError>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
struct EventSubscription {
    id: SubscriptionId,
    priority: i32,
    listener: EventListener,
}

enum QueueItem {
    Event { event: SystemEvent, generation: u64 },
    Barrier(oneshot::Sender<()>),
}

struct BusState {
    config: EventBusConfig,
    /// Per event type, sorted ascending by priority
    subscriptions: RwLock<HashMap<String, Vec<EventSubscription>>>,
    listeners: RwLock<HashMap<String, Vec<(ListenerId, EventListener)>>>,
    /// Bumped by `clear_all`; queued events from older generations are dropped
    generation: AtomicU64,
    next_id: AtomicU64,
    events_processed: AtomicU64,
    events_failed: AtomicU64,
}

/// Event bus statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBusStats {
    pub subscription_count: usize,
    pub listener_count: usize,
    pub events_processed: u64,
    pub events_failed: u64,
}

/// Publish/subscribe hub. Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct EventBus {
    state: Arc<BusState>,
    queue: mpsc::UnboundedSender<QueueItem>,
}

impl EventBus {
    /// Create a new event bus with default configuration.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    pub fn with_config(config: EventBusConfig) -> Self {
        let (queue, queue_rx) = mpsc::unbounded_channel();
        let default_priority = config.default_priority;
        let state = Arc::new(BusState {
            config,
            subscriptions: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            events_processed: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
        });

        tokio::spawn(Self::run_processor(
            Arc::clone(&state),
            queue.downgrade(),
            queue_rx,
        ));

        info!(default_priority = default_priority, "EventBus initialized");

        Self { state, queue }
    }

    /// Subscribe with the configured default priority
    pub fn subscribe<F, Fut>(&self, event_type: &str, listener: F) -> SubscriptionId
    where
        F: Fn(SystemEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        self.subscribe_with_priority(event_type, self.state.config.default_priority, listener)
    }

    /// Subscribe to an event type. Lower priority values run first; equal
    /// priorities run in registration order.
    pub fn subscribe_with_priority<F, Fut>(
        &self,
        event_type: &str,
        priority: i32,
        listener: F,
    ) -> SubscriptionId
    where
        F: Fn(SystemEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        let id = SubscriptionId(self.next_id());
        let subscription = EventSubscription {
            id,
            priority,
            listener: wrap_listener(listener),
        };

        let mut subscriptions = self.state.subscriptions.write();
        let entries = subscriptions.entry(event_type.to_string()).or_default();
        let index = insertion_index(entries, priority);
        entries.insert(index, subscription);

        debug!(
            event_type = event_type,
            subscription_id = %id,
            priority = priority,
            "Event subscription registered"
        );

        id
    }

    /// Remove one subscription. Returns false if it was unknown.
    pub fn unsubscribe(&self, subscription_id: SubscriptionId) -> bool {
        let mut subscriptions = self.state.subscriptions.write();
        let removed_from = subscriptions.iter_mut().find_map(|(event_type, entries)| {
            let position = entries.iter().position(|s| s.id == subscription_id)?;
            entries.remove(position);
            Some(event_type.clone())
        });

        if let Some(event_type) = &removed_from {
            if subscriptions.get(event_type).is_some_and(Vec::is_empty) {
                subscriptions.remove(event_type);
            }
            debug!(
                event_type = %event_type,
                subscription_id = %subscription_id,
                "Event subscription removed"
            );
        }

        removed_from.is_some()
    }

    /// Register a direct listener, independent of the priority queue
    pub fn on<F, Fut>(&self, event_type: &str, listener: F) -> ListenerId
    where
        F: Fn(SystemEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        let id = ListenerId(self.next_id());
        self.state
            .listeners
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push((id, wrap_listener(listener)));
        id
    }

    pub fn off(&self, event_type: &str, listener_id: ListenerId) -> bool {
        let mut listeners = self.state.listeners.write();
        let Some(entries) = listeners.get_mut(event_type) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(id, _)| *id != listener_id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(event_type);
        }
        removed
    }

    /// Emit an event.
    ///
    /// The event is queued for the subscription processor first, then direct
    /// listeners run and are joined. Listener and subscription failures never
    /// reach the caller.
    pub async fn emit(&self, mut event: SystemEvent) {
        event.ensure_metadata();

        let generation = self.state.generation.load(Ordering::SeqCst);
        if self
            .queue
            .send(QueueItem::Event {
                event: event.clone(),
                generation,
            })
            .is_err()
        {
            warn!(
                event_type = %event.event_type,
                "Event queue closed - subscriptions not notified"
            );
        }

        dispatch_listeners(&self.state, &event).await;
    }

    /// Wait until every event queued before this call has been processed.
    ///
    /// Must not be awaited from inside a subscription: the barrier would queue
    /// behind the event currently being processed.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.queue.send(QueueItem::Barrier(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Drop every subscription and listener and discard queued events
    pub fn clear_all(&self) {
        self.state.subscriptions.write().clear();
        self.state.listeners.write().clear();
        self.state.generation.fetch_add(1, Ordering::SeqCst);
        info!("EventBus cleared");
    }

    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            subscription_count: self.state.subscriptions.read().values().map(Vec::len).sum(),
            listener_count: self.state.listeners.read().values().map(Vec::len).sum(),
            events_processed: self.state.events_processed.load(Ordering::Relaxed),
            events_failed: self.state.events_failed.load(Ordering::Relaxed),
        }
    }

    fn next_id(&self) -> u64 {
        self.state.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn run_processor(
        state: Arc<BusState>,
        requeue: mpsc::WeakUnboundedSender<QueueItem>,
        mut queue_rx: mpsc::UnboundedReceiver<QueueItem>,
    ) {
        while let Some(item) = queue_rx.recv().await {
            match item {
                QueueItem::Barrier(done) => {
                    let _ = done.send(());
                }
                QueueItem::Event { event, generation } => {
                    if generation != state.generation.load(Ordering::SeqCst) {
                        debug!(
                            event_type = %event.event_type,
                            "Dropping event queued before clear_all"
                        );
                        continue;
                    }
                    Self::process_event(&state, &requeue, event).await;
                }
            }
        }

        debug!("EventBus processor stopped");
    }

    async fn process_event(
        state: &Arc<BusState>,
        requeue: &mpsc::WeakUnboundedSender<QueueItem>,
        event: SystemEvent,
    ) {
        let subscriptions = state
            .subscriptions
            .read()
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();
        let warn_after = state.config.slow_subscription_warning();
        let mut errors = Vec::new();

        for subscription in subscriptions {
            let mut future =
                pin!(AssertUnwindSafe((subscription.listener)(event.clone())).catch_unwind());
            let outcome = match warn_after {
                Some(limit) => match timeout(limit, future.as_mut()).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(
                            event_type = %event.event_type,
                            subscription_id = %subscription.id,
                            threshold_ms = limit.as_millis() as u64,
                            "Slow event subscription still running"
                        );
                        future.await
                    }
                },
                None => future.await,
            };
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("subscription panicked".to_string()),
            };

            if let Some(reason) = failure {
                error!(
                    event_type = %event.event_type,
                    subscription_id = %subscription.id,
                    priority = subscription.priority,
                    error = %reason,
                    "Event subscription failed"
                );
                errors.push(json!({
                    "subscriptionId": subscription.id.to_string(),
                    "priority": subscription.priority,
                    "error": reason,
                }));
            }
        }

        state.events_processed.fetch_add(1, Ordering::Relaxed);
        if errors.is_empty() {
            return;
        }
        state.events_failed.fetch_add(1, Ordering::Relaxed);

        if event.event_type == EVENT_PROCESSING_ERROR {
            warn!(
                error_count = errors.len(),
                "Subscription failed while handling an event processing error - not re-emitted"
            );
            return;
        }

        let error_event = processing_error_event(&event, errors);

        // Listeners run on their own task so the processor never waits on them
        let listener_state = Arc::clone(state);
        let listener_event = error_event.clone();
        tokio::spawn(async move {
            dispatch_listeners(&listener_state, &listener_event).await;
        });

        if let Some(sender) = requeue.upgrade() {
            let generation = state.generation.load(Ordering::SeqCst);
            let _ = sender.send(QueueItem::Event {
                event: error_event,
                generation,
            });
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.state.config)
            .field("stats", &self.stats())
            .finish()
    }
}

fn wrap_listener<F, Fut>(listener: F) -> EventListener
where
    F: Fn(SystemEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
{
    Arc::new(move |event| listener(event).boxed())
}

/// Position after every subscription with priority <= `priority`
fn insertion_index(entries: &[EventSubscription], priority: i32) -> usize {
    entries.partition_point(|s| s.priority <= priority)
}

async fn dispatch_listeners(state: &BusState, event: &SystemEvent) {
    let listeners = state
        .listeners
        .read()
        .get(&event.event_type)
        .cloned()
        .unwrap_or_default();
    if listeners.is_empty() {
        return;
    }

    let results = join_all(listeners.iter().map(|(id, listener)| {
        let future = AssertUnwindSafe(listener(event.clone())).catch_unwind();
        async move { (*id, future.await) }
    }))
    .await;

    for (id, result) in results {
        let reason = match result {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e.to_string(),
            Err(_) => "listener panicked".to_string(),
        };
        error!(
            event_type = %event.event_type,
            listener_id = id.0,
            error = %reason,
            "Event listener failed"
        );
    }
}

fn processing_error_event(original: &SystemEvent, errors: Vec<Value>) -> SystemEvent {
    let metadata = EventMetadata {
        timestamp: Utc::now(),
        correlation_id: original.correlation_id().map(str::to_string),
        user_id: original.metadata.as_ref().and_then(|m| m.user_id.clone()),
    };

    SystemEvent::new(
        EVENT_PROCESSING_ERROR,
        original.module,
        EventOperation::Notification,
        original.entity_id.clone(),
    )
    .with_data(json!({
        "originalEvent": original,
        "errors": errors,
    }))
    .with_metadata(metadata)
}
