//! # Event System
//!
//! In-process publish/subscribe hub for domain events. See [`bus::EventBus`].

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventBusStats, EventListener, ListenerId, SubscriptionId};
pub use types::{EventMetadata, EventModule, EventOperation, SystemEvent};
