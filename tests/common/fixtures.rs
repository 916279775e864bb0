#![allow(dead_code)]

use parking_lot::Mutex;
use retail_core::events::{EventBus, SystemEvent};
use retail_core::store::{row_from_value, InMemoryDataStore, Row};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn rows(values: Vec<Value>) -> Vec<Row> {
    values.into_iter().map(row_from_value).collect()
}

/// One serial-tracked phone with stock 5 but only 3 available units, and a
/// charger that isn't serial-tracked
pub fn inventory_store() -> Arc<InMemoryDataStore> {
    let store = Arc::new(InMemoryDataStore::new());
    store
        .seed(
            "products",
            rows(vec![
                json!({"id": "phone", "name": "Phone X", "is_serialized": true, "stock": 5, "price": 300.0}),
                json!({"id": "charger", "name": "USB-C charger", "is_serialized": false, "stock": 40, "price": 15.0}),
            ]),
        )
        .unwrap();
    store
        .seed(
            "product_units",
            rows(vec![
                json!({"id": "u1", "product_id": "phone", "serial_number": "SN-001", "status": "available", "min_price": 320, "max_price": 380}),
                json!({"id": "u2", "product_id": "phone", "serial_number": "SN-002", "status": "available", "min_price": 320, "max_price": 380}),
                json!({"id": "u3", "product_id": "phone", "serial_number": "SN-003", "status": "available", "min_price": 320, "max_price": 380}),
                json!({"id": "u4", "product_id": "phone", "serial_number": "SN-004", "status": "sold", "min_price": 320, "max_price": 380}),
                json!({"id": "u5", "product_id": "phone", "serial_number": "SN-005", "status": "sold", "min_price": 320, "max_price": 380}),
            ]),
        )
        .unwrap();
    store
}

/// Current `stock` of a product row
pub fn stock_of(store: &InMemoryDataStore, product_id: &str) -> i64 {
    store
        .rows("products")
        .iter()
        .find(|p| p["id"] == product_id)
        .and_then(|p| p["stock"].as_i64())
        .unwrap()
}

/// Collects every event of the given types through priority subscriptions
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<SystemEvent>>>,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus, event_types: &[&str]) -> Self {
        let recorder = Self::default();
        for event_type in event_types {
            let events = Arc::clone(&recorder.events);
            bus.subscribe(event_type, move |event| {
                let events = Arc::clone(&events);
                async move {
                    events.lock().push(event);
                    Ok(())
                }
            });
        }
        recorder
    }

    pub fn events(&self) -> Vec<SystemEvent> {
        self.events.lock().clone()
    }

    pub fn types(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }
}
