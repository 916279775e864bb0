use parking_lot::Mutex;
use proptest::prelude::*;
use retail_core::constants::events::{EVENT_PROCESSING_ERROR, INVENTORY_UPDATED, SALES_CREATED};
use retail_core::events::{EventBus, EventModule, EventOperation, SystemEvent};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{priority_set_strategy, EventRecorder};

fn sale_created(id: &str) -> SystemEvent {
    SystemEvent::new(SALES_CREATED, EventModule::Sales, EventOperation::Create, id)
}

fn recording_subscription(bus: &EventBus, event_type: &str, priority: i32, log: &Arc<Mutex<Vec<String>>>) {
    let log = Arc::clone(log);
    bus.subscribe_with_priority(event_type, priority, move |event| {
        let log = Arc::clone(&log);
        async move {
            log.lock().push(format!("{priority}:{}", event.entity_id));
            Ok(())
        }
    });
}

#[tokio::test]
async fn test_priority_order_is_ascending() {
    let bus = EventBus::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    for priority in [10, 5, 20] {
        recording_subscription(&bus, SALES_CREATED, priority, &log);
    }

    bus.emit(sale_created("sale_1")).await;
    bus.flush().await;

    assert_eq!(*log.lock(), vec!["5:sale_1", "10:sale_1", "20:sale_1"]);
}

#[tokio::test(start_paused = true)]
async fn test_events_are_processed_fifo_across_emitters() {
    let bus = EventBus::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    for event_type in [SALES_CREATED, INVENTORY_UPDATED] {
        let log = Arc::clone(&log);
        bus.subscribe(event_type, move |event| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(format!("start:{}", event.entity_id));
                // Slow subscriber: the next event must still wait for it
                tokio::time::sleep(Duration::from_millis(100)).await;
                log.lock().push(format!("end:{}", event.entity_id));
                Ok(())
            }
        });
    }

    let first = bus.clone();
    let second = bus.clone();
    let a = tokio::spawn(async move { first.emit(sale_created("A")).await });
    a.await.unwrap();
    let b = tokio::spawn(async move {
        second
            .emit(SystemEvent::new(
                INVENTORY_UPDATED,
                EventModule::Inventory,
                EventOperation::Update,
                "B",
            ))
            .await
    });
    b.await.unwrap();
    bus.flush().await;

    assert_eq!(*log.lock(), vec!["start:A", "end:A", "start:B", "end:B"]);
}

#[tokio::test]
async fn test_failing_subscription_produces_error_event() {
    let bus = EventBus::new();
    let errors = EventRecorder::attach(&bus, &[EVENT_PROCESSING_ERROR]);
    let log = Arc::new(Mutex::new(Vec::new()));

    bus.subscribe_with_priority(SALES_CREATED, 1, |_| async {
        Err(anyhow::anyhow!("ledger unavailable"))
    });
    recording_subscription(&bus, SALES_CREATED, 2, &log);

    bus.emit(sale_created("sale_9")).await;
    bus.flush().await;
    bus.flush().await;

    // The later subscription still ran
    assert_eq!(*log.lock(), vec!["2:sale_9"]);

    let errors = errors.events();
    assert_eq!(errors.len(), 1);
    let data = errors[0].data.as_ref().unwrap();
    assert_eq!(data["originalEvent"]["entityId"], "sale_9");
    assert!(data["errors"][0].to_string().contains("ledger unavailable"));
    assert_eq!(bus.stats().events_failed, 1);
}

#[tokio::test]
async fn test_listeners_and_subscriptions_are_independent() {
    let bus = EventBus::new();
    let listener_calls = Arc::new(Mutex::new(0usize));
    let calls = Arc::clone(&listener_calls);
    let listener = bus.on(SALES_CREATED, move |_| {
        let calls = Arc::clone(&calls);
        async move {
            *calls.lock() += 1;
            Ok(())
        }
    });
    bus.on(SALES_CREATED, |_| async { Err(anyhow::anyhow!("listener broke")) });

    bus.emit(sale_created("sale_1")).await;
    assert_eq!(*listener_calls.lock(), 1);

    assert!(bus.off(SALES_CREATED, listener));
    bus.emit(sale_created("sale_2")).await;
    assert_eq!(*listener_calls.lock(), 1);
}

proptest! {
    #[test]
    fn prop_subscriptions_run_in_priority_order(priorities in priority_set_strategy()) {
        let observed = tokio_test::block_on(async {
            let bus = EventBus::new();
            let log = Arc::new(Mutex::new(Vec::new()));
            for priority in &priorities {
                recording_subscription(&bus, SALES_CREATED, *priority, &log);
            }
            bus.emit(sale_created("s")).await;
            bus.flush().await;
            let observed = log.lock().clone();
            observed
        });

        let mut expected = priorities.clone();
        expected.sort_unstable();
        let expected: Vec<String> = expected.iter().map(|p| format!("{p}:s")).collect();
        prop_assert_eq!(observed, expected);
    }
}
