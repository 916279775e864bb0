use retail_core::bootstrap::CoordinationSystem;
use retail_core::config::{ConfigManager, CoordinationConfig};
use retail_core::constants::events::{
    CONSISTENCY_VIOLATION, INVENTORY_UPDATED, TRANSACTION_COMMITTED, TRANSACTION_COMPENSATED,
};
use retail_core::coordinator::{CompensationAction, StepStatus};
use retail_core::error::{ExecutionError, StoreError};
use retail_core::events::{EventModule, EventOperation, SystemEvent};
use retail_core::store::{
    row_f64, row_from_value, DataStore, Filter, InMemoryDataStore, NoopCacheInvalidator,
};
use retail_core::TransactionStatus;
use serde_json::json;
use std::sync::Arc;

use crate::common::{inventory_store, stock_of, EventRecorder};

fn start_system(store: Arc<InMemoryDataStore>) -> CoordinationSystem {
    let manager = ConfigManager::from_config(CoordinationConfig::default(), "test").unwrap();
    CoordinationSystem::start(Arc::new(manager), store, Arc::new(NoopCacheInvalidator))
}

async fn adjust_stock(store: &InMemoryDataStore, product_id: &str, delta: i64) -> Result<(), StoreError> {
    let rows = store.select("products", &Filter::by_id(product_id)).await?;
    let current = rows
        .first()
        .and_then(|row| row_f64(row, "stock"))
        .unwrap_or(0.0) as i64;
    store
        .update(
            "products",
            &Filter::by_id(product_id),
            row_from_value(json!({ "stock": current + delta })),
        )
        .await
}

fn restock(store: &Arc<InMemoryDataStore>, product_id: &'static str) -> CompensationAction {
    let store = Arc::clone(store);
    CompensationAction::new(move || async move {
        adjust_stock(&store, product_id, 1).await?;
        Ok::<_, anyhow::Error>(())
    })
}

#[tokio::test]
async fn test_declined_payment_restores_reserved_stock() {
    let store = inventory_store();
    let system = start_system(store.clone());
    let recorder = EventRecorder::attach(
        system.event_bus(),
        &[TRANSACTION_COMMITTED, TRANSACTION_COMPENSATED],
    );
    let coordinator = system.coordinator();

    let tx = coordinator.begin_transaction(Some(json!({"userId": "cashier-1"})));

    let reserving = Arc::clone(&store);
    coordinator
        .execute_in_transaction(
            &tx,
            "reserve-stock",
            EventModule::Inventory,
            move || async move { adjust_stock(&reserving, "charger", -1).await },
            Some(restock(&store, "charger")),
        )
        .await
        .unwrap();
    assert_eq!(stock_of(&store, "charger"), 39);

    let payment = coordinator
        .execute_in_transaction(
            &tx,
            "charge-payment",
            EventModule::Sales,
            || async { Err::<(), _>("payment gateway declined") },
            None,
        )
        .await;
    assert!(matches!(payment, Err(ExecutionError::Action { error: "payment gateway declined", .. })));

    assert_eq!(stock_of(&store, "charger"), 40);

    let context = coordinator.get_transaction_status(&tx).unwrap();
    assert_eq!(context.status, TransactionStatus::Aborted);
    assert_eq!(context.count_steps(StepStatus::Compensated), 1);
    assert_eq!(context.count_steps(StepStatus::Failed), 1);
    assert!(coordinator.commit_transaction(&tx).await.is_err());

    system.event_bus().flush().await;
    assert_eq!(recorder.types(), vec![TRANSACTION_COMPENSATED]);

    system.shutdown().await;
}

#[tokio::test]
async fn test_completed_sale_commits_and_reconciles_stock() {
    let store = inventory_store();
    let system = start_system(store.clone());
    let recorder = EventRecorder::attach(
        system.event_bus(),
        &[TRANSACTION_COMMITTED, CONSISTENCY_VIOLATION],
    );
    let coordinator = system.coordinator();

    let tx = coordinator.begin_transaction(None);

    let selling = Arc::clone(&store);
    coordinator
        .execute_in_transaction(
            &tx,
            "sell-unit",
            EventModule::Inventory,
            move || async move {
                selling
                    .update(
                        "product_units",
                        &Filter::by_id("u1"),
                        row_from_value(json!({"status": "sold"})),
                    )
                    .await?;
                adjust_stock(&selling, "phone", -1).await
            },
            Some(restock(&store, "phone")),
        )
        .await
        .unwrap();

    let recording = Arc::clone(&store);
    let sale = coordinator
        .execute_in_transaction(
            &tx,
            "record-sale",
            EventModule::Sales,
            move || async move {
                recording
                    .insert(
                        "sales",
                        row_from_value(json!({"subtotal": 300.0, "tax_amount": 0.0, "discount_amount": 0.0})),
                    )
                    .await
            },
            None,
        )
        .await
        .unwrap();
    assert!(sale.contains_key("id"));

    coordinator.commit_transaction(&tx).await.unwrap();
    assert_eq!(
        coordinator.get_transaction_status(&tx).unwrap().status,
        TransactionStatus::Committed
    );

    // Stock was 5 against 3 available units before the sale; now 4 against 2
    assert_eq!(stock_of(&store, "phone"), 4);
    system
        .event_bus()
        .emit(SystemEvent::new(
            INVENTORY_UPDATED,
            EventModule::Inventory,
            EventOperation::Update,
            "phone",
        ))
        .await;
    system.event_bus().flush().await;
    system.event_bus().flush().await;

    assert_eq!(stock_of(&store, "phone"), 2);
    let events = recorder.events();
    assert_eq!(events[0].event_type, TRANSACTION_COMMITTED);
    assert!(events
        .iter()
        .any(|e| e.event_type == CONSISTENCY_VIOLATION && e.entity_id == "stock-consistency"));

    let status = system.status();
    assert_eq!(status.transactions.committed, 1);
    assert_eq!(status.consistency_rules, 4);

    system.shutdown().await;
}
