use retail_core::config::ConsistencyConfig;
use retail_core::consistency::rules::{SALES_INTEGRITY, SERIAL_UNIQUENESS, STOCK_CONSISTENCY};
use retail_core::consistency::{
    ConsistencyLayer, ConsistencyRule, ReportStatus, RulePriority, ViolationSeverity,
};
use retail_core::constants::events::{CONSISTENCY_REPAIRED, CONSISTENCY_REPORT};
use retail_core::events::EventBus;
use retail_core::store::{InMemoryDataStore, RecordingCacheInvalidator};
use serde_json::json;
use std::sync::Arc;

use crate::common::{inventory_store, rows, stock_of, EventRecorder};

fn manual_config() -> ConsistencyConfig {
    ConsistencyConfig {
        reactive_checks: false,
        ..ConsistencyConfig::default()
    }
}

#[tokio::test]
async fn test_stock_drift_is_detected_and_repaired() {
    let store = inventory_store();
    let cache = Arc::new(RecordingCacheInvalidator::new());
    let bus = EventBus::new();
    let repaired = EventRecorder::attach(&bus, &[CONSISTENCY_REPAIRED]);
    let layer =
        ConsistencyLayer::with_cache_invalidator(manual_config(), store.clone(), bus.clone(), cache.clone());
    layer.initialize();

    let violations = layer.check_rule(STOCK_CONSISTENCY).await.unwrap();
    assert_eq!(violations.len(), 1);
    let violation = &violations[0];
    assert_eq!(violation.entity_id, "phone");
    assert_eq!(violation.severity, ViolationSeverity::Error);
    assert_eq!(
        violation.auto_repair_data,
        Some(json!({"productId": "phone", "currentStock": 5, "correctStock": 3}))
    );

    assert_eq!(stock_of(&store, "phone"), 3);
    // Non-serialized products are left alone
    assert_eq!(stock_of(&store, "charger"), 40);
    assert_eq!(cache.keys(), vec!["product:phone"]);

    bus.flush().await;
    let repaired = repaired.events();
    assert_eq!(repaired.len(), 1);
    assert_eq!(repaired[0].entity_id, "phone");

    // Nothing left to repair
    assert!(layer.check_rule(STOCK_CONSISTENCY).await.unwrap().is_empty());
    layer.destroy();
}

#[tokio::test]
async fn test_duplicate_serial_is_one_critical_violation() {
    let store = Arc::new(InMemoryDataStore::new());
    store
        .seed(
            "product_units",
            rows(vec![
                json!({"id": "uA", "product_id": "p1", "serial_number": "ABC123", "status": "available"}),
                json!({"id": "uB", "product_id": "p1", "serial_number": " ABC123 ", "status": "sold"}),
                json!({"id": "uC", "product_id": "p1", "serial_number": "", "status": "available"}),
                json!({"id": "uD", "product_id": "p1", "serial_number": "", "status": "available"}),
            ]),
        )
        .unwrap();
    let layer = ConsistencyLayer::new(manual_config(), store, EventBus::new());
    layer.initialize();

    let violations = layer.check_rule(SERIAL_UNIQUENESS).await.unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].severity, ViolationSeverity::Critical);
    assert_eq!(violations[0].entity_id, "uA,uB");
    assert!(violations[0].message.contains("ABC123"));
    layer.destroy();
}

#[tokio::test]
async fn test_full_check_reports_every_rule() {
    let store = inventory_store();
    store
        .seed("clients", rows(vec![json!({"id": "c1", "name": "Ana"})]))
        .unwrap();
    store
        .seed(
            "sales",
            rows(vec![
                json!({"id": "s1", "client_id": "c1", "subtotal": 100.0, "tax_amount": 21.0, "discount_amount": 1.0}),
                json!({"id": "s2", "client_id": "ghost", "subtotal": 10.0, "tax_amount": 0.0, "discount_amount": 0.0}),
            ]),
        )
        .unwrap();
    store
        .seed(
            "sale_items",
            rows(vec![
                json!({"id": "i1", "sale_id": "s1", "total_price": 80.0}),
                json!({"id": "i2", "sale_id": "s1", "total_price": 40.0}),
                json!({"id": "i3", "sale_id": "s2", "total_price": 10.0}),
            ]),
        )
        .unwrap();

    let bus = EventBus::new();
    let reports = EventRecorder::attach(&bus, &[CONSISTENCY_REPORT]);
    let layer = ConsistencyLayer::new(manual_config(), store.clone(), bus.clone());
    layer.initialize();

    let report = layer.run_full_consistency_check().await;

    assert_eq!(report.status, ReportStatus::Errors);
    assert_eq!(report.summary.total, 2);
    assert_eq!(report.summary.errors, 2);
    assert_eq!(report.summary.critical, 0);
    assert_eq!(report.summary.by_rule.get(STOCK_CONSISTENCY), Some(&1));
    assert_eq!(report.summary.by_rule.get(SALES_INTEGRITY), Some(&1));
    assert!(report.entities_checked.contains(&"sale_items".to_string()));

    let missing_client = report
        .violations
        .iter()
        .find(|v| v.rule_id == SALES_INTEGRITY)
        .unwrap();
    assert_eq!(missing_client.entity_id, "s2");

    assert_eq!(stock_of(&store, "phone"), 3);

    bus.flush().await;
    let emitted = reports.events();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].entity_id, report.id);
    assert_eq!(emitted[0].data.as_ref().unwrap()["status"], "errors");
    layer.destroy();
}

#[tokio::test]
async fn test_clean_store_reports_healthy() {
    let store = Arc::new(InMemoryDataStore::new());
    let layer = ConsistencyLayer::new(manual_config(), store, EventBus::new());
    layer.initialize();

    let report = layer.run_full_consistency_check().await;
    assert_eq!(report.status, ReportStatus::Healthy);
    assert!(report.violations.is_empty());
    layer.destroy();
}

#[tokio::test]
async fn test_custom_rule_joins_the_sweep() {
    let store = inventory_store();
    let layer = ConsistencyLayer::new(manual_config(), store, EventBus::new());
    layer.initialize();
    layer.register_rule(ConsistencyRule::new(
        "charger-min-stock",
        "Chargers stay above reorder level",
        &["products"],
        RulePriority::Low,
        |_| Err(anyhow::anyhow!("reorder levels not configured")),
    ));

    // A failing rule contributes nothing and doesn't stop the others
    let report = layer.run_full_consistency_check().await;
    assert_eq!(layer.rules().len(), 5);
    assert_eq!(report.summary.by_rule.get(STOCK_CONSISTENCY), Some(&1));
    assert!(!report.summary.by_rule.contains_key("charger-min-stock"));
    layer.destroy();
}
