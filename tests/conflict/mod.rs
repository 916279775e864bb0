use proptest::prelude::*;
use retail_core::config::ConflictConfig;
use retail_core::conflict::{
    ConflictResolver, ConflictSeverity, ConflictType, BUSINESS_PRIORITY, LATEST_WINS, MANUAL,
    USER_DECISION,
};
use retail_core::constants::events::{
    CONFLICT_DETECTED, CONFLICT_MANUAL_RESOLUTION_REQUIRED, CONFLICT_RESOLVED,
};
use retail_core::events::EventBus;
use serde_json::{json, Map, Value};

use crate::common::{non_critical_fields_strategy, EventRecorder};

const T: &str = "2024-03-01T10:00:00Z";
const T_PLUS_10: &str = "2024-03-01T10:00:10Z";

fn resolver() -> (ConflictResolver, EventBus) {
    let bus = EventBus::new();
    (ConflictResolver::new(ConflictConfig::default(), bus.clone()), bus)
}

fn product(updated_at: &str, description: &str, price: f64) -> Value {
    json!({
        "id": "p1",
        "name": "Phone X",
        "description": description,
        "price": price,
        "stock": 3,
        "updated_at": updated_at,
    })
}

#[tokio::test]
async fn test_description_only_change_is_low_and_auto_resolved() {
    let (resolver, bus) = resolver();
    let recorder = EventRecorder::attach(&bus, &[CONFLICT_DETECTED, CONFLICT_RESOLVED]);

    let local = product(T, "Black", 300.0);
    let remote = product(T_PLUS_10, "Black, 128GB", 300.0);
    let conflict = resolver
        .detect_conflict("products", "p1", &local, &remote)
        .await
        .unwrap();

    assert_eq!(conflict.conflict_type, ConflictType::Version);
    assert_eq!(conflict.severity, ConflictSeverity::Low);
    assert_eq!(ConflictResolver::select_strategy(&conflict), LATEST_WINS);
    assert_eq!(resolver.pending_conflicts().len(), 1);

    let result = resolver.handle_conflict(conflict).await;
    assert!(result.success);
    assert_eq!(result.applied_strategy, LATEST_WINS);
    assert_eq!(result.resolved_data, Some(remote));
    assert!(resolver.pending_conflicts().is_empty());

    bus.flush().await;
    assert_eq!(recorder.types(), vec![CONFLICT_DETECTED, CONFLICT_RESOLVED]);
}

#[tokio::test]
async fn test_price_change_waits_for_manual_resolution() {
    let (resolver, bus) = resolver();
    let recorder = EventRecorder::attach(&bus, &[CONFLICT_MANUAL_RESOLUTION_REQUIRED]);

    let local = product(T, "Black", 300.0);
    let remote = product(T_PLUS_10, "Black", 320.0);
    let conflict = resolver
        .detect_conflict("products", "p1", &local, &remote)
        .await
        .unwrap();
    assert_eq!(conflict.severity, ConflictSeverity::Critical);

    let result = resolver.handle_conflict(conflict.clone()).await;
    assert!(!result.success);
    assert!(result.requires_manual_intervention);
    assert_eq!(result.applied_strategy, USER_DECISION);

    let pending = resolver.get_conflict(&conflict.id).unwrap();
    assert_eq!(pending.resolution_strategy.as_deref(), Some(USER_DECISION));

    let chosen = product(T_PLUS_10, "Black", 310.0);
    let result = resolver
        .resolve_manual_conflict(&conflict.id, chosen.clone())
        .await;
    assert!(result.success);
    assert_eq!(result.applied_strategy, MANUAL);
    assert_eq!(result.resolved_data, Some(chosen));
    assert!(resolver.get_conflict(&conflict.id).is_none());

    bus.flush().await;
    assert_eq!(recorder.events().len(), 1);
}

#[tokio::test]
async fn test_latest_wins_keeps_newer_local_copy() {
    let (resolver, _bus) = resolver();
    let local = product(T_PLUS_10, "Local edit", 300.0);
    let remote = product(T, "Remote edit", 300.0);

    let conflict = resolver
        .detect_conflict("products", "p1", &local, &remote)
        .await
        .unwrap();
    let resolved = resolver.resolve_with_strategy(LATEST_WINS, &conflict).unwrap();
    assert_eq!(resolved, local);
}

#[tokio::test]
async fn test_identical_versions_without_rule_breach_are_not_conflicts() {
    let (resolver, _bus) = resolver();
    let local = product(T, "Black", 300.0);
    let remote = product(T, "Black", 300.0);

    assert!(resolver
        .detect_conflict("products", "p1", &local, &remote)
        .await
        .is_none());
    assert!(resolver.pending_conflicts().is_empty());
}

#[tokio::test]
async fn test_business_rule_breach_uses_business_priority() {
    let (resolver, _bus) = resolver();
    let local = json!({"id": "p1", "min_price": 500, "max_price": 400, "stock": 2, "updated_at": T});
    let remote = json!({"id": "p1", "min_price": 300, "max_price": 400, "stock": 7, "updated_at": T});

    let conflict = resolver
        .detect_conflict("products", "p1", &local, &remote)
        .await
        .unwrap();
    assert_eq!(conflict.conflict_type, ConflictType::BusinessRule);
    assert_eq!(conflict.severity, ConflictSeverity::High);

    let result = resolver.handle_conflict(conflict).await;
    assert!(result.success);
    assert_eq!(result.applied_strategy, BUSINESS_PRIORITY);
    assert_eq!(result.resolved_data.unwrap()["stock"], 7);
}

#[tokio::test]
async fn test_registered_critical_fields_replace_defaults() {
    let (resolver, _bus) = resolver();
    resolver.register_critical_fields("products", &["description"]);

    let price_only = resolver
        .detect_conflict(
            "products",
            "p1",
            &product(T, "Black", 300.0),
            &product(T_PLUS_10, "Black", 320.0),
        )
        .await
        .unwrap();
    assert_eq!(price_only.severity, ConflictSeverity::Low);

    let description = resolver
        .detect_conflict(
            "products",
            "p1",
            &product(T, "Black", 300.0),
            &product(T_PLUS_10, "White", 300.0),
        )
        .await
        .unwrap();
    assert_eq!(description.severity, ConflictSeverity::Critical);
}

fn diverging_copies(field_names: &[String]) -> (Value, Value) {
    let mut local = Map::new();
    let mut remote = Map::new();
    for (key, copy, updated_at) in [("l", &mut local, T), ("r", &mut remote, T_PLUS_10)] {
        copy.insert("id".to_string(), json!("p1"));
        copy.insert("updated_at".to_string(), json!(updated_at));
        for name in field_names {
            copy.insert(name.clone(), json!(format!("{key}-{name}")));
        }
    }
    (Value::Object(local), Value::Object(remote))
}

proptest! {
    #[test]
    fn prop_severity_follows_differing_field_count(fields in non_critical_fields_strategy()) {
        let names: Vec<String> = fields.into_iter().collect();
        let (severity, with_price) = tokio_test::block_on(async {
            let (resolver, _bus) = resolver();
            let (local, remote) = diverging_copies(&names);
            let severity = resolver
                .detect_conflict("products", "p1", &local, &remote)
                .await
                .map(|c| c.severity);

            let mut with_price = names.clone();
            with_price.push("price".to_string());
            let (local, remote) = diverging_copies(&with_price);
            let with_price = resolver
                .detect_conflict("products", "p1", &local, &remote)
                .await
                .map(|c| c.severity);
            (severity, with_price)
        });

        let expected = if names.len() > 5 {
            ConflictSeverity::High
        } else if names.len() > 2 {
            ConflictSeverity::Medium
        } else {
            ConflictSeverity::Low
        };
        prop_assert_eq!(severity, Some(expected));
        prop_assert_eq!(with_price, Some(ConflictSeverity::Critical));
    }
}
