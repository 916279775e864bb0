#![allow(dead_code)]

use proptest::prelude::*;
use std::collections::BTreeSet;

/// Distinct subscription priorities in registration order
pub fn priority_set_strategy() -> impl Strategy<Value = Vec<i32>> {
    prop::collection::btree_set(-1_000i32..1_000, 1..12)
        .prop_map(|set| set.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

/// Names of product fields that never make a conflict critical
pub fn non_critical_fields_strategy() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set("[a-o][a-z_]{2,12}", 0..10).prop_map(|fields| {
        fields
            .into_iter()
            .filter(|f| f != "id" && f != "created_at")
            .collect()
    })
}

/// For each step: does it register a compensation, and does that compensation fail
pub fn step_plan_strategy() -> impl Strategy<Value = Vec<(bool, bool)>> {
    prop::collection::vec((any::<bool>(), any::<bool>()), 0..8)
}
