//! Conflict classification helpers.

use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::types::ConflictSeverity;
use crate::config::ConflictConfig;
use crate::constants::{fields, tables};

/// Returns a description when local and remote break an entity rule
pub type BusinessRuleCheck = Arc<dyn Fn(&Value, &Value) -> Option<String> + Send + Sync>;

/// Timestamp formats Postgres emits for `timestamp` columns without a zone.
/// They are read as UTC.
const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Epoch milliseconds of a timestamp value: RFC 3339 strings, zone-less
/// ISO 8601 strings, or numbers
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(t) = DateTime::parse_from_rfc3339(s) {
                return Some(t.timestamp_millis());
            }
            NAIVE_TIMESTAMP_FORMATS.iter().find_map(|format| {
                NaiveDateTime::parse_from_str(s, format)
                    .ok()
                    .map(|t| t.and_utc().timestamp_millis())
            })
        }
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    }
}

/// `updated_at` as epoch milliseconds. Missing or unparseable values count
/// as the epoch.
pub fn updated_at_millis(copy: &Value) -> i64 {
    copy.get(fields::UPDATED_AT)
        .and_then(parse_timestamp)
        .unwrap_or(0)
}

/// Both copies carry an `updated_at` and they name different instants.
/// Values that don't parse as timestamps are compared as written.
pub fn has_version_conflict(local: &Value, remote: &Value) -> bool {
    match (local.get(fields::UPDATED_AT), remote.get(fields::UPDATED_AT)) {
        (Some(l), Some(r)) if !l.is_null() && !r.is_null() => {
            match (parse_timestamp(l), parse_timestamp(r)) {
                (Some(local_at), Some(remote_at)) => local_at != remote_at,
                _ => l != r,
            }
        }
        _ => false,
    }
}

/// Fields whose values differ, over the union of both copies' keys.
/// Timestamps are not counted.
pub fn differing_fields(local: &Value, remote: &Value) -> Vec<String> {
    let keys: BTreeSet<&String> = local
        .as_object()
        .into_iter()
        .chain(remote.as_object())
        .flat_map(|map| map.keys())
        .collect();

    keys.into_iter()
        .filter(|key| key.as_str() != fields::CREATED_AT && key.as_str() != fields::UPDATED_AT)
        .filter(|key| local.get(key.as_str()) != remote.get(key.as_str()))
        .cloned()
        .collect()
}

pub fn classify_severity(
    differing: &[String],
    critical_fields: &[String],
    config: &ConflictConfig,
) -> ConflictSeverity {
    if differing.iter().any(|f| critical_fields.contains(f)) {
        ConflictSeverity::Critical
    } else if differing.len() > config.high_field_threshold {
        ConflictSeverity::High
    } else if differing.len() > config.medium_field_threshold {
        ConflictSeverity::Medium
    } else {
        ConflictSeverity::Low
    }
}

/// Fields whose divergence is always critical, per entity
pub fn default_critical_fields() -> HashMap<String, Vec<String>> {
    [
        (tables::PRODUCTS, &["price", "stock"][..]),
        (tables::SALES, &["total_amount", "status"][..]),
        (tables::CLIENTS, &["type", "status"][..]),
        (tables::PRODUCT_UNITS, &["status", "serial_number"][..]),
    ]
    .into_iter()
    .map(|(entity, fields)| {
        (
            entity.to_string(),
            fields.iter().map(|f| f.to_string()).collect(),
        )
    })
    .collect()
}

pub fn default_business_rules() -> HashMap<String, Vec<BusinessRuleCheck>> {
    let mut rules: HashMap<String, Vec<BusinessRuleCheck>> = HashMap::new();
    rules
        .entry(tables::PRODUCTS.to_string())
        .or_default()
        .push(Arc::new(product_price_bounds));
    rules
        .entry(tables::SALES.to_string())
        .or_default()
        .push(Arc::new(sale_reopened));
    rules
        .entry(tables::PRODUCT_UNITS.to_string())
        .or_default()
        .push(Arc::new(unit_unsold));
    rules
}

fn number(copy: &Value, key: &str) -> Option<f64> {
    match copy.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn status(copy: &Value) -> Option<&str> {
    copy.get("status").and_then(Value::as_str)
}

/// `min_price` above `max_price` on either copy
fn product_price_bounds(local: &Value, remote: &Value) -> Option<String> {
    [("local", local), ("remote", remote)]
        .into_iter()
        .find_map(|(side, copy)| match (number(copy, "min_price"), number(copy, "max_price")) {
            (Some(min), Some(max)) if min > max => Some(format!(
                "{side} min_price {min} exceeds max_price {max}"
            )),
            _ => None,
        })
}

fn sale_reopened(local: &Value, remote: &Value) -> Option<String> {
    match (status(local), status(remote)) {
        (Some(from @ ("cancelled" | "refunded")), Some("completed")) => {
            Some(format!("sale cannot move from {from} to completed"))
        }
        _ => None,
    }
}

fn unit_unsold(local: &Value, remote: &Value) -> Option<String> {
    match (status(local), status(remote)) {
        (Some("sold"), Some("available")) => {
            Some("unit cannot move from sold back to available".to_string())
        }
        _ => None,
    }
}
