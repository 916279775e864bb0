//! Built-in consistency rules.

use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::types::{ConsistencyRule, ConsistencyViolation, EntitySnapshot, RulePriority, ViolationSeverity};
use crate::constants::tables;
use crate::store::{row_bool, row_f64, row_id, row_str, value_as_key, Row};

pub const STOCK_CONSISTENCY: &str = "stock-consistency";
pub const SERIAL_UNIQUENESS: &str = "serial-uniqueness";
pub const PRICE_CONSISTENCY: &str = "price-consistency";
pub const SALES_INTEGRITY: &str = "sales-integrity";

const UNIT_AVAILABLE: &str = "available";

/// The four rules registered by `ConsistencyLayer::initialize`
pub fn builtin_rules(price_tolerance: f64) -> Vec<ConsistencyRule> {
    vec![
        stock_consistency(),
        serial_uniqueness(),
        price_consistency(),
        sales_integrity(price_tolerance),
    ]
}

/// Serial-tracked products must store the number of `available` units as stock
pub fn stock_consistency() -> ConsistencyRule {
    ConsistencyRule::new(
        STOCK_CONSISTENCY,
        "Stock matches available units",
        &[tables::PRODUCTS, tables::PRODUCT_UNITS],
        RulePriority::High,
        |snapshot| {
            let mut available: HashMap<String, i64> = HashMap::new();
            for unit in snapshot.rows(tables::PRODUCT_UNITS) {
                if row_str(unit, "status") == Some(UNIT_AVAILABLE) {
                    if let Some(product_id) = unit.get("product_id").and_then(value_as_key) {
                        *available.entry(product_id).or_default() += 1;
                    }
                }
            }

            let mut violations = Vec::new();
            for product in snapshot.rows(tables::PRODUCTS) {
                if !row_bool(product, "is_serialized") {
                    continue;
                }
                let Some(product_id) = row_id(product) else {
                    continue;
                };
                let stored = row_f64(product, "stock").unwrap_or(0.0) as i64;
                let correct = available.get(&product_id).copied().unwrap_or(0);
                if stored != correct {
                    violations.push(
                        ConsistencyViolation::new(
                            STOCK_CONSISTENCY,
                            tables::PRODUCTS,
                            product_id.clone(),
                            ViolationSeverity::Error,
                            format!(
                                "Product {product_id} stock is {stored} but {correct} units are available"
                            ),
                        )
                        .with_suggested_fix(format!("Set stock to {correct}"))
                        .with_repair_data(json!({
                            "productId": product_id,
                            "currentStock": stored,
                            "correctStock": correct,
                        })),
                    );
                }
            }
            Ok(violations)
        },
    )
    .with_auto_repair()
}

/// A trimmed serial number may belong to one unit only
pub fn serial_uniqueness() -> ConsistencyRule {
    ConsistencyRule::new(
        SERIAL_UNIQUENESS,
        "Serial numbers are unique",
        &[tables::PRODUCT_UNITS],
        RulePriority::Critical,
        |snapshot| {
            let mut by_serial: BTreeMap<&str, Vec<String>> = BTreeMap::new();
            for unit in snapshot.rows(tables::PRODUCT_UNITS) {
                let Some(serial) = row_str(unit, "serial_number").map(str::trim) else {
                    continue;
                };
                if serial.is_empty() {
                    continue;
                }
                if let Some(unit_id) = row_id(unit) {
                    let ids = by_serial.entry(serial).or_default();
                    if !ids.contains(&unit_id) {
                        ids.push(unit_id);
                    }
                }
            }

            Ok(by_serial
                .into_iter()
                .filter(|(_, ids)| ids.len() > 1)
                .map(|(serial, ids)| {
                    let joined = ids.join(",");
                    ConsistencyViolation::new(
                        SERIAL_UNIQUENESS,
                        tables::PRODUCT_UNITS,
                        joined.clone(),
                        ViolationSeverity::Critical,
                        format!("Serial number {serial} is shared by units {joined}"),
                    )
                    .with_suggested_fix("Correct the serial number on the duplicated units")
                })
                .collect())
        },
    )
}

/// Unit price bounds against each other and against the product's base price.
///
/// The minimum price must be strictly above the product's base price. This
/// mirrors the stored pricing convention and may be revisited with the
/// business owners.
pub fn price_consistency() -> ConsistencyRule {
    ConsistencyRule::new(
        PRICE_CONSISTENCY,
        "Unit price bounds are coherent",
        &[tables::PRODUCTS, tables::PRODUCT_UNITS],
        RulePriority::Medium,
        |snapshot| {
            let base_prices: HashMap<String, f64> = snapshot
                .rows(tables::PRODUCTS)
                .iter()
                .filter_map(|p| Some((row_id(p)?, row_f64(p, "price")?)))
                .collect();

            let mut violations = Vec::new();
            for unit in snapshot.rows(tables::PRODUCT_UNITS) {
                let Some(unit_id) = row_id(unit) else {
                    continue;
                };
                let min_price = row_f64(unit, "min_price");
                let max_price = row_f64(unit, "max_price");
                let base_price = unit
                    .get("product_id")
                    .and_then(value_as_key)
                    .and_then(|id| base_prices.get(&id).copied());

                if let (Some(min), Some(base)) = (min_price, base_price) {
                    if min <= base {
                        violations.push(
                            ConsistencyViolation::new(
                                PRICE_CONSISTENCY,
                                tables::PRODUCT_UNITS,
                                unit_id.clone(),
                                ViolationSeverity::Warning,
                                format!(
                                    "Unit {unit_id} minimum price {min} is not above base price {base}"
                                ),
                            )
                            .with_suggested_fix("Review the unit's minimum price"),
                        );
                    }
                }

                if let (Some(min), Some(max)) = (min_price, max_price) {
                    if max <= min {
                        violations.push(
                            ConsistencyViolation::new(
                                PRICE_CONSISTENCY,
                                tables::PRODUCT_UNITS,
                                unit_id.clone(),
                                ViolationSeverity::Error,
                                format!(
                                    "Unit {unit_id} maximum price {max} is not above minimum price {min}"
                                ),
                            )
                            .with_suggested_fix("Raise the maximum price above the minimum"),
                        );
                    }
                }
            }
            Ok(violations)
        },
    )
}

/// Sales reference existing clients and their items add up to the total
pub fn sales_integrity(tolerance: f64) -> ConsistencyRule {
    ConsistencyRule::new(
        SALES_INTEGRITY,
        "Sales reference clients and balance",
        &[tables::SALES, tables::SALE_ITEMS, tables::CLIENTS],
        RulePriority::High,
        move |snapshot| Ok(check_sales(snapshot, tolerance)),
    )
}

fn check_sales(snapshot: &EntitySnapshot, tolerance: f64) -> Vec<ConsistencyViolation> {
    let clients: HashSet<String> = snapshot
        .rows(tables::CLIENTS)
        .iter()
        .filter_map(row_id)
        .collect();

    let mut item_totals: HashMap<String, f64> = HashMap::new();
    for item in snapshot.rows(tables::SALE_ITEMS) {
        if let Some(sale_id) = item.get("sale_id").and_then(value_as_key) {
            *item_totals.entry(sale_id).or_default() += row_f64(item, "total_price").unwrap_or(0.0);
        }
    }

    let mut violations = Vec::new();
    for sale in snapshot.rows(tables::SALES) {
        let Some(sale_id) = row_id(sale) else {
            continue;
        };

        if let Some(client_id) = sale.get("client_id").and_then(value_as_key) {
            if !clients.contains(&client_id) {
                violations.push(
                    ConsistencyViolation::new(
                        SALES_INTEGRITY,
                        tables::SALES,
                        sale_id.clone(),
                        ViolationSeverity::Error,
                        format!("Sale {sale_id} references missing client {client_id}"),
                    )
                    .with_suggested_fix("Reassign the sale to an existing client"),
                );
            }
        }

        let expected = expected_total(sale);
        let actual = item_totals.get(&sale_id).copied().unwrap_or(0.0);
        if (actual - expected).abs() > tolerance {
            violations.push(
                ConsistencyViolation::new(
                    SALES_INTEGRITY,
                    tables::SALES,
                    sale_id.clone(),
                    ViolationSeverity::Error,
                    format!("Sale {sale_id} items total {actual:.2} but the sale expects {expected:.2}"),
                )
                .with_suggested_fix("Recalculate the sale totals from its items"),
            );
        }
    }
    violations
}

/// `subtotal + tax_amount - discount_amount`
fn expected_total(sale: &Row) -> f64 {
    row_f64(sale, "subtotal").unwrap_or(0.0) + row_f64(sale, "tax_amount").unwrap_or(0.0)
        - row_f64(sale, "discount_amount").unwrap_or(0.0)
}
