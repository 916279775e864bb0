//! # Shared Constants
//!
//! Event type vocabulary and table names agreed on by producers and consumers.

/// Event type strings carried in `SystemEvent::event_type`
pub mod events {
    // Entity lifecycle events
    pub const SALES_CREATED: &str = "sales.created";
    pub const SALES_UPDATED: &str = "sales.updated";
    pub const SALES_DELETED: &str = "sales.deleted";
    pub const INVENTORY_CREATED: &str = "inventory.created";
    pub const INVENTORY_UPDATED: &str = "inventory.updated";
    pub const INVENTORY_DELETED: &str = "inventory.deleted";
    pub const CLIENTS_CREATED: &str = "clients.created";
    pub const CLIENTS_UPDATED: &str = "clients.updated";
    pub const CLIENTS_DELETED: &str = "clients.deleted";
    pub const SUPPLIERS_CREATED: &str = "suppliers.created";
    pub const SUPPLIERS_UPDATED: &str = "suppliers.updated";
    pub const SUPPLIERS_DELETED: &str = "suppliers.deleted";

    /// Generic change notification for producers that don't emit per-entity events
    pub const DATA_CHANGED: &str = "data:changed";

    // Transaction lifecycle events
    pub const TRANSACTION_COMMITTED: &str = "system.transaction_committed";
    pub const TRANSACTION_COMPENSATED: &str = "system.transaction_compensated";
    pub const TRANSACTION_ABORTED: &str = "system.transaction_aborted";

    // Bus internals
    pub const EVENT_PROCESSING_ERROR: &str = "system.event_processing_error";

    // Consistency events
    pub const CONSISTENCY_VIOLATION: &str = "consistency:violation";
    pub const CONSISTENCY_REPORT: &str = "consistency:report";
    pub const CONSISTENCY_REPAIRED: &str = "consistency:repaired";

    // Conflict events
    pub const CONFLICT_DETECTED: &str = "conflict:detected";
    pub const CONFLICT_MANUAL_RESOLUTION_REQUIRED: &str = "conflict:manual_resolution_required";
    pub const CONFLICT_RESOLVED: &str = "conflict:resolved";

    /// Event types that trigger reactive consistency checks
    pub const DATA_CHANGE_EVENTS: &[&str] = &[
        DATA_CHANGED,
        SALES_CREATED,
        SALES_UPDATED,
        SALES_DELETED,
        INVENTORY_CREATED,
        INVENTORY_UPDATED,
        INVENTORY_DELETED,
        CLIENTS_CREATED,
        CLIENTS_UPDATED,
        CLIENTS_DELETED,
        SUPPLIERS_CREATED,
        SUPPLIERS_UPDATED,
        SUPPLIERS_DELETED,
    ];
}

/// Collection names in the external data store
pub mod tables {
    pub const PRODUCTS: &str = "products";
    pub const PRODUCT_UNITS: &str = "product_units";
    pub const SALES: &str = "sales";
    pub const SALE_ITEMS: &str = "sale_items";
    pub const CLIENTS: &str = "clients";
    pub const SUPPLIERS: &str = "suppliers";
    pub const SUPPLIER_TRANSACTIONS: &str = "supplier_transactions";
    pub const SUPPLIER_TRANSACTION_ITEMS: &str = "supplier_transaction_items";
    pub const CATEGORIES: &str = "categories";

    pub const ALL: &[&str] = &[
        PRODUCTS,
        PRODUCT_UNITS,
        SALES,
        SALE_ITEMS,
        CLIENTS,
        SUPPLIERS,
        SUPPLIER_TRANSACTIONS,
        SUPPLIER_TRANSACTION_ITEMS,
        CATEGORIES,
    ];

    pub fn is_known(table: &str) -> bool {
        ALL.contains(&table)
    }
}

/// Fields every synchronized row carries
pub mod fields {
    pub const ID: &str = "id";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
}
