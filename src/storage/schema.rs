//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the staging database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One scraping run of one adapter against one credential bundle
CREATE TABLE IF NOT EXISTS batches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    processor_name TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    error_message TEXT,
    credential_payload TEXT NOT NULL,
    file_hash TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_batches_processor_status ON batches(processor_name, status);
CREATE INDEX IF NOT EXISTS idx_batches_hash ON batches(processor_name, file_hash);

-- Orders captured from the supplier, pending validation
CREATE TABLE IF NOT EXISTS staged_orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id INTEGER NOT NULL REFERENCES batches(id),
    supplier_reference TEXT NOT NULL,
    source_url TEXT,
    order_date TEXT,
    currency TEXT,
    total_amount REAL,
    raw_data TEXT NOT NULL,
    status TEXT NOT NULL,
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_staged_orders_batch ON staged_orders(batch_id);
CREATE INDEX IF NOT EXISTS idx_staged_orders_status ON staged_orders(status);

-- Line items, owned by their order
CREATE TABLE IF NOT EXISTS staged_order_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id INTEGER NOT NULL REFERENCES staged_orders(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    supplier_reference TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    quantity INTEGER NOT NULL,
    listed_unit_price REAL,
    actual_unit_price REAL,
    product_url TEXT,
    raw_data TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_staged_order_items_order ON staged_order_items(order_id);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
