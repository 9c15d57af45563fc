//! Storage module for persisting ingestion state
//!
//! This module handles all database operations for the engine, including:
//! - SQLite database initialization and schema management
//! - Batch lifecycle persistence (queued, started, completed, failed)
//! - Staged orders and their line items
//! - Stale batch recovery after an unclean shutdown

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::{BatchStatus, OrderStatus};
use chrono::{DateTime, NaiveDate, Utc};

/// A batch as submitted by an upstream actor, before it has an ID
#[derive(Debug, Clone)]
pub struct NewBatch {
    /// Name of the handler/adapter that will process this batch
    pub processor_name: String,

    /// Serialized credential bundle
    pub credential_payload: String,

    /// Stable hash of `credential_payload`, used upstream for deduplication
    pub file_hash: String,
}

/// Represents a batch in the database
#[derive(Debug, Clone)]
pub struct BatchRecord {
    pub id: i64,
    pub processor_name: String,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub credential_payload: String,
    pub file_hash: String,
}

/// A persisted, not-yet-validated order captured from a supplier site
#[derive(Debug, Clone, PartialEq)]
pub struct StagedOrder {
    pub id: i64,
    pub batch_id: i64,

    /// Supplier's order reference; the detail URL until the page is parsed
    pub supplier_reference: String,

    /// URL the order was (or would have been) fetched from
    pub source_url: Option<String>,

    pub order_date: Option<NaiveDate>,
    pub currency: Option<String>,
    pub total_amount: Option<f64>,

    /// Verbatim captured payload kept for audit
    pub raw_data: String,

    pub status: OrderStatus,
    pub error_message: Option<String>,
    pub items: Vec<StagedOrderItem>,
}

impl StagedOrder {
    /// Marks the order failed with the given message
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = OrderStatus::Failed;
        self.error_message = Some(message.into());
    }
}

/// A line item of a staged order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StagedOrderItem {
    pub supplier_reference: String,
    pub name: String,
    pub description: Option<String>,
    pub quantity: i64,
    pub listed_unit_price: Option<f64>,
    pub actual_unit_price: Option<f64>,
    pub product_url: Option<String>,
    pub raw_data: String,
}
