//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::{BatchStatus, OrderStatus};
use crate::storage::{BatchRecord, NewBatch, StagedOrder};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Batch not found: {0}")]
    BatchNotFound(i64),

    #[error("Staged order not found: {0}")]
    OrderNotFound(i64),

    #[error("Invalid batch transition for batch {id}: {from} -> {to}")]
    InvalidTransition {
        id: i64,
        from: BatchStatus,
        to: BatchStatus,
    },

    #[error("Corrupt value in column {column}: {value}")]
    Corrupt { column: &'static str, value: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Methods take `&self`; implementations provide their own interior
/// synchronization so a backend can be shared between tasks.
pub trait Storage: Send + Sync {
    /// Opens an independent handle on the same store for one unit of work
    fn open_session(&self) -> StorageResult<Arc<dyn Storage>>;

    // ===== Batch Management =====

    /// Creates a new batch in `Queued` status and returns its ID
    fn create_batch(&self, batch: &NewBatch) -> StorageResult<i64>;

    /// Gets a batch by ID
    fn get_batch(&self, batch_id: i64) -> StorageResult<BatchRecord>;

    /// Finds batches for a processor in the given status, oldest first
    fn find_batches(
        &self,
        processor_name: &str,
        status: BatchStatus,
        limit: usize,
    ) -> StorageResult<Vec<BatchRecord>>;

    /// Finds the most recent batch for a processor with the given file hash
    fn find_batch_by_hash(
        &self,
        processor_name: &str,
        file_hash: &str,
    ) -> StorageResult<Option<BatchRecord>>;

    /// Moves a batch to a new status
    ///
    /// Entering `Started` stamps `started_at`; entering a terminal status
    /// stamps `completed_at`. Terminal batches are never mutated again.
    fn update_batch_status(
        &self,
        batch_id: i64,
        status: BatchStatus,
        error_message: Option<&str>,
    ) -> StorageResult<()>;

    /// Fails every `Started` batch of `processor_name` that started before
    /// `started_before`, along with their `Started` orders
    ///
    /// Returns the number of batches failed.
    fn fail_stale_batches(
        &self,
        processor_name: &str,
        started_before: DateTime<Utc>,
        message: &str,
    ) -> StorageResult<usize>;

    // ===== Staged Orders =====

    /// Inserts a staged order in `Started` status and returns it
    fn create_order(
        &self,
        batch_id: i64,
        supplier_reference: &str,
        source_url: Option<&str>,
        raw_data: &str,
    ) -> StorageResult<StagedOrder>;

    /// Writes an order's fields, status and items back in place
    ///
    /// Items are replaced as a whole.
    fn save_order(&self, order: &StagedOrder) -> StorageResult<()>;

    /// Gets an order with its items
    fn get_order(&self, order_id: i64) -> StorageResult<StagedOrder>;

    /// Gets all orders of a batch with their items, in creation order
    fn orders_for_batch(&self, batch_id: i64) -> StorageResult<Vec<StagedOrder>>;

    // ===== Statistics =====

    fn count_batches_by_status(&self, status: BatchStatus) -> StorageResult<u64>;

    fn count_orders_by_status(&self, status: OrderStatus) -> StorageResult<u64>;

    /// Most recently finished failed batches, newest first
    fn recent_failed_batches(&self, limit: usize) -> StorageResult<Vec<BatchRecord>>;
}
