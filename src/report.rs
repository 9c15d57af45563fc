//! Status report over the staging database
//!
//! This module provides functionality for extracting and displaying
//! batch and order statistics from the storage layer.

use crate::state::{BatchStatus, OrderStatus};
use crate::storage::Storage;
use chrono::{DateTime, Utc};

/// How many failed batches the report lists
pub const FAILED_BATCH_LIMIT: usize = 10;

/// A failed batch as shown to operators
#[derive(Debug, Clone, PartialEq)]
pub struct FailedBatch {
    pub id: i64,
    pub processor_name: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: String,
}

/// Ingestion statistics summary
#[derive(Debug, Clone, PartialEq)]
pub struct IngestStatistics {
    /// Count of batches per status, in lifecycle order
    pub batches_by_status: Vec<(BatchStatus, u64)>,

    /// Count of staged orders per status, in lifecycle order
    pub orders_by_status: Vec<(OrderStatus, u64)>,

    /// Most recent failed batches, newest first
    pub recent_failures: Vec<FailedBatch>,
}

impl IngestStatistics {
    pub fn total_batches(&self) -> u64 {
        self.batches_by_status.iter().map(|(_, n)| n).sum()
    }

    pub fn total_orders(&self) -> u64 {
        self.orders_by_status.iter().map(|(_, n)| n).sum()
    }
}

/// Loads statistics from storage
pub fn load_statistics(storage: &dyn Storage) -> crate::Result<IngestStatistics> {
    let batches_by_status = BatchStatus::all()
        .into_iter()
        .map(|status| Ok((status, storage.count_batches_by_status(status)?)))
        .collect::<crate::Result<Vec<_>>>()?;

    let orders_by_status = OrderStatus::all()
        .into_iter()
        .map(|status| Ok((status, storage.count_orders_by_status(status)?)))
        .collect::<crate::Result<Vec<_>>>()?;

    let recent_failures = storage
        .recent_failed_batches(FAILED_BATCH_LIMIT)?
        .into_iter()
        .map(|batch| FailedBatch {
            id: batch.id,
            processor_name: batch.processor_name,
            completed_at: batch.completed_at,
            error_message: batch.error_message.unwrap_or_default(),
        })
        .collect();

    Ok(IngestStatistics {
        batches_by_status,
        orders_by_status,
        recent_failures,
    })
}

fn percentage(count: u64, total: u64) -> f64 {
    if total > 0 {
        (count as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &IngestStatistics) {
    println!("=== Ingestion Statistics ===\n");

    let total = stats.total_batches();
    println!("Batches ({}):", total);
    for (status, count) in &stats.batches_by_status {
        println!("  {}: {} ({:.1}%)", status, count, percentage(*count, total));
    }
    println!();

    let total = stats.total_orders();
    println!("Staged orders ({}):", total);
    for (status, count) in &stats.orders_by_status {
        println!("  {}: {} ({:.1}%)", status, count, percentage(*count, total));
    }
    println!();

    if stats.recent_failures.is_empty() {
        println!("No failed batches.");
        return;
    }

    println!("Recent failed batches:");
    for failure in &stats.recent_failures {
        let when = failure
            .completed_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  #{} [{}] {}: {}",
            failure.id, failure.processor_name, when, failure.error_message
        );
    }
}
