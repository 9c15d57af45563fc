//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::state::{BatchStatus, OrderStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{BatchRecord, NewBatch, StagedOrder, StagedOrderItem};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const BATCH_COLUMNS: &str = "id, processor_name, status, created_at, started_at, completed_at, \
     error_message, credential_payload, file_hash";

const ORDER_COLUMNS: &str = "id, batch_id, supplier_reference, source_url, order_date, currency, \
     total_amount, raw_data, status, error_message";

const ORDER_DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite storage backend
///
/// Cloning is cheap and shares the connection. Use [`SqliteStorage::reopen`]
/// to get an independent connection for a concurrent worker.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStorage {
    /// Opens (or creates) the database at `path` and initializes the schema
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Creates an in-memory database
    ///
    /// An in-memory database lives on a single connection, so every
    /// [`reopen`](Self::reopen) of it shares that connection.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Opens an independent connection to the same database
    pub fn reopen(&self) -> StorageResult<Self> {
        match &self.path {
            Some(path) => Self::new(path),
            None => Ok(self.clone()),
        }
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))
    }
}

fn now_string() -> String {
    format_time(Utc::now())
}

fn format_time(time: DateTime<Utc>) -> String {
    // Fixed-width so that lexical order in SQL matches time order
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(column: &'static str, value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StorageError::Corrupt {
            column,
            value: value.to_string(),
        })
}

fn parse_optional_time(
    column: &'static str,
    value: Option<String>,
) -> StorageResult<Option<DateTime<Utc>>> {
    value.map(|v| parse_time(column, &v)).transpose()
}

/// Batch row as stored, before text columns are decoded
struct RawBatch {
    id: i64,
    processor_name: String,
    status: String,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    error_message: Option<String>,
    credential_payload: String,
    file_hash: String,
}

impl RawBatch {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            processor_name: row.get(1)?,
            status: row.get(2)?,
            created_at: row.get(3)?,
            started_at: row.get(4)?,
            completed_at: row.get(5)?,
            error_message: row.get(6)?,
            credential_payload: row.get(7)?,
            file_hash: row.get(8)?,
        })
    }

    fn into_record(self) -> StorageResult<BatchRecord> {
        let status =
            BatchStatus::from_db_string(&self.status).ok_or(StorageError::Corrupt {
                column: "batches.status",
                value: self.status.clone(),
            })?;

        Ok(BatchRecord {
            id: self.id,
            processor_name: self.processor_name,
            status,
            created_at: parse_time("batches.created_at", &self.created_at)?,
            started_at: parse_optional_time("batches.started_at", self.started_at)?,
            completed_at: parse_optional_time("batches.completed_at", self.completed_at)?,
            error_message: self.error_message,
            credential_payload: self.credential_payload,
            file_hash: self.file_hash,
        })
    }
}

/// Order row as stored, before text columns are decoded
struct RawOrder {
    id: i64,
    batch_id: i64,
    supplier_reference: String,
    source_url: Option<String>,
    order_date: Option<String>,
    currency: Option<String>,
    total_amount: Option<f64>,
    raw_data: String,
    status: String,
    error_message: Option<String>,
}

impl RawOrder {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            batch_id: row.get(1)?,
            supplier_reference: row.get(2)?,
            source_url: row.get(3)?,
            order_date: row.get(4)?,
            currency: row.get(5)?,
            total_amount: row.get(6)?,
            raw_data: row.get(7)?,
            status: row.get(8)?,
            error_message: row.get(9)?,
        })
    }

    fn into_order(self, items: Vec<StagedOrderItem>) -> StorageResult<StagedOrder> {
        let status =
            OrderStatus::from_db_string(&self.status).ok_or(StorageError::Corrupt {
                column: "staged_orders.status",
                value: self.status.clone(),
            })?;

        let order_date = match self.order_date {
            Some(date) => Some(NaiveDate::parse_from_str(&date, ORDER_DATE_FORMAT).map_err(
                |_| StorageError::Corrupt {
                    column: "staged_orders.order_date",
                    value: date.clone(),
                },
            )?),
            None => None,
        };

        Ok(StagedOrder {
            id: self.id,
            batch_id: self.batch_id,
            supplier_reference: self.supplier_reference,
            source_url: self.source_url,
            order_date,
            currency: self.currency,
            total_amount: self.total_amount,
            raw_data: self.raw_data,
            status,
            error_message: self.error_message,
            items,
        })
    }
}

fn load_items(conn: &Connection, order_id: i64) -> StorageResult<Vec<StagedOrderItem>> {
    let mut stmt = conn.prepare(
        "SELECT supplier_reference, name, description, quantity, listed_unit_price,
         actual_unit_price, product_url, raw_data
         FROM staged_order_items WHERE order_id = ?1 ORDER BY position ASC",
    )?;

    let items = stmt
        .query_map(params![order_id], |row| {
            Ok(StagedOrderItem {
                supplier_reference: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                quantity: row.get(3)?,
                listed_unit_price: row.get(4)?,
                actual_unit_price: row.get(5)?,
                product_url: row.get(6)?,
                raw_data: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(items)
}

fn load_order(conn: &Connection, order_id: i64) -> StorageResult<StagedOrder> {
    let raw = conn
        .query_row(
            &format!("SELECT {} FROM staged_orders WHERE id = ?1", ORDER_COLUMNS),
            params![order_id],
            RawOrder::from_row,
        )
        .optional()?
        .ok_or(StorageError::OrderNotFound(order_id))?;

    let items = load_items(conn, order_id)?;
    raw.into_order(items)
}

impl Storage for SqliteStorage {
    fn open_session(&self) -> StorageResult<Arc<dyn Storage>> {
        Ok(Arc::new(self.reopen()?))
    }

    // ===== Batch Management =====

    fn create_batch(&self, batch: &NewBatch) -> StorageResult<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO batches (processor_name, status, created_at, credential_payload, file_hash)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                batch.processor_name,
                BatchStatus::Queued.to_db_string(),
                now_string(),
                batch.credential_payload,
                batch.file_hash
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_batch(&self, batch_id: i64) -> StorageResult<BatchRecord> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM batches WHERE id = ?1", BATCH_COLUMNS),
            params![batch_id],
            RawBatch::from_row,
        )
        .optional()?
        .ok_or(StorageError::BatchNotFound(batch_id))?
        .into_record()
    }

    fn find_batches(
        &self,
        processor_name: &str,
        status: BatchStatus,
        limit: usize,
    ) -> StorageResult<Vec<BatchRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM batches WHERE processor_name = ?1 AND status = ?2
             ORDER BY created_at ASC, id ASC LIMIT ?3",
            BATCH_COLUMNS
        ))?;

        let rows = stmt
            .query_map(
                params![processor_name, status.to_db_string(), limit as i64],
                RawBatch::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawBatch::into_record).collect()
    }

    fn find_batch_by_hash(
        &self,
        processor_name: &str,
        file_hash: &str,
    ) -> StorageResult<Option<BatchRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM batches WHERE processor_name = ?1 AND file_hash = ?2
                 ORDER BY id DESC LIMIT 1",
                BATCH_COLUMNS
            ),
            params![processor_name, file_hash],
            RawBatch::from_row,
        )
        .optional()?
        .map(RawBatch::into_record)
        .transpose()
    }

    fn update_batch_status(
        &self,
        batch_id: i64,
        status: BatchStatus,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let current: String = tx
            .query_row(
                "SELECT status FROM batches WHERE id = ?1",
                params![batch_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StorageError::BatchNotFound(batch_id))?;
        let current = BatchStatus::from_db_string(&current).ok_or(StorageError::Corrupt {
            column: "batches.status",
            value: current.clone(),
        })?;

        if !current.can_transition_to(status) {
            return Err(StorageError::InvalidTransition {
                id: batch_id,
                from: current,
                to: status,
            });
        }

        let now = now_string();
        if status.is_terminal() {
            tx.execute(
                "UPDATE batches SET status = ?1, completed_at = ?2, error_message = ?3,
                 started_at = COALESCE(started_at, ?2) WHERE id = ?4",
                params![status.to_db_string(), now, error_message, batch_id],
            )?;
        } else {
            tx.execute(
                "UPDATE batches SET status = ?1, started_at = COALESCE(started_at, ?2),
                 error_message = ?3 WHERE id = ?4",
                params![status.to_db_string(), now, error_message, batch_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn fail_stale_batches(
        &self,
        processor_name: &str,
        started_before: DateTime<Utc>,
        message: &str,
    ) -> StorageResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let stale: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM batches
                 WHERE processor_name = ?1 AND status = ?2 AND started_at < ?3",
            )?;
            let ids = stmt
                .query_map(
                    params![
                        processor_name,
                        BatchStatus::Started.to_db_string(),
                        format_time(started_before)
                    ],
                    |row| row.get(0),
                )?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };

        let now = now_string();
        for batch_id in &stale {
            tx.execute(
                "UPDATE batches SET status = ?1, completed_at = ?2, error_message = ?3 WHERE id = ?4",
                params![BatchStatus::Failed.to_db_string(), now, message, batch_id],
            )?;
            tx.execute(
                "UPDATE staged_orders SET status = ?1, error_message = ?2, updated_at = ?3
                 WHERE batch_id = ?4 AND status = ?5",
                params![
                    OrderStatus::Failed.to_db_string(),
                    message,
                    now,
                    batch_id,
                    OrderStatus::Started.to_db_string()
                ],
            )?;
        }

        tx.commit()?;
        Ok(stale.len())
    }

    // ===== Staged Orders =====

    fn create_order(
        &self,
        batch_id: i64,
        supplier_reference: &str,
        source_url: Option<&str>,
        raw_data: &str,
    ) -> StorageResult<StagedOrder> {
        let conn = self.lock()?;
        let now = now_string();
        conn.execute(
            "INSERT INTO staged_orders
             (batch_id, supplier_reference, source_url, raw_data, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                batch_id,
                supplier_reference,
                source_url,
                raw_data,
                OrderStatus::Started.to_db_string(),
                now
            ],
        )?;

        Ok(StagedOrder {
            id: conn.last_insert_rowid(),
            batch_id,
            supplier_reference: supplier_reference.to_string(),
            source_url: source_url.map(str::to_string),
            order_date: None,
            currency: None,
            total_amount: None,
            raw_data: raw_data.to_string(),
            status: OrderStatus::Started,
            error_message: None,
            items: Vec::new(),
        })
    }

    fn save_order(&self, order: &StagedOrder) -> StorageResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE staged_orders SET supplier_reference = ?1, source_url = ?2, order_date = ?3,
             currency = ?4, total_amount = ?5, raw_data = ?6, status = ?7, error_message = ?8,
             updated_at = ?9 WHERE id = ?10",
            params![
                order.supplier_reference,
                order.source_url,
                order
                    .order_date
                    .map(|d| d.format(ORDER_DATE_FORMAT).to_string()),
                order.currency,
                order.total_amount,
                order.raw_data,
                order.status.to_db_string(),
                order.error_message,
                now_string(),
                order.id
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::OrderNotFound(order.id));
        }

        tx.execute(
            "DELETE FROM staged_order_items WHERE order_id = ?1",
            params![order.id],
        )?;
        for (position, item) in order.items.iter().enumerate() {
            tx.execute(
                "INSERT INTO staged_order_items
                 (order_id, position, supplier_reference, name, description, quantity,
                  listed_unit_price, actual_unit_price, product_url, raw_data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    order.id,
                    position as i64,
                    item.supplier_reference,
                    item.name,
                    item.description,
                    item.quantity,
                    item.listed_unit_price,
                    item.actual_unit_price,
                    item.product_url,
                    item.raw_data
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn get_order(&self, order_id: i64) -> StorageResult<StagedOrder> {
        let conn = self.lock()?;
        load_order(&conn, order_id)
    }

    fn orders_for_batch(&self, batch_id: i64) -> StorageResult<Vec<StagedOrder>> {
        let conn = self.lock()?;
        let ids: Vec<i64> = {
            let mut stmt =
                conn.prepare("SELECT id FROM staged_orders WHERE batch_id = ?1 ORDER BY id ASC")?;
            let ids = stmt
                .query_map(params![batch_id], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };

        ids.into_iter().map(|id| load_order(&conn, id)).collect()
    }

    // ===== Statistics =====

    fn count_batches_by_status(&self, status: BatchStatus) -> StorageResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM batches WHERE status = ?1",
            params![status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_orders_by_status(&self, status: OrderStatus) -> StorageResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM staged_orders WHERE status = ?1",
            params![status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn recent_failed_batches(&self, limit: usize) -> StorageResult<Vec<BatchRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM batches WHERE status = ?1 ORDER BY completed_at DESC, id DESC LIMIT ?2",
            BATCH_COLUMNS
        ))?;

        let rows = stmt
            .query_map(
                params![BatchStatus::Failed.to_db_string(), limit as i64],
                RawBatch::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawBatch::into_record).collect()
    }
}
