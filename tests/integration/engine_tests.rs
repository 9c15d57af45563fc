//! Engine cycles over real batch handlers and the staging database

mod common;

use async_trait::async_trait;
use common::{adapter, bundle, ScriptedSite};
use ingest_engine::adapter::MarketplaceAdapter;
use ingest_engine::engine::{EngineSettings, ProcessingEngine, Scheduler, WorkItemHandler};
use ingest_engine::scrape::{submit_credentials, BatchHandler, SubmitOutcome};
use ingest_engine::storage::{BatchRecord, SqliteStorage, Storage};
use ingest_engine::{BatchStatus, OrderStatus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn handler(
    name: &str,
    site: &ScriptedSite,
    storage: &SqliteStorage,
) -> BatchHandler<MarketplaceAdapter> {
    BatchHandler::new(
        adapter(name),
        Arc::new(site.clone()),
        Arc::new(storage.clone()),
        Duration::ZERO,
    )
}

/// Queues `count` distinct batches for `processor`
fn queue_batches(storage: &SqliteStorage, processor: &str, count: usize) -> Vec<i64> {
    (0..count)
        .map(|n| {
            let mut credentials = bundle();
            credentials
                .metadata
                .insert("capture".to_string(), n.to_string());
            let payload = credentials.to_json().unwrap();
            match submit_credentials(storage, processor, &payload).unwrap() {
                SubmitOutcome::Queued { batch_id } => batch_id,
                other => panic!("unexpected {:?}", other),
            }
        })
        .collect()
}

fn count(storage: &SqliteStorage, status: BatchStatus) -> u64 {
    storage.count_batches_by_status(status).unwrap()
}

fn engine(worker_count: usize) -> ProcessingEngine {
    ProcessingEngine::new(EngineSettings {
        worker_count,
        queue_capacity: 2,
    })
}

/// Wraps a batch handler and panics on one chosen batch
struct PanickingHandler {
    inner: BatchHandler<MarketplaceAdapter>,
    panic_on: i64,
}

#[async_trait]
impl WorkItemHandler for PanickingHandler {
    type Item = BatchRecord;

    async fn fetch_next(&self, max_items: usize) -> ingest_engine::Result<Vec<BatchRecord>> {
        self.inner.fetch_next(max_items).await
    }

    async fn process(
        &self,
        batch: BatchRecord,
        cancel: CancellationToken,
    ) -> ingest_engine::Result<()> {
        if batch.id == self.panic_on {
            panic!("handler crashed on batch {}", batch.id);
        }
        self.inner.process(batch, cancel).await
    }
}

/// Ignores the cap it is given and returns everything queued
struct GreedyHandler {
    inner: BatchHandler<MarketplaceAdapter>,
    seen_cap: AtomicUsize,
}

#[async_trait]
impl WorkItemHandler for GreedyHandler {
    type Item = BatchRecord;

    async fn fetch_next(&self, max_items: usize) -> ingest_engine::Result<Vec<BatchRecord>> {
        self.seen_cap.store(max_items, Ordering::SeqCst);
        self.inner.fetch_next(usize::MAX >> 1).await
    }

    async fn process(
        &self,
        batch: BatchRecord,
        cancel: CancellationToken,
    ) -> ingest_engine::Result<()> {
        self.inner.process(batch, cancel).await
    }
}

#[tokio::test]
async fn test_cycle_takes_at_most_cap_batches() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let site = ScriptedSite::new();
    site.orders(&["A1"], 1);
    queue_batches(&storage, "shop", 10);

    let mut engine = engine(4);
    engine
        .register("shop", Arc::new(handler("shop", &site, &storage)), 3, "ingestion")
        .unwrap();

    let report = engine.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.fetched, 3);
    assert_eq!(report.processed, 3);
    assert_eq!(count(&storage, BatchStatus::Completed), 3);
    assert_eq!(count(&storage, BatchStatus::Queued), 7);

    // Remaining batches drain over later cycles
    for _ in 0..3 {
        engine.run_cycle(&CancellationToken::new()).await.unwrap();
    }
    assert_eq!(count(&storage, BatchStatus::Completed), 10);
    assert_eq!(
        storage.count_orders_by_status(OrderStatus::Completed).unwrap(),
        10
    );
}

#[tokio::test]
async fn test_engine_truncates_greedy_handler() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let site = ScriptedSite::new();
    site.orders(&["A1"], 0);
    queue_batches(&storage, "shop", 6);

    let greedy = Arc::new(GreedyHandler {
        inner: handler("shop", &site, &storage),
        seen_cap: AtomicUsize::new(0),
    });

    let mut engine = engine(2);
    engine.register("shop", greedy.clone(), 2, "ingestion").unwrap();

    let report = engine.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(greedy.seen_cap.load(Ordering::SeqCst), 2);
    assert_eq!(report.fetched, 2);
    assert_eq!(report.truncated, 4);
    assert_eq!(count(&storage, BatchStatus::Completed), 2);
    assert_eq!(count(&storage, BatchStatus::Queued), 4);
}

#[tokio::test]
async fn test_crashing_item_does_not_affect_others() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let site = ScriptedSite::new();
    site.orders(&["A1", "A2"], 1);
    let ids = queue_batches(&storage, "shop", 10);

    let crashing = Arc::new(PanickingHandler {
        inner: handler("shop", &site, &storage),
        panic_on: ids[4],
    });

    let mut engine = engine(3);
    engine.register("shop", crashing, 10, "ingestion").unwrap();

    let report = engine.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.fetched, 10);
    assert_eq!(report.processed, 9);
    assert_eq!(report.failed, 1);

    for (n, id) in ids.iter().enumerate() {
        let status = storage.get_batch(*id).unwrap().status;
        if n == 4 {
            assert_eq!(status, BatchStatus::Queued);
        } else {
            assert_eq!(status, BatchStatus::Completed, "batch {}", id);
        }
    }

    // A later cycle still runs
    let report = engine.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.fetched, 1);
    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn test_handlers_are_capped_independently() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let site = ScriptedSite::new();
    site.orders(&["A1"], 1);
    queue_batches(&storage, "big", 20);
    queue_batches(&storage, "small", 2);

    let mut engine = engine(2);
    engine
        .register("big", Arc::new(handler("big", &site, &storage)), 2, "ingestion")
        .unwrap();
    engine
        .register("small", Arc::new(handler("small", &site, &storage)), 2, "ingestion")
        .unwrap();

    let report = engine.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.fetched, 4);
    assert!(storage
        .find_batches("small", BatchStatus::Queued, 10)
        .unwrap()
        .is_empty());
    assert_eq!(
        storage.find_batches("big", BatchStatus::Queued, 100).unwrap().len(),
        18
    );
}

#[tokio::test]
async fn test_failed_batches_are_terminal_and_not_refetched() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    // No list page scripted: every run fails at the list page
    let site = ScriptedSite::new();
    queue_batches(&storage, "shop", 3);

    let mut engine = engine(2);
    engine
        .register("shop", Arc::new(handler("shop", &site, &storage)), 5, "ingestion")
        .unwrap();

    let report = engine.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.processed, 3);
    assert_eq!(count(&storage, BatchStatus::Failed), 3);
    assert_eq!(storage.count_orders_by_status(OrderStatus::Started).unwrap(), 0);

    let report = engine.run_cycle(&CancellationToken::new()).await.unwrap();
    assert!(report.is_idle());
}

#[tokio::test]
async fn test_stale_recovery_fails_abandoned_batches() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let site = ScriptedSite::new();
    let ids = queue_batches(&storage, "shop", 2);

    storage
        .update_batch_status(ids[0], BatchStatus::Started, None)
        .unwrap();
    let order = storage
        .create_order(ids[0], "https://shop.example.com/orders/A1", None, "{}")
        .unwrap();

    let handler = handler("shop", &site, &storage);
    tokio::time::sleep(Duration::from_millis(5)).await;
    let recovered = handler.recover_stale(Duration::ZERO).unwrap();

    assert_eq!(recovered, 1);
    let batch = storage.get_batch(ids[0]).unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
    assert!(batch.error_message.unwrap().contains("abandoned"));
    assert_eq!(
        storage.get_order(order.id).unwrap().status,
        OrderStatus::Failed
    );

    // Queued batches are untouched
    assert_eq!(storage.get_batch(ids[1]).unwrap().status, BatchStatus::Queued);

    // A generous grace period leaves recent work alone
    storage
        .update_batch_status(ids[1], BatchStatus::Started, None)
        .unwrap();
    assert_eq!(handler.recover_stale(Duration::from_secs(3600)).unwrap(), 0);
}

#[tokio::test]
async fn test_scheduler_drains_queue_and_stops_on_cancel() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let site = ScriptedSite::new();
    site.orders(&["A1", "A2"], 1);
    queue_batches(&storage, "shop", 5);

    let mut engine = engine(2);
    engine
        .register("shop", Arc::new(handler("shop", &site, &storage)), 2, "ingestion")
        .unwrap();

    let scheduler = Scheduler::new(Arc::new(engine), Duration::from_millis(20));
    let cancel = CancellationToken::new();

    let watcher = {
        let storage = storage.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            while storage.count_batches_by_status(BatchStatus::Completed).unwrap() < 5 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            cancel.cancel();
        })
    };

    let stats = tokio::time::timeout(Duration::from_secs(10), scheduler.run(cancel))
        .await
        .expect("scheduler did not stop");
    watcher.await.unwrap();

    assert!(stats.cycles >= 3);
    assert_eq!(stats.failed_cycles, 0);
    assert_eq!(stats.items_processed, 5);
    assert_eq!(count(&storage, BatchStatus::Completed), 5);
    assert_eq!(
        storage.count_orders_by_status(OrderStatus::Completed).unwrap(),
        10
    );
}
