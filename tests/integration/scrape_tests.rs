//! Scraping run behavior against scripted sessions

mod common;

use common::{adapter, bundle, detail_url, list_url, Reply, ScriptedSite};
use ingest_engine::adapter::MarketplaceAdapter;
use ingest_engine::scrape::ScrapeRunner;
use ingest_engine::storage::{NewBatch, SqliteStorage, Storage};
use ingest_engine::{BatchStatus, IngestError, OrderStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn runner(
    site: &ScriptedSite,
    storage: &SqliteStorage,
    delay: Duration,
) -> ScrapeRunner<MarketplaceAdapter> {
    ScrapeRunner::new(
        adapter("shop"),
        Arc::new(site.clone()),
        Arc::new(storage.clone()),
        delay,
    )
}

#[tokio::test]
async fn test_list_page_failure_fails_batch() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let site = ScriptedSite::new();
    site.reply(list_url(), Reply::Status(503));

    let summary = runner(&site, &storage, Duration::ZERO)
        .run_new(&bundle(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.status, BatchStatus::Failed);

    let batch = storage.get_batch(summary.batch_id).unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
    assert!(batch.error_message.unwrap().contains("503"));
    assert!(batch.completed_at.is_some());
    assert!(storage.orders_for_batch(summary.batch_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_unparseable_list_page_fails_batch() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let site = ScriptedSite::new();
    site.reply(list_url(), Reply::Page("<html>Sign in</html>".to_string()));

    let summary = runner(&site, &storage, Duration::ZERO)
        .run_new(&bundle(), &CancellationToken::new())
        .await
        .unwrap();

    let batch = storage.get_batch(summary.batch_id).unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
    assert!(batch.error_message.unwrap().contains("Parse error"));
    assert!(storage.orders_for_batch(summary.batch_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_one_failed_detail_does_not_fail_batch() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let site = ScriptedSite::new();
    site.orders(&["O1", "O2", "O3", "O4", "O5"], 1);
    site.reply(detail_url("O3"), Reply::Status(500));

    let summary = runner(&site, &storage, Duration::ZERO)
        .run_new(&bundle(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!(summary.orders_completed, 4);
    assert_eq!(summary.orders_failed, 1);

    let orders = storage.orders_for_batch(summary.batch_id).unwrap();
    let statuses: Vec<_> = orders.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![
            OrderStatus::Completed,
            OrderStatus::Completed,
            OrderStatus::Failed,
            OrderStatus::Completed,
            OrderStatus::Completed,
        ]
    );

    let failed = &orders[2];
    assert!(!failed.error_message.as_deref().unwrap_or("").is_empty());
    assert_eq!(failed.source_url.as_deref(), Some(detail_url("O3").as_str()));
    assert!(failed.raw_data.contains("O3"));

    assert_eq!(
        storage.get_batch(summary.batch_id).unwrap().status,
        BatchStatus::Completed
    );
}

#[tokio::test]
async fn test_parse_failure_scenario() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let site = ScriptedSite::new();
    site.orders(&["A1", "A2"], 2);
    site.reply(
        detail_url("A2"),
        Reply::Page("<html>this order moved</html>".to_string()),
    );

    let summary = runner(&site, &storage, Duration::ZERO)
        .run_new(&bundle(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.status, BatchStatus::Completed);

    let orders = storage.orders_for_batch(summary.batch_id).unwrap();
    assert_eq!(orders.len(), 2);

    let a1 = &orders[0];
    assert_eq!(a1.status, OrderStatus::Completed);
    assert_eq!(a1.supplier_reference, "A1");
    assert_eq!(a1.currency.as_deref(), Some("USD"));
    assert_eq!(a1.items.len(), 2);
    assert_eq!(a1.items[1].supplier_reference, "A1-2");
    assert_eq!(a1.items[1].quantity, 2);

    let a2 = &orders[1];
    assert_eq!(a2.status, OrderStatus::Failed);
    assert!(a2
        .error_message
        .as_deref()
        .unwrap()
        .to_lowercase()
        .contains("pars"));
    assert!(a2.items.is_empty());
}

#[tokio::test]
async fn test_order_row_exists_before_detail_fetch_completes() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let site = ScriptedSite::new();
    site.orders(&["A1", "A2"], 1);
    site.reply(detail_url("A2"), Reply::Hang);

    let cancel = CancellationToken::new();
    let run = {
        let runner = runner(&site, &storage, Duration::ZERO);
        let cancel = cancel.clone();
        tokio::spawn(async move { runner.run_new(&bundle(), &cancel).await })
    };

    site.reached.notified().await;

    let batches = storage
        .find_batches("shop", BatchStatus::Started, 10)
        .unwrap();
    assert_eq!(batches.len(), 1);
    let batch_id = batches[0].id;

    let orders = storage.orders_for_batch(batch_id).unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].status, OrderStatus::Completed);
    assert_eq!(orders[1].status, OrderStatus::Started);
    assert_eq!(orders[1].supplier_reference, detail_url("A2"));
    assert!(orders[1].raw_data.contains("\"orderId\":\"A2\""));

    cancel.cancel();
    let result = run.await.unwrap();
    assert!(matches!(result, Err(IngestError::Cancelled)));

    // Interrupted work stays visible for the next run
    assert_eq!(
        storage.get_batch(batch_id).unwrap().status,
        BatchStatus::Started
    );
    assert_eq!(
        storage.orders_for_batch(batch_id).unwrap()[1].status,
        OrderStatus::Started
    );
}

#[tokio::test]
async fn test_detail_fetches_are_spaced_by_request_delay() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let site = ScriptedSite::new();
    site.orders(&["A1", "A2", "A3"], 1);

    let summary = runner(&site, &storage, Duration::from_millis(200))
        .run_new(&bundle(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.orders_completed, 3);

    let details: Vec<_> = site
        .calls()
        .into_iter()
        .filter(|(url, _)| url != &list_url())
        .collect();
    assert_eq!(details.len(), 3);

    let elapsed = details[2].1.duration_since(details[0].1);
    assert!(elapsed >= Duration::from_millis(400), "elapsed {:?}", elapsed);
    for pair in details.windows(2) {
        assert!(pair[1].1.duration_since(pair[0].1) >= Duration::from_millis(200));
    }

    // Detail pages are fetched in list order
    let urls: Vec<_> = details.into_iter().map(|(url, _)| url).collect();
    assert_eq!(urls, vec![detail_url("A1"), detail_url("A2"), detail_url("A3")]);
}

#[tokio::test]
async fn test_cancel_during_delay_stops_run() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let site = ScriptedSite::new();
    site.orders(&["A1", "A2"], 1);

    let cancel = CancellationToken::new();
    let runner = runner(&site, &storage, Duration::from_secs(3600));

    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stopper.cancel();
    });

    let result = runner.run_new(&bundle(), &cancel).await;
    assert!(matches!(result, Err(IngestError::Cancelled)));
    assert_eq!(site.called_urls(), vec![list_url(), detail_url("A1")]);
}

#[tokio::test]
async fn test_expired_credentials_fail_batch() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let site = ScriptedSite::new();
    site.orders(&["A1"], 1);

    let mut credentials = bundle();
    credentials.expires_at = Some(chrono::Utc::now() - chrono::Duration::minutes(5));

    let summary = runner(&site, &storage, Duration::ZERO)
        .run_new(&credentials, &CancellationToken::new())
        .await
        .unwrap();

    let batch = storage.get_batch(summary.batch_id).unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
    assert!(batch.error_message.unwrap().contains("expired"));
    assert!(site.calls().is_empty());
}

#[tokio::test]
async fn test_malformed_stored_credentials_fail_batch() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let site = ScriptedSite::new();

    let batch_id = storage
        .create_batch(&NewBatch {
            processor_name: "shop".to_string(),
            credential_payload: "not json".to_string(),
            file_hash: "x".to_string(),
        })
        .unwrap();

    let summary = runner(&site, &storage, Duration::ZERO)
        .run_batch(batch_id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.status, BatchStatus::Failed);
    assert!(storage
        .get_batch(batch_id)
        .unwrap()
        .error_message
        .unwrap()
        .contains("Malformed"));
}

#[tokio::test]
async fn test_template_failure_fails_only_that_order() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let site = ScriptedSite::new();
    site.orders(&["A1", "A2"], 1);

    let adapter = Arc::new(MarketplaceAdapter::new(
        "shop",
        url::Url::parse(common::BASE).unwrap(),
        "/orders",
        "/orders/{orderNumber}",
    ));
    let runner = ScrapeRunner::new(
        adapter,
        Arc::new(site.clone()),
        Arc::new(storage.clone()),
        Duration::ZERO,
    );

    let summary = runner
        .run_new(&bundle(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!(summary.orders_failed, 2);

    let orders = storage.orders_for_batch(summary.batch_id).unwrap();
    assert_eq!(orders[0].supplier_reference, "A1");
    assert_eq!(orders[0].status, OrderStatus::Failed);
    assert!(orders[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("orderNumber"));
    assert_eq!(site.called_urls(), vec![list_url()]);
}

#[tokio::test]
async fn test_terminal_batch_is_not_rerun() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let site = ScriptedSite::new();
    site.orders(&["A1"], 1);

    let runner = runner(&site, &storage, Duration::ZERO);
    let first = runner
        .run_new(&bundle(), &CancellationToken::new())
        .await
        .unwrap();
    let calls = site.calls().len();

    let again = runner
        .run_batch(first.batch_id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(again, first);
    assert_eq!(site.calls().len(), calls);
}

#[tokio::test]
async fn test_started_batch_resumes_without_refetching_completed_orders() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let site = ScriptedSite::new();
    site.orders(&["A1", "A2"], 1);

    let batch_id = storage
        .create_batch(&NewBatch {
            processor_name: "shop".to_string(),
            credential_payload: bundle().to_json().unwrap(),
            file_hash: "h".to_string(),
        })
        .unwrap();
    storage
        .update_batch_status(batch_id, BatchStatus::Started, None)
        .unwrap();

    let a1 = detail_url("A1");
    let mut done = storage
        .create_order(batch_id, &a1, Some(&a1), "{}")
        .unwrap();
    done.status = OrderStatus::Completed;
    storage.save_order(&done).unwrap();

    let a2 = detail_url("A2");
    storage.create_order(batch_id, &a2, Some(&a2), "{}").unwrap();

    let summary = runner(&site, &storage, Duration::ZERO)
        .run_batch(batch_id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!(summary.orders_completed, 2);
    assert_eq!(site.called_urls(), vec![list_url(), a2]);

    let orders = storage.orders_for_batch(batch_id).unwrap();
    assert_eq!(orders.len(), 2);
    assert!(orders.iter().all(|o| o.status == OrderStatus::Completed));
}

/// Queues a batch for "shop" and moves it to `Started`
fn started_batch(storage: &SqliteStorage) -> i64 {
    let batch_id = storage
        .create_batch(&NewBatch {
            processor_name: "shop".to_string(),
            credential_payload: bundle().to_json().unwrap(),
            file_hash: "h".to_string(),
        })
        .unwrap();
    storage
        .update_batch_status(batch_id, BatchStatus::Started, None)
        .unwrap();
    batch_id
}

#[tokio::test]
async fn test_resume_reuses_orders_whose_template_failed() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let site = ScriptedSite::new();
    site.orders(&["A1", "A2"], 1);

    let batch_id = started_batch(&storage);

    // An earlier attempt recorded A1 before stopping
    let mut earlier = storage.create_order(batch_id, "A1", None, "{}").unwrap();
    earlier.fail("Template references missing field `orderNumber`");
    storage.save_order(&earlier).unwrap();

    let runner = ScrapeRunner::new(
        Arc::new(MarketplaceAdapter::new(
            "shop",
            url::Url::parse(common::BASE).unwrap(),
            "/orders",
            "/orders/{orderNumber}",
        )),
        Arc::new(site.clone()),
        Arc::new(storage.clone()),
        Duration::ZERO,
    );

    let summary = runner
        .run_batch(batch_id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!(summary.orders_failed, 2);

    let orders = storage.orders_for_batch(batch_id).unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].id, earlier.id);
    assert_eq!(orders[0].supplier_reference, "A1");
    assert_eq!(orders[1].supplier_reference, "A2");
    assert!(orders.iter().all(|o| o.status == OrderStatus::Failed));
}

#[tokio::test]
async fn test_resume_does_not_wait_for_skipped_orders() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let site = ScriptedSite::new();
    site.orders(&["A1", "A2", "A3"], 1);

    let batch_id = started_batch(&storage);
    for id in ["A1", "A2"] {
        let url = detail_url(id);
        let mut done = storage
            .create_order(batch_id, &url, Some(&url), "{}")
            .unwrap();
        done.status = OrderStatus::Completed;
        storage.save_order(&done).unwrap();
    }

    // A3 is the first detail actually fetched, so nothing waits out the delay
    let resumed = runner(&site, &storage, Duration::from_secs(3600));
    let cancel = CancellationToken::new();
    let run = resumed.run_batch(batch_id, &cancel);
    let summary = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("resumed run waited on skipped orders")
        .unwrap();

    assert_eq!(summary.orders_completed, 3);
    assert_eq!(site.called_urls(), vec![list_url(), detail_url("A3")]);
}
