//! One scraping run of one adapter over one batch
//!
//! Failures are split in two. Anything that stops the run from making
//! progress at all (credentials, session, list page) fails the batch. Anything
//! that only concerns one order fails that order and the loop moves on.

use crate::adapter::{OrderSummary, SourceAdapter};
use crate::session::{payload_hash, CredentialBundle, Session, SessionFactory};
use crate::state::{BatchStatus, OrderStatus};
use crate::storage::{NewBatch, StagedOrder, Storage};
use crate::IngestError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Summary fields tried, in order, when an order has no usable URL
const REFERENCE_FIELDS: [&str; 4] = ["orderId", "orderNumber", "id", "reference"];

/// Outcome of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub batch_id: i64,
    pub status: BatchStatus,
    pub orders_completed: usize,
    pub orders_failed: usize,
}

/// Drives one adapter through the list page and every detail page
pub struct ScrapeRunner<A: SourceAdapter> {
    adapter: Arc<A>,
    sessions: Arc<dyn SessionFactory>,
    storage: Arc<dyn Storage>,
    request_delay: Duration,
}

impl<A: SourceAdapter> ScrapeRunner<A> {
    pub fn new(
        adapter: Arc<A>,
        sessions: Arc<dyn SessionFactory>,
        storage: Arc<dyn Storage>,
        request_delay: Duration,
    ) -> Self {
        Self {
            adapter,
            sessions,
            storage,
            request_delay,
        }
    }

    /// Creates a `Queued` batch for `credentials` and runs it
    pub async fn run_new(
        &self,
        credentials: &CredentialBundle,
        cancel: &CancellationToken,
    ) -> crate::Result<RunSummary> {
        let payload = credentials.to_json()?;
        let batch_id = self.storage.create_batch(&NewBatch {
            processor_name: self.adapter.name().to_string(),
            file_hash: payload_hash(&payload),
            credential_payload: payload,
        })?;

        self.run_batch(batch_id, cancel).await
    }

    /// Runs an existing batch
    ///
    /// Terminal batches are left untouched. A batch already `Started`
    /// resumes: orders it completed earlier are skipped and its other
    /// orders are retried in place.
    ///
    /// Returns `Err(IngestError::Cancelled)` if cancelled mid-run; the batch
    /// and any in-flight order are then left `Started`.
    pub async fn run_batch(
        &self,
        batch_id: i64,
        cancel: &CancellationToken,
    ) -> crate::Result<RunSummary> {
        let batch = self.storage.get_batch(batch_id)?;

        if batch.status.is_terminal() {
            tracing::info!(
                "Batch {} is already {}, nothing to do",
                batch_id,
                batch.status
            );
            return self.summarize(batch_id, batch.status);
        }

        if batch.status == BatchStatus::Queued {
            self.storage
                .update_batch_status(batch_id, BatchStatus::Started, None)?;
        }

        tracing::info!(
            "Starting batch {} for {}",
            batch_id,
            self.adapter.name()
        );

        let session = match self.open_session(&batch.credential_payload) {
            Ok(session) => session,
            Err(e) => return self.fail_batch(batch_id, e),
        };

        let list_url = match self.adapter.list_url() {
            Ok(url) => url,
            Err(e) => return self.fail_batch(batch_id, e.into()),
        };
        let list_page = match fetch(session.as_ref(), &list_url, cancel).await {
            Ok(page) => page,
            Err(IngestError::Cancelled) => return Err(IngestError::Cancelled),
            Err(e) => return self.fail_batch(batch_id, e),
        };

        let summaries = match self.adapter.parse_list(&list_page) {
            Ok(summaries) => summaries,
            Err(e) => return self.fail_batch(batch_id, e.into()),
        };

        let mut existing = ExistingOrders::load(self.storage.as_ref(), batch_id)?;

        let mut completed = 0;
        let mut failed = 0;
        let mut fetched_any = false;

        for (index, summary) in summaries.enumerate() {
            let url = match self.adapter.detail_url(&summary) {
                Ok(url) => url,
                Err(e) => {
                    let reference = fallback_reference(&summary, index);
                    tracing::warn!("Order {} in batch {}: {}", reference, batch_id, e);

                    let mut order = match existing.by_reference.remove(&reference) {
                        Some(order) => order,
                        None => self.storage.create_order(
                            batch_id,
                            &reference,
                            None,
                            &summary.raw_data,
                        )?,
                    };
                    order.fail(e.to_string());
                    self.storage.save_order(&order)?;
                    failed += 1;
                    continue;
                }
            };

            let previous = match existing.by_url.remove(&url) {
                Some(order) if order.status == OrderStatus::Completed => {
                    tracing::debug!("Skipping completed order {}", url);
                    completed += 1;
                    continue;
                }
                previous => previous,
            };

            // Only actual detail fetches are spaced apart
            if fetched_any {
                self.pause(cancel).await?;
            }
            fetched_any = true;

            let mut order = match previous {
                Some(order) => order,
                None => self
                    .storage
                    .create_order(batch_id, &url, Some(&url), &summary.raw_data)?,
            };

            match self
                .scrape_order(session.as_ref(), &url, &summary, &mut order, cancel)
                .await
            {
                Ok(()) => {
                    order.status = OrderStatus::Completed;
                    order.error_message = None;
                    self.storage.save_order(&order)?;
                    completed += 1;
                }
                Err(IngestError::Cancelled) => {
                    tracing::info!(
                        "Batch {} cancelled while fetching {}; order {} left started",
                        batch_id,
                        url,
                        order.id
                    );
                    return Err(IngestError::Cancelled);
                }
                Err(e) => {
                    tracing::warn!("Order {} in batch {} failed: {}", url, batch_id, e);
                    order.fail(e.to_string());
                    self.storage.save_order(&order)?;
                    failed += 1;
                }
            }
        }

        self.storage
            .update_batch_status(batch_id, BatchStatus::Completed, None)?;

        tracing::info!(
            "Batch {} completed: {} orders completed, {} failed",
            batch_id,
            completed,
            failed
        );

        Ok(RunSummary {
            batch_id,
            status: BatchStatus::Completed,
            orders_completed: completed,
            orders_failed: failed,
        })
    }

    fn open_session(&self, credential_payload: &str) -> crate::Result<Box<dyn Session>> {
        let credentials = CredentialBundle::from_json(credential_payload)?;
        self.sessions.create_session(&credentials)
    }

    async fn scrape_order(
        &self,
        session: &dyn Session,
        url: &str,
        summary: &OrderSummary,
        order: &mut StagedOrder,
        cancel: &CancellationToken,
    ) -> crate::Result<()> {
        let page = fetch(session, url, cancel).await?;
        let detail = self.adapter.parse_detail(&page, summary)?;

        order.items.clear();
        self.adapter.map_to_staging(order, detail);
        Ok(())
    }

    /// Waits out the inter-request delay
    async fn pause(&self, cancel: &CancellationToken) -> crate::Result<()> {
        if self.request_delay.is_zero() {
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IngestError::Cancelled),
            _ = tokio::time::sleep(self.request_delay) => Ok(()),
        }
    }

    fn fail_batch(&self, batch_id: i64, error: IngestError) -> crate::Result<RunSummary> {
        let message = error.to_string();
        tracing::warn!("Batch {} failed: {}", batch_id, message);

        self.storage
            .update_batch_status(batch_id, BatchStatus::Failed, Some(&message))?;

        self.summarize(batch_id, BatchStatus::Failed)
    }

    fn summarize(&self, batch_id: i64, status: BatchStatus) -> crate::Result<RunSummary> {
        let orders = self.storage.orders_for_batch(batch_id)?;
        let count = |wanted: OrderStatus| orders.iter().filter(|o| o.status == wanted).count();

        Ok(RunSummary {
            batch_id,
            status,
            orders_completed: count(OrderStatus::Completed),
            orders_failed: count(OrderStatus::Failed),
        })
    }
}

async fn fetch(
    session: &dyn Session,
    url: &str,
    cancel: &CancellationToken,
) -> crate::Result<String> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(IngestError::Cancelled),
        page = session.fetch_page(url) => Ok(page?),
    }
}

/// Orders recorded by an earlier attempt at the same batch
///
/// Orders that reached a detail fetch are matched by their URL. Orders whose
/// URL could not be built have none and are matched by fallback reference.
struct ExistingOrders {
    by_url: HashMap<String, StagedOrder>,
    by_reference: HashMap<String, StagedOrder>,
}

impl ExistingOrders {
    fn load(storage: &dyn Storage, batch_id: i64) -> crate::Result<Self> {
        let mut by_url = HashMap::new();
        let mut by_reference = HashMap::new();

        for order in storage.orders_for_batch(batch_id)? {
            match order.source_url.clone() {
                Some(url) => by_url.insert(url, order),
                None => by_reference.insert(order.supplier_reference.clone(), order),
            };
        }

        Ok(Self {
            by_url,
            by_reference,
        })
    }
}

fn fallback_reference(summary: &OrderSummary, index: usize) -> String {
    REFERENCE_FIELDS
        .iter()
        .find_map(|name| summary.field(name))
        .map(str::to_string)
        .unwrap_or_else(|| format!("order #{}", index + 1))
}
