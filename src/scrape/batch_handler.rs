//! Engine handler that turns queued batches into scraping runs

use crate::adapter::SourceAdapter;
use crate::engine::WorkItemHandler;
use crate::scrape::runner::ScrapeRunner;
use crate::session::SessionFactory;
use crate::state::BatchStatus;
use crate::storage::{BatchRecord, Storage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Processes the queued batches of one adapter
///
/// Each batch is run with its own storage session so concurrent workers
/// never share a connection.
pub struct BatchHandler<A: SourceAdapter> {
    adapter: Arc<A>,
    sessions: Arc<dyn SessionFactory>,
    storage: Arc<dyn Storage>,
    request_delay: Duration,
}

impl<A: SourceAdapter> BatchHandler<A> {
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

    /// Batches are tagged with the adapter's name
    pub fn processor_name(&self) -> &str {
        self.adapter.name()
    }

    /// Fails batches that have sat in `Started` for longer than `grace`
    ///
    /// Run once at startup, before the scheduler, to clear out work
    /// abandoned by a previous process.
    pub fn recover_stale(&self, grace: Duration) -> crate::Result<usize> {
        let cutoff = chrono::Duration::from_std(grace)
            .ok()
            .and_then(|grace| Utc::now().checked_sub_signed(grace))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let message = format!(
            "abandoned: still started after {}s without completing",
            grace.as_secs()
        );

        let recovered =
            self.storage
                .fail_stale_batches(self.processor_name(), cutoff, &message)?;

        if recovered > 0 {
            tracing::warn!(
                "Marked {} stale batches of {} as failed",
                recovered,
                self.processor_name()
            );
        }
        Ok(recovered)
    }

    fn runner(&self) -> crate::Result<ScrapeRunner<A>> {
        Ok(ScrapeRunner::new(
            Arc::clone(&self.adapter),
            Arc::clone(&self.sessions),
            self.storage.open_session()?,
            self.request_delay,
        ))
    }
}

#[async_trait]
impl<A: SourceAdapter> WorkItemHandler for BatchHandler<A> {
    type Item = BatchRecord;

    async fn fetch_next(&self, max_items: usize) -> crate::Result<Vec<BatchRecord>> {
        Ok(self
            .storage
            .find_batches(self.processor_name(), BatchStatus::Queued, max_items)?)
    }

    async fn process(&self, batch: BatchRecord, cancel: CancellationToken) -> crate::Result<()> {
        let summary = self.runner()?.run_batch(batch.id, &cancel).await?;

        if summary.status == BatchStatus::Failed {
            tracing::warn!("Batch {} of {} failed", batch.id, self.processor_name());
        }
        Ok(())
    }
}
