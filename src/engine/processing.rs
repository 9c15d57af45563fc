//! Two-phase processing engine
//!
//! One cycle:
//! 1. Fetch: every registered handler is asked for up to its per-cycle cap,
//!    concurrently. Results are truncated to the cap and pushed into one
//!    bounded queue; a full queue blocks the producer.
//! 2. Process: a fixed pool of workers drains the queue. A failing or
//!    panicking item is logged and counted, nothing more.
//!
//! The cycle ends once every handler has been fetched from, the queue is
//! empty and every worker is idle.

use crate::engine::handler::{DynHandler, Erased, WorkItem, WorkItemHandler};
use crate::IngestError;
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Sizing of the worker pool and the shared queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub worker_count: usize,
    pub queue_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 64,
        }
    }
}

/// Registry entry as shown to operators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerInfo {
    pub name: String,
    pub max_items_per_cycle: usize,
    pub purpose: String,
}

struct Registration {
    handler: Arc<dyn DynHandler>,
    max_items_per_cycle: usize,
    purpose: String,
}

/// What happened during one engine cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Items enqueued, after truncation
    pub fetched: usize,

    /// Items dropped because a handler exceeded its cap
    pub truncated: usize,

    /// Items whose processing returned `Ok`
    pub processed: usize,

    /// Items whose processing returned an error or panicked
    pub failed: usize,

    /// Items whose processing stopped on cancellation
    pub cancelled: usize,

    /// Handlers whose fetch failed
    pub fetch_errors: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.fetched == 0 && self.fetch_errors == 0
    }
}

#[derive(Default)]
struct Counters {
    processed: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
}

enum Outcome {
    Processed,
    Failed,
    Cancelled,
}

/// Registry of named handlers plus the machinery to run cycles over them
pub struct ProcessingEngine {
    settings: EngineSettings,
    handlers: BTreeMap<String, Registration>,
    next_id: AtomicU64,
}

impl ProcessingEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings: EngineSettings {
                worker_count: settings.worker_count.max(1),
                queue_capacity: settings.queue_capacity.max(1),
            },
            handlers: BTreeMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Registers `handler` under `name`
    ///
    /// Names must be unique and the cap at least 1.
    pub fn register<H: WorkItemHandler>(
        &mut self,
        name: impl Into<String>,
        handler: Arc<H>,
        max_items_per_cycle: usize,
        purpose: impl Into<String>,
    ) -> crate::Result<()> {
        let name = name.into();

        if max_items_per_cycle == 0 {
            return Err(IngestError::Handler(format!(
                "handler {} must allow at least one item per cycle",
                name
            )));
        }
        if self.handlers.contains_key(&name) {
            return Err(IngestError::Handler(format!(
                "handler {} is already registered",
                name
            )));
        }

        let purpose = purpose.into();
        tracing::debug!(
            "Registered handler {} (cap {}, purpose {})",
            name,
            max_items_per_cycle,
            purpose
        );

        self.handlers.insert(
            name,
            Registration {
                handler: Arc::new(Erased(handler)),
                max_items_per_cycle,
                purpose,
            },
        );
        Ok(())
    }

    /// Registered handlers, ordered by name
    pub fn handlers(&self) -> Vec<HandlerInfo> {
        self.handlers
            .iter()
            .map(|(name, reg)| HandlerInfo {
                name: name.clone(),
                max_items_per_cycle: reg.max_items_per_cycle,
                purpose: reg.purpose.clone(),
            })
            .collect()
    }

    /// Runs one fetch phase and one process phase to completion
    ///
    /// Once `cancel` fires, no further items are dequeued and in-flight
    /// items are handed the same token so their I/O stops.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> crate::Result<CycleReport> {
        let mut report = CycleReport::default();

        let (tx, rx) = mpsc::channel::<WorkItem>(self.settings.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let routes: Arc<HashMap<String, Arc<dyn DynHandler>>> = Arc::new(
            self.handlers
                .iter()
                .map(|(name, reg)| (name.clone(), Arc::clone(&reg.handler)))
                .collect(),
        );
        let counters = Arc::new(Counters::default());

        // Workers first, so a full queue drains while handlers are still fetching
        let mut workers = JoinSet::new();
        for worker_id in 0..self.settings.worker_count {
            let rx = Arc::clone(&rx);
            let routes = Arc::clone(&routes);
            let counters = Arc::clone(&counters);
            let cancel = cancel.clone();

            workers.spawn(async move {
                loop {
                    let next = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            item = rx.recv() => item,
                        }
                    };
                    let Some(item) = next else { break };

                    let counter = match process_item(worker_id, &routes, item, &cancel).await {
                        Outcome::Processed => &counters.processed,
                        Outcome::Failed => &counters.failed,
                        Outcome::Cancelled => &counters.cancelled,
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            });
        }

        let fetches = self.handlers.iter().map(|(name, reg)| {
            let tx = tx.clone();
            async move {
                self.fetch_into_queue(name, reg, &tx, cancel).await
            }
        });
        for result in join_all(fetches).await {
            match result {
                Ok((enqueued, truncated)) => {
                    report.fetched += enqueued;
                    report.truncated += truncated;
                }
                Err(()) => report.fetch_errors += 1,
            }
        }
        drop(tx);

        let mut worker_failure = None;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Engine worker stopped abnormally: {}", e);
                worker_failure = Some(e.to_string());
            }
        }

        report.processed = counters.processed.load(Ordering::Relaxed);
        report.failed = counters.failed.load(Ordering::Relaxed);
        report.cancelled = counters.cancelled.load(Ordering::Relaxed);

        if let Some(message) = worker_failure {
            return Err(IngestError::Handler(format!(
                "engine worker failed: {}",
                message
            )));
        }

        tracing::debug!(
            "Cycle done: {} fetched, {} processed, {} failed",
            report.fetched,
            report.processed,
            report.failed
        );
        Ok(report)
    }

    /// Fetches from one handler and enqueues its items
    ///
    /// Returns the number enqueued and the number truncated.
    async fn fetch_into_queue(
        &self,
        name: &str,
        reg: &Registration,
        tx: &mpsc::Sender<WorkItem>,
        cancel: &CancellationToken,
    ) -> Result<(usize, usize), ()> {
        let cap = reg.max_items_per_cycle;
        let fetched = AssertUnwindSafe(reg.handler.fetch_erased(cap))
            .catch_unwind()
            .await;

        let mut payloads = match fetched {
            Ok(Ok(payloads)) => payloads,
            Ok(Err(e)) => {
                tracing::error!("Fetch failed for handler {}: {}", name, e);
                return Err(());
            }
            Err(panic) => {
                tracing::error!(
                    "Fetch panicked for handler {}: {}",
                    name,
                    panic_message(panic.as_ref())
                );
                return Err(());
            }
        };

        let mut truncated = 0;
        if payloads.len() > cap {
            tracing::warn!(
                handler = name,
                cap,
                returned = payloads.len(),
                "Handler returned more items than its per-cycle cap; truncating"
            );
            truncated = payloads.len() - cap;
            payloads.truncate(cap);
        }

        let mut enqueued = 0;
        for payload in payloads {
            let item = WorkItem {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                handler_name: name.to_string(),
                payload,
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sent = tx.send(item) => {
                    if sent.is_err() {
                        break;
                    }
                    enqueued += 1;
                }
            }
        }

        Ok((enqueued, truncated))
    }
}

async fn process_item(
    worker_id: usize,
    routes: &HashMap<String, Arc<dyn DynHandler>>,
    item: WorkItem,
    cancel: &CancellationToken,
) -> Outcome {
    let Some(handler) = routes.get(&item.handler_name) else {
        tracing::error!(
            "Work item {} names unknown handler {}",
            item.id,
            item.handler_name
        );
        return Outcome::Failed;
    };

    tracing::trace!(
        "Worker {} processing item {} for {}",
        worker_id,
        item.id,
        item.handler_name
    );

    let result = AssertUnwindSafe(handler.process_erased(item.payload, cancel.clone()))
        .catch_unwind()
        .await;

    match result {
        Ok(Ok(())) => Outcome::Processed,
        Ok(Err(IngestError::Cancelled)) => {
            tracing::info!("Work item {} ({}) cancelled", item.id, item.handler_name);
            Outcome::Cancelled
        }
        Ok(Err(e)) => {
            tracing::error!(
                "Work item {} ({}) failed: {}",
                item.id,
                item.handler_name,
                e
            );
            Outcome::Failed
        }
        Err(panic) => {
            tracing::error!(
                "Work item {} ({}) panicked: {}",
                item.id,
                item.handler_name,
                panic_message(panic.as_ref())
            );
            Outcome::Failed
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
