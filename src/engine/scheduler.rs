//! Polling loop that drives the processing engine
//!
//! This module handles:
//! - Running exactly one engine cycle per tick
//! - Logging cycle-level failures and panics without stopping the loop
//! - Stopping on cancellation once the in-flight cycle has returned

use crate::engine::processing::{panic_message, CycleReport, ProcessingEngine};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Totals across every cycle a scheduler has run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub items_processed: u64,
    pub items_failed: u64,
}

impl SchedulerStats {
    fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.items_processed += report.processed as u64;
        self.items_failed += report.failed as u64;
    }
}

/// Owns the engine and ticks it until cancelled
pub struct Scheduler {
    engine: Arc<ProcessingEngine>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(engine: Arc<ProcessingEngine>, poll_interval: Duration) -> Self {
        Self {
            engine,
            poll_interval,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Runs cycles until `cancel` fires
    ///
    /// The first cycle starts immediately. A cycle that overruns the
    /// interval delays the next tick rather than bunching ticks up.
    pub async fn run(&self, cancel: CancellationToken) -> SchedulerStats {
        let mut stats = SchedulerStats::default();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Scheduler started, polling every {:?}",
            self.poll_interval
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.tick(&cancel, &mut stats).await;

            if cancel.is_cancelled() {
                break;
            }
        }

        tracing::info!(
            "Scheduler stopped after {} cycles ({} items processed, {} failed)",
            stats.cycles,
            stats.items_processed,
            stats.items_failed
        );
        stats
    }

    /// Runs a single cycle, logging rather than propagating its failure
    pub async fn tick(&self, cancel: &CancellationToken, stats: &mut SchedulerStats) {
        let outcome = AssertUnwindSafe(self.engine.run_cycle(cancel))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(report)) => {
                if !report.is_idle() {
                    tracing::info!(
                        "Cycle: {} fetched, {} processed, {} failed, {} cancelled",
                        report.fetched,
                        report.processed,
                        report.failed,
                        report.cancelled
                    );
                }
                stats.record(&report);
            }
            Ok(Err(e)) => {
                tracing::error!("Engine cycle failed: {}", e);
                stats.cycles += 1;
                stats.failed_cycles += 1;
            }
            Err(panic) => {
                tracing::error!(
                    "Engine cycle panicked: {}",
                    panic_message(panic.as_ref())
                );
                stats.cycles += 1;
                stats.failed_cycles += 1;
            }
        }
    }
}
