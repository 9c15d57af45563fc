//! Work scheduling core
//!
//! This module contains:
//! - The `WorkItemHandler` contract implemented once per source
//! - The two-phase `ProcessingEngine` (bounded fetch, bounded workers)
//! - The `Scheduler` polling loop

mod handler;
mod processing;
mod scheduler;

pub use handler::{WorkItem, WorkItemHandler};
pub use processing::{CycleReport, EngineSettings, HandlerInfo, ProcessingEngine};
pub use scheduler::{Scheduler, SchedulerStats};
