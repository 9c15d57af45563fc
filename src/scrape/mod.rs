//! Scraping runs and their wiring into the engine
//!
//! This module contains:
//! - `ScrapeRunner`, the per-batch state machine
//! - `BatchHandler`, which feeds queued batches to runners
//! - `build_engine`, which assembles handlers from configuration

mod batch_handler;
mod registry;
mod runner;

pub use batch_handler::BatchHandler;
pub use registry::{build_engine, session_factory, submit_credentials, EngineParts, SubmitOutcome};
pub use runner::{RunSummary, ScrapeRunner};
