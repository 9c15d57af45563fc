//! State module for tracking ingestion progress
//!
//! # Components
//!
//! - `BatchStatus`: lifecycle of one scraping run (queued, started, completed, failed)
//! - `OrderStatus`: lifecycle of one staged order inside a batch

mod batch_status;
mod order_status;

pub use batch_status::BatchStatus;
pub use order_status::OrderStatus;
