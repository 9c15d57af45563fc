//! Ingest-Engine: background ingestion of supplier order history
//!
//! This crate polls for queued scraping batches, runs each one against its
//! supplier site with an authenticated session, and writes what it finds
//! into a staging database for later review.

pub mod adapter;
pub mod config;
pub mod engine;
pub mod report;
pub mod scrape;
pub mod session;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for ingestion operations
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] session::TransportError),

    #[error(transparent)]
    Parse(#[from] adapter::ParseError),

    #[error(transparent)]
    Template(#[from] adapter::TemplateError),

    #[error("Credential error: {0}")]
    Credential(#[from] session::CredentialError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Cancelled")]
    Cancelled,
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

// Re-export commonly used types
pub use adapter::{OrderSummary, SourceAdapter};
pub use config::Config;
pub use engine::{ProcessingEngine, Scheduler, WorkItemHandler};
pub use scrape::{BatchHandler, ScrapeRunner};
pub use session::{CredentialBundle, Session, SessionFactory};
pub use state::{BatchStatus, OrderStatus};
