//! Configuration module for the ingestion engine
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use ingest_engine::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("engine.toml")).unwrap();
//! for handler in &config.handlers {
//!     println!("{} takes {} batches per cycle", handler.name, handler.max_items_per_cycle);
//! }
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, EngineConfig, HandlerConfig, HeaderEntry, HttpConfig, SiteConfig, StorageConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::KNOWN_ADAPTERS;
