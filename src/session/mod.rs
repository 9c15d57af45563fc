//! Authenticated HTTP sessions
//!
//! This module contains:
//! - The credential bundle captured upstream and consumed read-only here
//! - The `Session` seam used by scrape runners to fetch pages
//! - The reqwest-backed session and its factory

mod credentials;
mod http;

pub use credentials::{payload_hash, CookieEntry, CredentialBundle, CredentialError};
pub use http::{HttpSession, HttpSessionFactory, HttpSettings};

use async_trait::async_trait;
use thiserror::Error;

/// HTTP or network failure while fetching a page
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// A live, authenticated connection to one site for the length of one run
///
/// Sessions never retry. Dropping a session releases its connections.
#[async_trait]
pub trait Session: Send + Sync {
    /// Fetches `url` and returns the response body
    ///
    /// Non-2xx statuses and timeouts are `TransportError`s.
    async fn fetch_page(&self, url: &str) -> Result<String, TransportError>;
}

/// Builds sessions from captured credentials
pub trait SessionFactory: Send + Sync {
    fn create_session(&self, credentials: &CredentialBundle) -> crate::Result<Box<dyn Session>>;
}
