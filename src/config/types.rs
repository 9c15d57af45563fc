use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for the ingestion engine
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    #[serde(rename = "handler", default)]
    pub handlers: Vec<HandlerConfig>,
}

impl Config {
    pub fn handler(&self, name: &str) -> Option<&HandlerConfig> {
        self.handlers.iter().find(|h| h.name == name)
    }
}

/// Scheduler and worker pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Time between engine cycles (milliseconds)
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Number of concurrent workers draining the queue
    #[serde(rename = "worker-count")]
    pub worker_count: usize,

    /// Capacity of the shared work queue
    #[serde(rename = "queue-capacity")]
    pub queue_capacity: usize,

    /// How long a batch may stay started before startup recovery fails it
    #[serde(rename = "stale-batch-grace-secs", default = "default_stale_grace")]
    pub stale_batch_grace_secs: u64,
}

fn default_stale_grace() -> u64 {
    3600
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_batch_grace(&self) -> Duration {
        Duration::from_secs(self.stale_batch_grace_secs)
    }
}

/// Staging database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// One registered handler and the site it scrapes
#[derive(Debug, Clone, Deserialize)]
pub struct HandlerConfig {
    /// Registry key; also the processor name stamped on batches
    pub name: String,

    /// Adapter kind, e.g. "marketplace"
    pub adapter: String,

    /// Most batches taken from this handler per cycle
    #[serde(rename = "max-items-per-cycle")]
    pub max_items_per_cycle: usize,

    /// Free-form classification tag
    #[serde(default = "default_purpose")]
    pub purpose: String,

    pub http: HttpConfig,
    pub site: SiteConfig,
}

fn default_purpose() -> String {
    "ingestion".to_string()
}

/// Per-adapter HTTP behavior
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Pause between detail page fetches (milliseconds)
    #[serde(rename = "request-delay-ms", default)]
    pub request_delay_ms: u64,

    /// Whole-request timeout (milliseconds)
    #[serde(rename = "request-timeout-ms", default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Reserved; detail pages are currently fetched one at a time per run
    #[serde(rename = "max-concurrent-requests", default = "default_max_concurrent")]
    pub max_concurrent_requests: u32,

    /// Extra request headers, applied in declared order
    #[serde(rename = "header", default)]
    pub headers: Vec<HeaderEntry>,
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_max_concurrent() -> u32 {
    1
}

impl HttpConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// A single extra request header
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

/// Where the scraped site lives
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    #[serde(rename = "base-url")]
    pub base_url: String,

    #[serde(rename = "list-path", default = "default_list_path")]
    pub list_path: String,

    /// Detail path with `{field}` placeholders filled from each list entry
    #[serde(rename = "detail-template", default = "default_detail_template")]
    pub detail_template: String,
}

fn default_list_path() -> String {
    crate::adapter::marketplace::DEFAULT_LIST_PATH.to_string()
}

fn default_detail_template() -> String {
    crate::adapter::marketplace::DEFAULT_DETAIL_TEMPLATE.to_string()
}
