//! Source adapters: per-site parsing and URL building
//!
//! An adapter is pure. It never performs I/O; the scrape runner fetches
//! pages and hands their text to the adapter.
//!
//! - `extract`: locate an embedded JSON object by marker and brace balancing
//! - `template`: `{field}` placeholder substitution for detail URLs
//! - `marketplace`: the reference adapter

pub mod extract;
pub mod marketplace;
pub mod template;

pub use marketplace::MarketplaceAdapter;

use crate::storage::StagedOrder;
use std::collections::BTreeMap;
use thiserror::Error;

/// Expected embedded data was missing or malformed
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Parse error: marker `{marker}` not found")]
    MarkerNotFound { marker: String },

    #[error("Parse error: no JSON object follows marker `{marker}`")]
    MissingObject { marker: String },

    #[error("Parse error: embedded object after `{marker}` is truncated")]
    Unbalanced { marker: String },

    #[error("Parse error: malformed embedded JSON after `{marker}`: {message}")]
    Json { marker: String, message: String },
}

/// A detail URL template could not be resolved
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template references missing field `{field}`")]
    MissingField { field: String },

    #[error("Unterminated placeholder in template `{template}`")]
    Unterminated { template: String },

    #[error("Template produced an invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Field `{field}` cannot be used as a path segment: {value:?}")]
    UnsafeValue { field: String, value: String },
}

/// One order as listed on a site's order-history page
///
/// Lives only while the list page is being iterated.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrderSummary {
    /// The list entry exactly as captured
    pub raw_data: String,

    /// Scalar fields of the entry, stringified
    pub fields: BTreeMap<String, String>,
}

impl OrderSummary {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Lazily produced list-page entries, borrowing the page text
pub type Summaries<'a> = Box<dyn Iterator<Item = OrderSummary> + Send + 'a>;

/// Site-specific knowledge needed to scrape one supplier
pub trait SourceAdapter: Send + Sync + 'static {
    /// Adapter-owned structured form of one parsed detail page
    type Detail: Send;

    /// Name used for batches created by this adapter
    fn name(&self) -> &str;

    /// URL of the order-history page
    fn list_url(&self) -> Result<String, TemplateError>;

    /// URL of the detail page for `summary`
    fn detail_url(&self, summary: &OrderSummary) -> Result<String, TemplateError>;

    /// Iterates the orders embedded in a list page, in page order
    fn parse_list<'a>(&self, page: &'a str) -> Result<Summaries<'a>, ParseError>;

    /// Parses a detail page for one order
    fn parse_detail(&self, page: &str, summary: &OrderSummary)
        -> Result<Self::Detail, ParseError>;

    /// Copies parsed fields onto the staged order and appends its items
    fn map_to_staging(&self, order: &mut StagedOrder, detail: Self::Detail);
}
