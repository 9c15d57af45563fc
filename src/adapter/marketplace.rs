//! Reference adapter for marketplace-style order history pages
//!
//! The list page embeds `window.__ORDER_HISTORY__ = {"orders": [...]}` and
//! each detail page embeds `window.__ORDER_DETAIL__ = {"order": {...}}`.

use crate::adapter::extract::parse_embedded;
use crate::adapter::template::render;
use crate::adapter::{OrderSummary, ParseError, SourceAdapter, Summaries, TemplateError};
use crate::storage::{StagedOrder, StagedOrderItem};
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

pub const LIST_MARKER: &str = "window.__ORDER_HISTORY__";
pub const DETAIL_MARKER: &str = "window.__ORDER_DETAIL__";

pub const DEFAULT_LIST_PATH: &str = "/orders";
pub const DEFAULT_DETAIL_TEMPLATE: &str = "/orders/{orderId}";

#[derive(Deserialize)]
struct OrderHistory {
    orders: Vec<Value>,
}

#[derive(Deserialize)]
struct OrderDetail {
    order: Value,
}

/// One order as parsed from a marketplace detail page
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceOrder {
    pub order_id: String,
    #[serde(default)]
    pub order_date: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, deserialize_with = "amount")]
    pub total: Option<f64>,
    #[serde(skip)]
    pub items: Vec<MarketplaceItem>,
    #[serde(skip)]
    pub raw: String,
}

/// One line item of a [`MarketplaceOrder`]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceItem {
    pub item_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "one")]
    pub quantity: i64,
    #[serde(default, deserialize_with = "amount")]
    pub list_price: Option<f64>,
    #[serde(default, deserialize_with = "amount")]
    pub price: Option<f64>,
    #[serde(default)]
    pub product_url: Option<String>,
    #[serde(skip)]
    pub raw: String,
}

fn one() -> i64 {
    1
}

/// Accepts `12.5`, `"12.50"` and `"$1,012.50"`
fn amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s
            .trim()
            .trim_start_matches(|c: char| !(c.is_ascii_digit() || c == '-' || c == '.'))
            .replace(',', "")
            .parse()
            .ok(),
        _ => None,
    })
}

/// Accepts a plain date or an RFC 3339 timestamp
fn parse_order_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.date_naive()))
}

/// Flattens the scalar fields of a JSON object into strings
fn scalar_fields(value: &Value) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    if let Value::Object(map) = value {
        for (key, field) in map {
            let text = match field {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            fields.insert(key.clone(), text);
        }
    }
    fields
}

fn json_error(marker: &str, error: serde_json::Error) -> ParseError {
    ParseError::Json {
        marker: marker.to_string(),
        message: error.to_string(),
    }
}

/// Adapter for one marketplace site
#[derive(Debug, Clone)]
pub struct MarketplaceAdapter {
    name: String,
    base_url: Url,
    list_path: String,
    detail_template: String,
}

impl MarketplaceAdapter {
    pub fn new(
        name: impl Into<String>,
        base_url: Url,
        list_path: impl Into<String>,
        detail_template: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url,
            list_path: list_path.into(),
            detail_template: detail_template.into(),
        }
    }

    /// Adapter with the default list path and detail template
    pub fn with_defaults(name: impl Into<String>, base_url: Url) -> Self {
        Self::new(name, base_url, DEFAULT_LIST_PATH, DEFAULT_DETAIL_TEMPLATE)
    }

    fn resolve(&self, path: &str) -> Result<String, TemplateError> {
        self.base_url
            .join(path)
            .map(String::from)
            .map_err(|e| TemplateError::InvalidUrl {
                url: path.to_string(),
                message: e.to_string(),
            })
    }
}

impl SourceAdapter for MarketplaceAdapter {
    type Detail = MarketplaceOrder;

    fn name(&self) -> &str {
        &self.name
    }

    fn list_url(&self) -> Result<String, TemplateError> {
        self.resolve(&self.list_path)
    }

    fn detail_url(&self, summary: &OrderSummary) -> Result<String, TemplateError> {
        let path = render(&self.detail_template, &summary.fields)?;
        self.resolve(&path)
    }

    fn parse_list<'a>(&self, page: &'a str) -> Result<Summaries<'a>, ParseError> {
        let history: OrderHistory = parse_embedded(page, LIST_MARKER)?;

        Ok(Box::new(history.orders.into_iter().map(|entry| OrderSummary {
            fields: scalar_fields(&entry),
            raw_data: entry.to_string(),
        })))
    }

    fn parse_detail(
        &self,
        page: &str,
        _summary: &OrderSummary,
    ) -> Result<MarketplaceOrder, ParseError> {
        let detail: OrderDetail = parse_embedded(page, DETAIL_MARKER)?;

        let raw_items = match detail.order.get("items") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };

        let mut order: MarketplaceOrder = serde_json::from_value(detail.order.clone())
            .map_err(|e| json_error(DETAIL_MARKER, e))?;
        order.raw = detail.order.to_string();

        for raw_item in raw_items {
            let mut item: MarketplaceItem = serde_json::from_value(raw_item.clone())
                .map_err(|e| json_error(DETAIL_MARKER, e))?;
            item.raw = raw_item.to_string();
            order.items.push(item);
        }

        Ok(order)
    }

    fn map_to_staging(&self, order: &mut StagedOrder, detail: MarketplaceOrder) {
        order.supplier_reference = detail.order_id;
        order.order_date = detail.order_date.as_deref().and_then(parse_order_date);
        order.currency = detail.currency;
        order.total_amount = detail.total;
        order.raw_data = detail.raw;

        order
            .items
            .extend(detail.items.into_iter().map(|item| StagedOrderItem {
                supplier_reference: item.item_id,
                name: item.title,
                description: item.description,
                quantity: item.quantity,
                listed_unit_price: item.list_price,
                actual_unit_price: item.price,
                product_url: item.product_url,
                raw_data: item.raw,
            }));
    }
}
