//! Fixtures shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use ingest_engine::adapter::MarketplaceAdapter;
use ingest_engine::session::{
    CookieEntry, CredentialBundle, Session, SessionFactory, TransportError,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Notify;
use url::Url;

pub const BASE: &str = "https://shop.example.com";

pub fn adapter(name: &str) -> Arc<MarketplaceAdapter> {
    Arc::new(MarketplaceAdapter::with_defaults(
        name,
        Url::parse(BASE).unwrap(),
    ))
}

pub fn list_url() -> String {
    format!("{}/orders", BASE)
}

pub fn detail_url(id: &str) -> String {
    format!("{}/orders/{}", BASE, id)
}

pub fn list_page(ids: &[&str]) -> String {
    let orders: Vec<String> = ids
        .iter()
        .map(|id| format!(r#"{{"orderId": "{}", "placed": "2024-03-01"}}"#, id))
        .collect();
    format!(
        "<html><script>window.__ORDER_HISTORY__ = {{\"orders\": [{}]}};</script></html>",
        orders.join(",")
    )
}

pub fn detail_page(id: &str, item_count: usize) -> String {
    let items: Vec<String> = (1..=item_count)
        .map(|n| {
            format!(
                r#"{{"itemId": "{id}-{n}", "title": "Item {n}", "quantity": {n}, "price": 9.99}}"#,
                id = id,
                n = n
            )
        })
        .collect();
    format!(
        r#"<script>window.__ORDER_DETAIL__ = {{"order": {{"orderId": "{}", "orderDate": "2024-03-01", "currency": "USD", "total": 19.98, "items": [{}]}}}};</script>"#,
        id,
        items.join(",")
    )
}

pub fn bundle() -> CredentialBundle {
    CredentialBundle {
        domain: "shop.example.com".to_string(),
        captured_at: Utc::now(),
        expires_at: None,
        entries: vec![CookieEntry {
            name: "sid".to_string(),
            value: "abc".to_string(),
            domain: String::new(),
            path: "/".to_string(),
            secure: true,
            http_only: true,
            same_site: None,
        }],
        metadata: BTreeMap::new(),
    }
}

/// Canned response for one URL
#[derive(Clone)]
pub enum Reply {
    Page(String),
    Status(u16),
    /// Never answers; signals `reached` when called
    Hang,
}

/// Sessions that answer from a fixed table and record every call
#[derive(Clone, Default)]
pub struct ScriptedSite {
    replies: Arc<Mutex<HashMap<String, Reply>>>,
    calls: Arc<Mutex<Vec<(String, Instant)>>>,
    pub reached: Arc<Notify>,
}

impl ScriptedSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, url: impl Into<String>, reply: Reply) -> &Self {
        self.replies.lock().unwrap().insert(url.into(), reply);
        self
    }

    /// Scripts a list page plus a detail page with `items` items per order
    pub fn orders(&self, ids: &[&str], items: usize) -> &Self {
        self.reply(list_url(), Reply::Page(list_page(ids)));
        for id in ids {
            self.reply(detail_url(id), Reply::Page(detail_page(id, items)));
        }
        self
    }

    pub fn calls(&self) -> Vec<(String, Instant)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called_urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|(url, _)| url).collect()
    }
}

#[async_trait]
impl Session for ScriptedSite {
    async fn fetch_page(&self, url: &str) -> Result<String, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));

        let reply = self.replies.lock().unwrap().get(url).cloned();
        match reply {
            Some(Reply::Page(body)) => Ok(body),
            Some(Reply::Status(status)) => Err(TransportError::Status {
                url: url.to_string(),
                status,
            }),
            Some(Reply::Hang) => {
                self.reached.notify_one();
                std::future::pending().await
            }
            None => Err(TransportError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

impl SessionFactory for ScriptedSite {
    fn create_session(
        &self,
        credentials: &CredentialBundle,
    ) -> ingest_engine::Result<Box<dyn Session>> {
        credentials
            .ensure_valid(Utc::now())
            .map_err(ingest_engine::IngestError::from)?;
        Ok(Box::new(self.clone()))
    }
}
