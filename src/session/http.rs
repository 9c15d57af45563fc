//! reqwest-backed session implementation
//!
//! This module handles:
//! - Building one HTTP client per run with the captured cookies injected
//! - Applying the configured user agent and extra headers in declared order
//! - Classifying failures into `TransportError`

use crate::session::{CredentialBundle, CredentialError, Session, SessionFactory, TransportError};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::Duration;

/// Connection-level settings shared by every session of one adapter
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub user_agent: String,

    /// Extra request headers, applied in this order
    pub additional_headers: Vec<(String, String)>,

    /// Whole-request timeout
    pub request_timeout: Duration,

    pub connect_timeout: Duration,
}

impl HttpSettings {
    pub fn new(user_agent: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            user_agent: user_agent.into(),
            additional_headers: Vec::new(),
            request_timeout,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Builds [`HttpSession`]s from credential bundles
#[derive(Debug, Clone)]
pub struct HttpSessionFactory {
    settings: HttpSettings,
}

impl HttpSessionFactory {
    pub fn new(settings: HttpSettings) -> Self {
        Self { settings }
    }

    fn cookie_jar(credentials: &CredentialBundle) -> Result<Jar, CredentialError> {
        let jar = Jar::default();

        for entry in &credentials.entries {
            let scheme = if entry.secure { "https" } else { "http" };
            let host = entry.host(&credentials.domain);
            let scope = Url::parse(&format!("{}://{}{}", scheme, host, entry.path)).map_err(
                |_| CredentialError::InvalidCookieDomain {
                    name: entry.name.clone(),
                    domain: host.to_string(),
                },
            )?;

            jar.add_cookie_str(&entry.to_set_cookie(), &scope);
        }

        Ok(jar)
    }

    fn default_headers(&self) -> Result<HeaderMap, CredentialError> {
        let mut headers = HeaderMap::new();

        for (name, value) in &self.settings.additional_headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                CredentialError::InvalidHeader {
                    name: name.clone(),
                    message: e.to_string(),
                }
            })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| CredentialError::InvalidHeader {
                    name: name.clone(),
                    message: e.to_string(),
                })?;
            headers.append(header_name, header_value);
        }

        Ok(headers)
    }

    /// Builds a session, rejecting expired credentials
    pub fn build(&self, credentials: &CredentialBundle) -> crate::Result<HttpSession> {
        credentials.ensure_valid(Utc::now())?;

        let jar = Self::cookie_jar(credentials)?;
        let headers = self.default_headers()?;

        let client = Client::builder()
            .user_agent(self.settings.user_agent.clone())
            .default_headers(headers)
            .cookie_provider(Arc::new(jar))
            .timeout(self.settings.request_timeout)
            .connect_timeout(self.settings.connect_timeout)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        tracing::debug!(
            "Opened session for {} with {} cookies",
            credentials.domain,
            credentials.entries.len()
        );

        Ok(HttpSession { client })
    }
}

impl SessionFactory for HttpSessionFactory {
    fn create_session(&self, credentials: &CredentialBundle) -> crate::Result<Box<dyn Session>> {
        Ok(Box::new(self.build(credentials)?))
    }
}

/// One authenticated HTTP client, owning its cookie state
pub struct HttpSession {
    client: Client,
}

#[async_trait]
impl Session for HttpSession {
    async fn fetch_page(&self, url: &str) -> Result<String, TransportError> {
        tracing::trace!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| classify_error(url, e))
    }
}

fn classify_error(url: &str, error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else if error.is_connect() {
        TransportError::Network {
            url: url.to_string(),
            message: "Connection refused".to_string(),
        }
    } else {
        TransportError::Network {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}
