//! Captured authentication state
//!
//! A credential bundle is produced by whatever captured the user's login
//! (browser extension, manual export) and is only read by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while reading or applying a credential bundle
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Malformed credential bundle: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Credentials for {domain} expired at {expired_at}")]
    Expired {
        domain: String,
        expired_at: DateTime<Utc>,
    },

    #[error("Invalid cookie scope for {name}: {domain}")]
    InvalidCookieDomain { name: String, domain: String },

    #[error("Invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },
}

/// A single captured cookie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieEntry {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub same_site: Option<String>,
}

fn default_path() -> String {
    "/".to_string()
}

impl CookieEntry {
    /// Host the cookie is scoped to, falling back to the bundle's domain
    pub fn host<'a>(&'a self, fallback: &'a str) -> &'a str {
        let domain = if self.domain.is_empty() {
            fallback
        } else {
            &self.domain
        };
        domain.trim_start_matches('.')
    }

    /// Renders the cookie as a `Set-Cookie` header value
    ///
    /// A `Domain` attribute is only emitted for cookies captured with a
    /// leading dot; everything else stays host-only.
    pub fn to_set_cookie(&self) -> String {
        let mut header = format!("{}={}; Path={}", self.name, self.value, self.path);
        if self.domain.starts_with('.') {
            header.push_str("; Domain=");
            header.push_str(self.domain.trim_start_matches('.'));
        }
        if self.secure {
            header.push_str("; Secure");
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        if let Some(same_site) = &self.same_site {
            header.push_str("; SameSite=");
            header.push_str(same_site);
        }
        header
    }
}

/// Authentication state captured for one site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialBundle {
    pub domain: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entries: Vec<CookieEntry>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CredentialBundle {
    pub fn from_json(payload: &str) -> Result<Self, CredentialError> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn to_json(&self) -> Result<String, CredentialError> {
        Ok(serde_json::to_string(self)?)
    }

    /// True if the bundle carries an expiry that is not after `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    /// Fails with `CredentialError::Expired` if the bundle is no longer usable
    pub fn ensure_valid(&self, now: DateTime<Utc>) -> Result<(), CredentialError> {
        match self.expires_at {
            Some(expired_at) if self.is_expired(now) => Err(CredentialError::Expired {
                domain: self.domain.clone(),
                expired_at,
            }),
            _ => Ok(()),
        }
    }
}

/// SHA-256 of a serialized payload, hex encoded
///
/// Stored on each batch as its `file_hash` so that submitters can detect
/// duplicate uploads.
pub fn payload_hash(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}
