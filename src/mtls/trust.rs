//! Trusted issuer/subject lists.
//!
//! The static lists come straight from [`MtlsConfig`]. Each URL in
//! `configEndpoints` serves a JSON document of the form
//!
//! ```json
//! { "certIssuer": "CN=Client CA,O=Example", "certSubject": "CN=caller,O=Example" }
//! ```
//!
//! or an array of such objects. Endpoints are fetched on first use (single
//! flight, same retry policy as CA certificates) and merged into the static
//! lists. An endpoint that fails is skipped with a warning.

use std::sync::Arc;

use futures::future::join_all;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::dn;
use crate::mtls::config::{FetchRetryConfig, MtlsConfig};
use crate::mtls::fetch::{RemoteFetcher, fetch_with_retry};
use crate::Result;

/// Accepted issuer and subject DNs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustLists {
    /// Accepted issuer DNs. Empty means any issuer.
    pub issuers: Vec<String>,
    /// Accepted subject DNs. Empty means any subject.
    pub subjects: Vec<String>,
}

impl TrustLists {
    /// Both lists empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issuers.is_empty() && self.subjects.is_empty()
    }

    fn add_issuer(&mut self, issuer: &str) {
        push_unique(&mut self.issuers, issuer);
    }

    fn add_subject(&mut self, subject: &str) {
        push_unique(&mut self.subjects, subject);
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    let value = value.trim();
    if value.is_empty() || list.iter().any(|existing| dn::dn_matches(existing, value)) {
        return;
    }
    list.push(value.to_string());
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndpointEntry {
    #[serde(default)]
    cert_issuer: Option<String>,
    #[serde(default)]
    cert_subject: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EndpointDocument {
    Many(Vec<EndpointEntry>),
    One(EndpointEntry),
}

impl EndpointDocument {
    fn into_entries(self) -> Vec<EndpointEntry> {
        match self {
            Self::Many(entries) => entries,
            Self::One(entry) => vec![entry],
        }
    }
}

/// Static trust lists plus lazily fetched endpoint lists.
pub struct TrustStore {
    base: TrustLists,
    endpoints: Vec<String>,
    retry: FetchRetryConfig,
    fetcher: Arc<dyn RemoteFetcher>,
    merged: OnceCell<TrustLists>,
}

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStore")
            .field("base", &self.base)
            .field("endpoints", &self.endpoints)
            .field("resolved", &self.merged.initialized())
            .finish_non_exhaustive()
    }
}

impl TrustStore {
    /// Build from the mTLS configuration.
    #[must_use]
    pub fn from_config(config: &MtlsConfig, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        let mut base = TrustLists::default();
        for issuer in &config.trusted_issuers {
            base.add_issuer(issuer);
        }
        for subject in &config.trusted_subjects {
            base.add_subject(subject);
        }

        let endpoints = config
            .config_endpoints
            .iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();

        Self {
            base,
            endpoints,
            retry: config.retry.clone(),
            fetcher,
            merged: OnceCell::new(),
        }
    }

    /// The effective lists, fetching endpoints on the first call.
    pub async fn lists(&self) -> &TrustLists {
        self.merged.get_or_init(|| self.resolve()).await
    }

    async fn resolve(&self) -> TrustLists {
        let mut lists = self.base.clone();
        if self.endpoints.is_empty() {
            return lists;
        }

        let results = join_all(self.endpoints.iter().map(|url| self.fetch_endpoint(url))).await;
        for (url, result) in self.endpoints.iter().zip(results) {
            match result {
                Ok(entries) => {
                    debug!(url = %url, entries = entries.len(), "Loaded trust entries");
                    for entry in entries {
                        if let Some(issuer) = entry.cert_issuer.as_deref() {
                            lists.add_issuer(issuer);
                        }
                        if let Some(subject) = entry.cert_subject.as_deref() {
                            lists.add_subject(subject);
                        }
                    }
                }
                Err(e) => warn!(url = %url, error = %e, "Skipping trust config endpoint"),
            }
        }

        info!(
            issuers = lists.issuers.len(),
            subjects = lists.subjects.len(),
            "Trust lists resolved"
        );
        lists
    }

    async fn fetch_endpoint(&self, url: &str) -> Result<Vec<EndpointEntry>> {
        let body = fetch_with_retry(self.fetcher.as_ref(), &self.retry, url).await?;
        let document: EndpointDocument = serde_json::from_slice(&body)?;
        Ok(document.into_entries())
    }
}
