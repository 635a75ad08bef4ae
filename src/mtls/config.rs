//! mTLS configuration types.
//!
//! The front proxy terminates TLS; this block only describes what we trust
//! about the client certificate it forwards.
//!
//! # Example YAML
//!
//! ```yaml
//! auth:
//!   types: [mtls]
//!   mtls:
//!     mode: "sap:cmp-mtls"
//!     trustedSubjects:
//!       - "CN=aggregator,O=Example,C=DE"
//!     trustedIssuers:
//!       - "CN=Example Client CA,O=Example,C=DE"
//!     caChainFile: "/etc/provider-auth/ca-chain.json"
//!     decodeBase64Headers: true
//! ```
//!
//! `caChainFile` is either a path to a JSON file or the JSON itself:
//!
//! ```json
//! [{ "name": "root", "url": "https://pki.example.com/root.crt" }]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::humantime_serde;
use crate::{Error, Result};

/// The only supported mTLS mode: proxy-terminated TLS with forwarded headers.
pub const CMP_MTLS_MODE: &str = "sap:cmp-mtls";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level mTLS config
// ─────────────────────────────────────────────────────────────────────────────

/// mTLS settings.
///
/// At least one trust source (`trustedIssuers`, `trustedSubjects`,
/// `configEndpoints`, `caChainFile`) must be present; see
/// [`MtlsConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MtlsConfig {
    /// mTLS mode; only [`CMP_MTLS_MODE`] is accepted.
    pub mode: String,

    /// Issuer DNs accepted for client certificates. Empty skips the check.
    #[serde(alias = "trusted_issuers")]
    pub trusted_issuers: Vec<String>,

    /// Subject DNs accepted for client certificates. Empty skips the check.
    #[serde(alias = "trusted_subjects")]
    pub trusted_subjects: Vec<String>,

    /// URLs serving `{certIssuer, certSubject}` documents that extend the
    /// trust lists at first use.
    #[serde(alias = "config_endpoints")]
    pub config_endpoints: Vec<String>,

    /// CA definitions: a file path, or inline JSON starting with `[` / `{`.
    ///
    /// When set, every request must also carry the full client certificate
    /// and pass chain validation.
    #[serde(alias = "ca_chain_file")]
    pub ca_chain_file: Option<String>,

    /// Base64-decode header values that look encoded.
    #[serde(alias = "decode_base64_headers")]
    pub decode_base64_headers: bool,

    /// Retry behaviour for CA and config-endpoint fetches.
    pub retry: FetchRetryConfig,
}

impl Default for MtlsConfig {
    fn default() -> Self {
        Self {
            mode: CMP_MTLS_MODE.to_string(),
            trusted_issuers: Vec::new(),
            trusted_subjects: Vec::new(),
            config_endpoints: Vec::new(),
            ca_chain_file: None,
            decode_base64_headers: true,
            retry: FetchRetryConfig::default(),
        }
    }
}

impl MtlsConfig {
    /// Reject unsupported modes, malformed or empty inline CA definitions,
    /// and configurations without any trust source.
    pub fn validate(&self) -> Result<()> {
        if self.mode != CMP_MTLS_MODE {
            return Err(Error::Config(format!(
                "Unsupported mTLS mode '{}', expected '{CMP_MTLS_MODE}'",
                self.mode
            )));
        }

        if let CaChainSource::Inline(json) = self.ca_chain_source() {
            if parse_definitions(&json)?.is_empty() {
                return Err(Error::Config("caChainFile lists no CA certificates".to_string()));
            }
        }

        if !self.has_trust_source() {
            return Err(Error::Config(
                "mTLS requires at least one of trustedIssuers, trustedSubjects, \
                 configEndpoints or caChainFile"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Whether any trust source is configured.
    #[must_use]
    pub fn has_trust_source(&self) -> bool {
        !non_blank(&self.trusted_issuers).is_empty()
            || !non_blank(&self.trusted_subjects).is_empty()
            || !non_blank(&self.config_endpoints).is_empty()
            || self.ca_chain_source() != CaChainSource::None
    }

    /// Where CA definitions come from.
    #[must_use]
    pub fn ca_chain_source(&self) -> CaChainSource {
        match self.ca_chain_file.as_deref().map(str::trim) {
            None | Some("") => CaChainSource::None,
            Some(value) if value.starts_with('[') || value.starts_with('{') => {
                CaChainSource::Inline(value.to_string())
            }
            Some(path) => CaChainSource::File(PathBuf::from(path)),
        }
    }
}

fn non_blank(values: &[String]) -> Vec<&str> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Source of CA definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaChainSource {
    /// Nothing configured: header and trust-list checks only.
    None,
    /// JSON given directly in configuration.
    Inline(String),
    /// Path to a JSON file.
    File(PathBuf),
}

// ─────────────────────────────────────────────────────────────────────────────
// Fetch retry config
// ─────────────────────────────────────────────────────────────────────────────

/// Bounded retry for remote fetches.
///
/// Attempt `n` (1-based) that fails is followed by a sleep of
/// `base_delay * 2^n`, so the defaults wait 2s then 4s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchRetryConfig {
    /// Total attempts per URL.
    pub max_attempts: u32,
    /// Multiplied by `2^attempt` between attempts.
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Per-attempt deadline.
    #[serde(with = "humantime_serde")]
    pub attempt_timeout: Duration,
}

impl Default for FetchRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CA definitions
// ─────────────────────────────────────────────────────────────────────────────

/// One CA certificate to load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateDefinition {
    /// Logical name, used by [`crate::mtls::CertificateLoader::get_by_name`].
    pub name: String,
    /// Where the DER or PEM certificate is served.
    pub url: String,
}

/// Parse and validate a JSON list of CA definitions.
///
/// A single object is accepted as a one-element list. Every entry needs a
/// non-empty string `name` and an absolute `url`; the first bad entry fails
/// the whole list.
pub fn parse_definitions(json: &str) -> Result<Vec<CertificateDefinition>> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| Error::Config(format!("CA chain definitions are not valid JSON: {e}")))?;

    let entries = match value {
        serde_json::Value::Array(items) => items,
        obj @ serde_json::Value::Object(_) => vec![obj],
        _ => {
            return Err(Error::Config(
                "CA chain definitions must be a JSON array of {name, url} objects".to_string(),
            ));
        }
    };

    entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            let field = |key: &str| -> Result<String> {
                entry
                    .get(key)
                    .and_then(serde_json::Value::as_str)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_owned)
                    .ok_or_else(|| {
                        Error::Config(format!(
                            "CA definition #{idx}: '{key}' must be a non-empty string"
                        ))
                    })
            };
            let definition = CertificateDefinition {
                name: field("name")?,
                url: field("url")?,
            };
            url::Url::parse(&definition.url).map_err(|e| {
                Error::Config(format!(
                    "CA definition #{idx} ('{}'): invalid url '{}': {e}",
                    definition.name, definition.url
                ))
            })?;
            Ok(definition)
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
