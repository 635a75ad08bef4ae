//! Client certificates forwarded by a TLS-terminating proxy.
//!
//! The proxy performs the handshake and describes the client certificate in
//! a fixed set of request headers. [`PlatformMtlsHandler`] trusts the
//! proxy's verdict, checks the forwarded subject and issuer against the
//! trust lists, and, when a CA chain is configured, re-validates the full
//! forwarded certificate itself.
//!
//! # Steps (fail-fast)
//!
//! 1. `x-ssl-client-verify` must be exactly `0`.
//! 2. Subject, issuer and root DNs are read (base64-decoded when they look
//!    encoded); a subject DN or CN is required.
//! 3. Subject and issuer must match the trust lists, where configured.
//! 4. With a CA chain: `x-forwarded-client-cert` must carry the PEM
//!    certificate, which must pass [`ChainValidator`].

use std::sync::{Arc, OnceLock};

use axum::http::{HeaderMap, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::dn::{self, ParsedDn};
use crate::mtls::certificate::LoadedCertificate;
use crate::mtls::chain::{ChainValidator, ValidationResult};
use crate::mtls::config::{CaChainSource, MtlsConfig};
use crate::mtls::fetch::RemoteFetcher;
use crate::mtls::loader::CertificateLoader;
use crate::mtls::trust::TrustStore;

/// Proxy verification result; `0` means verified.
pub const CLIENT_VERIFY: &str = "x-ssl-client-verify";
/// Client subject DN.
pub const CLIENT_SUBJECT_DN: &str = "x-ssl-client-subject-dn";
/// Client subject CN.
pub const CLIENT_SUBJECT_CN: &str = "x-ssl-client-subject-cn";
/// Client issuer DN.
pub const CLIENT_ISSUER_DN: &str = "x-ssl-client-issuer-dn";
/// DN of the root CA the proxy verified against.
pub const CLIENT_ROOT_CA_DN: &str = "x-ssl-client-root-ca-dn";
/// TLS session id.
pub const CLIENT_SESSION_ID: &str = "x-ssl-client-session-id";
/// Certificate `notBefore`, as formatted by the proxy.
pub const CLIENT_NOT_BEFORE: &str = "x-ssl-client-notbefore";
/// Certificate `notAfter`, as formatted by the proxy.
pub const CLIENT_NOT_AFTER: &str = "x-ssl-client-notafter";
/// Full client certificate (XFCC or base64 PEM).
pub const FORWARDED_CLIENT_CERT: &str = "x-forwarded-client-cert";

const VERIFY_SUCCESS: &str = "0";
const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Why a request failed mTLS authentication.
///
/// `Display` is for logs and may contain DNs. Responses use
/// [`MtlsError::public_message`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MtlsError {
    /// Verify header absent or not `0`.
    #[error("Client certificate verification failed (status: {0})")]
    VerificationFailed(String),

    /// Neither subject DN nor CN was forwarded.
    #[error("Client certificate subject information missing")]
    SubjectMissing,

    /// Subject not in the trust list.
    #[error("Client certificate subject '{0}' is not trusted")]
    UntrustedSubject(String),

    /// Issuer not in the trust list.
    #[error("Client certificate issuer '{0}' is not trusted")]
    UntrustedIssuer(String),

    /// Chain validation is configured but no certificate was forwarded.
    #[error("Client certificate missing for chain validation")]
    CertificateMissing,

    /// A forwarded certificate could not be parsed.
    #[error("Client certificate malformed: {0}")]
    CertificateMalformed(String),

    /// The forwarded certificate failed chain validation.
    #[error("Certificate chain validation failed: {0}")]
    ChainInvalid(String),

    /// No issuer, subject or CA restriction is left to check against.
    #[error("No mTLS trust source available")]
    NoTrustSource,

    /// Loader or other internal failure.
    #[error("Internal mTLS error: {0}")]
    Internal(String),
}

impl MtlsError {
    /// HTTP status for the response.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NoTrustSource | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Message safe to return to the caller.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::VerificationFailed(_)
            | Self::SubjectMissing
            | Self::CertificateMissing
            | Self::ChainInvalid(_) => self.to_string(),
            Self::UntrustedSubject(_) => "Client certificate subject is not trusted".to_string(),
            Self::UntrustedIssuer(_) => "Client certificate issuer is not trusted".to_string(),
            Self::CertificateMalformed(_) => "Client certificate malformed".to_string(),
            Self::NoTrustSource | Self::Internal(_) => "Internal server error".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extracted certificate info
// ─────────────────────────────────────────────────────────────────────────────

/// What the proxy told us about the client certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCertificateInfo {
    /// Subject DN
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_dn: Option<String>,
    /// Subject CN, from its header or else from the subject DN
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_cn: Option<String>,
    /// Issuer DN
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer_dn: Option<String>,
    /// Root CA DN
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_ca_dn: Option<String>,
    /// TLS session id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// `notBefore` as sent by the proxy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,
    /// `notAfter` as sent by the proxy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_after: Option<String>,
    /// Structured subject, when a DN was forwarded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<ParsedDn>,
    /// The full certificate, when chain validation ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<LoadedCertificate>,
    /// Chain validation outcome, when it ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
}

impl ClientCertificateInfo {
    /// Best display name: CN, then subject DN.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.subject_cn
            .as_deref()
            .or(self.subject_dn.as_deref())
            .unwrap_or("unknown")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler
// ─────────────────────────────────────────────────────────────────────────────

/// Authenticates requests from proxy-forwarded client certificate headers.
#[derive(Debug)]
pub struct PlatformMtlsHandler {
    decode_base64: bool,
    trust: TrustStore,
    loader: Option<Arc<CertificateLoader>>,
    validator: Option<ChainValidator>,
}

impl PlatformMtlsHandler {
    /// Build from configuration. A CA loader is created only if `caChainFile`
    /// is set; it initializes on the first request.
    #[must_use]
    pub fn new(config: &MtlsConfig, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        let loader = (config.ca_chain_source() != CaChainSource::None)
            .then(|| Arc::new(CertificateLoader::from_config(config, Arc::clone(&fetcher))));
        let trust = TrustStore::from_config(config, fetcher);
        Self::with_parts(config.decode_base64_headers, trust, loader)
    }

    /// Build from already-constructed parts.
    #[must_use]
    pub fn with_parts(
        decode_base64: bool,
        trust: TrustStore,
        loader: Option<Arc<CertificateLoader>>,
    ) -> Self {
        let validator = loader.clone().map(ChainValidator::new);
        Self {
            decode_base64,
            trust,
            loader,
            validator,
        }
    }

    /// The CA loader, if a chain is configured.
    #[must_use]
    pub fn loader(&self) -> Option<&Arc<CertificateLoader>> {
        self.loader.as_ref()
    }

    /// Run all steps against `headers`.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
    ) -> Result<ClientCertificateInfo, MtlsError> {
        // Step 1: proxy verdict
        let status = header(headers, CLIENT_VERIFY);
        if status != Some(VERIFY_SUCCESS) {
            let status = status.unwrap_or("missing").to_string();
            debug!(status = %status, "Proxy did not verify client certificate");
            return Err(MtlsError::VerificationFailed(status));
        }

        // Step 2: subject info
        let mut info = self.extract_info(headers);
        if info.subject_dn.is_none() && info.subject_cn.is_none() {
            return Err(MtlsError::SubjectMissing);
        }

        // Step 3: trust lists
        let lists = self.trust.lists().await;
        if lists.is_empty() && self.loader.is_none() {
            error!("mTLS has no trust source left after resolving config endpoints");
            return Err(MtlsError::NoTrustSource);
        }
        if let Some(subject) = info.subject_dn.as_deref() {
            if !lists.subjects.is_empty() && !dn::matches_any(subject, &lists.subjects) {
                warn!(subject = %subject, "Client certificate subject not trusted");
                return Err(MtlsError::UntrustedSubject(subject.to_string()));
            }
        }
        if let Some(issuer) = info.issuer_dn.as_deref() {
            if !lists.issuers.is_empty() && !dn::matches_any(issuer, &lists.issuers) {
                warn!(issuer = %issuer, "Client certificate issuer not trusted");
                return Err(MtlsError::UntrustedIssuer(issuer.to_string()));
            }
        }

        // Step 4: full chain validation
        if let (Some(loader), Some(validator)) = (&self.loader, &self.validator) {
            loader.initialize().await.map_err(|e| {
                error!(error = %e, "CA certificate loader unavailable");
                MtlsError::Internal(e.to_string())
            })?;

            if !loader.has_ca_chain() && lists.is_empty() {
                error!("mTLS CA chain file lists no certificates and no trust list is set");
                return Err(MtlsError::NoTrustSource);
            }

            if loader.has_ca_chain() {
                let raw = header(headers, FORWARDED_CLIENT_CERT)
                    .ok_or(MtlsError::CertificateMissing)?;
                let cert = extract_certificate(raw)?.ok_or(MtlsError::CertificateMissing)?;

                let result = validator.validate(&cert);
                if !result.is_valid {
                    let reason = result
                        .error
                        .unwrap_or_else(|| "unknown validation failure".to_string());
                    warn!(subject = %cert.subject_dn, error = %reason, "Client certificate chain rejected");
                    return Err(MtlsError::ChainInvalid(reason));
                }
                info.certificate = Some(cert);
                info.validation = Some(result);
            }
        }

        debug!(client = %info.display_name(), "mTLS authentication succeeded");
        Ok(info)
    }

    fn extract_info(&self, headers: &HeaderMap) -> ClientCertificateInfo {
        let dn_header = |name| header(headers, name).map(|v| self.decode(v, true));
        let subject_dn = dn_header(CLIENT_SUBJECT_DN);
        let subject = subject_dn.as_deref().map(dn::parse);
        let subject_cn = header(headers, CLIENT_SUBJECT_CN)
            .map(|v| self.decode(v, false))
            .or_else(|| subject.as_ref().and_then(|s| s.cn.clone()));

        ClientCertificateInfo {
            subject_cn,
            issuer_dn: dn_header(CLIENT_ISSUER_DN),
            root_ca_dn: dn_header(CLIENT_ROOT_CA_DN),
            session_id: header(headers, CLIENT_SESSION_ID).map(str::to_owned),
            not_before: header(headers, CLIENT_NOT_BEFORE).map(str::to_owned),
            not_after: header(headers, CLIENT_NOT_AFTER).map(str::to_owned),
            subject_dn,
            subject,
            certificate: None,
            validation: None,
        }
    }

    fn decode(&self, value: &str, expect_dn: bool) -> String {
        if !self.decode_base64 {
            return value.to_string();
        }
        match decode_base64_text(value) {
            Some(decoded) if !expect_dn || decoded.contains('=') => decoded,
            _ => value.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Header parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Trimmed, non-empty header value.
fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn base64_regex() -> &'static Regex {
    static BASE64_RE: OnceLock<Regex> = OnceLock::new();
    BASE64_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9+/]+={0,2}$").expect("static regex"))
}

fn xfcc_cert_regex() -> &'static Regex {
    static XFCC_CERT_RE: OnceLock<Regex> = OnceLock::new();
    XFCC_CERT_RE.get_or_init(|| Regex::new(r#"(?i)(?:^|[;,])\s*Cert="([^"]*)""#).expect("static regex"))
}

/// Decode `value` if it looks like base64 of printable UTF-8 text.
fn decode_base64_text(value: &str) -> Option<String> {
    if value.len() % 4 != 0 || !base64_regex().is_match(value) {
        return None;
    }
    let bytes = STANDARD.decode(value).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    (!text.is_empty() && !text.chars().any(char::is_control)).then_some(text)
}

/// Pull the client certificate out of a forwarded-cert header.
///
/// Accepts an XFCC `Cert="<url-encoded PEM>"` element or a bare base64 blob
/// of PEM text. Returns `Ok(None)` when neither shape is present and an
/// error when PEM markers are present but the certificate does not parse.
pub fn extract_certificate(value: &str) -> Result<Option<LoadedCertificate>, MtlsError> {
    let pem = if let Some(captures) = xfcc_cert_regex().captures(value) {
        percent_decode_str(&captures[1])
            .decode_utf8()
            .map_err(|e| MtlsError::CertificateMalformed(format!("invalid URL encoding: {e}")))?
            .into_owned()
    } else {
        let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
        match STANDARD.decode(compact).ok().and_then(|b| String::from_utf8(b).ok()) {
            Some(text) => text,
            None => return Ok(None),
        }
    };

    if !pem.contains(PEM_BEGIN) {
        return Ok(None);
    }
    LoadedCertificate::from_pem(&pem)
        .map(Some)
        .map_err(|e| MtlsError::CertificateMalformed(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
