//! Parsed X.509 certificates.
//!
//! [`LoadedCertificate`] keeps the DER bytes next to the fields we look at on
//! every request (subject, issuer, validity window, fingerprint) so the chain
//! validator never has to re-derive them. The DER is re-parsed only for
//! signature checks.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use x509_parser::certificate::X509Certificate;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::FromDer;

use crate::dn;
use crate::{Error, Result};

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";
const PEM_LINE_WIDTH: usize = 64;

// ─────────────────────────────────────────────────────────────────────────────
// Loaded certificate
// ─────────────────────────────────────────────────────────────────────────────

/// A parsed certificate and its derived fields. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedCertificate {
    /// Subject DN as printed by `x509-parser` (`C=.., O=.., CN=..`).
    pub subject_dn: String,
    /// Issuer DN in the same format.
    pub issuer_dn: String,
    /// Subject Common Name, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    /// Colon-separated hex serial.
    pub serial_number: String,
    /// Start of the validity window.
    pub valid_from: DateTime<Utc>,
    /// End of the validity window.
    pub valid_to: DateTime<Utc>,
    /// SHA-256 over the DER encoding, lowercase hex.
    pub fingerprint: String,
    #[serde(skip)]
    der: Vec<u8>,
}

impl LoadedCertificate {
    /// Parse a DER-encoded certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Certificate(format!("Failed to parse certificate: {e}")))?;

        let validity = cert.validity();
        let valid_from = to_utc(validity.not_before.timestamp())?;
        let valid_to = to_utc(validity.not_after.timestamp())?;

        Ok(Self {
            subject_dn: cert.subject().to_string(),
            issuer_dn: cert.issuer().to_string(),
            common_name: extract_cn(&cert),
            serial_number: cert.raw_serial_as_string(),
            valid_from,
            valid_to,
            fingerprint: fingerprint(der),
            der: der.to_vec(),
        })
    }

    /// Parse the first `CERTIFICATE` block of a PEM document.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let (_, block) = parse_x509_pem(pem.as_bytes())
            .map_err(|e| Error::Certificate(format!("Invalid PEM: {e}")))?;
        if block.label != "CERTIFICATE" {
            return Err(Error::Certificate(format!(
                "Expected a CERTIFICATE PEM block, found '{}'",
                block.label
            )));
        }
        Self::from_der(&block.contents)
    }

    /// Parse bytes that are either PEM text or raw DER.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match std::str::from_utf8(bytes) {
            Ok(text) if text.contains(PEM_BEGIN) => Self::from_pem(text),
            _ => Self::from_pem(&der_to_pem(bytes)),
        }
    }

    /// DER encoding.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// PEM encoding.
    #[must_use]
    pub fn pem(&self) -> String {
        der_to_pem(&self.der)
    }

    /// Issuer and subject are the same DN.
    #[must_use]
    pub fn is_self_signed(&self) -> bool {
        dn::normalize(&self.subject_dn) == dn::normalize(&self.issuer_dn)
    }

    /// Outside the validity window right now. No clock-skew grace.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Outside the validity window at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now < self.valid_from || now > self.valid_to
    }

    /// Check that `issuer`'s public key produced this certificate's signature.
    pub fn verify_signed_by(&self, issuer: &Self) -> Result<()> {
        let (_, cert) = X509Certificate::from_der(&self.der)
            .map_err(|e| Error::Certificate(format!("Failed to parse certificate: {e}")))?;
        let (_, issuer_cert) = X509Certificate::from_der(&issuer.der)
            .map_err(|e| Error::Certificate(format!("Failed to parse issuer: {e}")))?;

        cert.verify_signature(Some(issuer_cert.public_key()))
            .map_err(|e| Error::Certificate(format!("Signature verification failed: {e}")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Wrap DER bytes as a PEM `CERTIFICATE` block with 64-column lines.
#[must_use]
pub fn der_to_pem(der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut pem = String::with_capacity(encoded.len() + encoded.len() / PEM_LINE_WIDTH + 64);
    pem.push_str(PEM_BEGIN);
    pem.push('\n');
    for line in encoded.as_bytes().chunks(PEM_LINE_WIDTH) {
        // base64 output is ASCII, so every chunk is valid UTF-8
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(PEM_END);
    pem.push('\n');
    pem
}

/// SHA-256 fingerprint of DER bytes.
#[must_use]
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

fn to_utc(timestamp: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| Error::Certificate(format!("Validity timestamp out of range: {timestamp}")))
}

fn extract_cn(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
