//! Trusted-subject check for federated discovery callers.
//!
//! A bot calling a protected endpoint presents its identity in a single
//! header, either as a raw DN or as an XFCC-style `key=value` list carrying a
//! `Subject`. The subject must equal one of the configured DNs, ignoring
//! attribute order and surrounding whitespace.
//!
//! This validator deliberately does not share code with [`crate::mtls`]: it
//! guards the bot-to-service boundary, not the client-to-service one.

use std::fmt;
use std::sync::OnceLock;

use axum::http::{HeaderMap, HeaderName};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Header read when none is configured.
pub const DEFAULT_HEADER: &str = "x-forwarded-client-cert";

/// Why a caller was rejected, in check order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UclReason {
    /// No header map at all.
    NoHeaders,
    /// The configured header is absent.
    HeaderMissing,
    /// The header is present but holds no subject.
    SubjectMissing,
    /// The subject matches none of the expected subjects.
    SubjectMismatch,
}

impl UclReason {
    /// Wire name, e.g. `SUBJECT_MISMATCH`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoHeaders => "NO_HEADERS",
            Self::HeaderMissing => "HEADER_MISSING",
            Self::SubjectMissing => "SUBJECT_MISSING",
            Self::SubjectMismatch => "SUBJECT_MISMATCH",
        }
    }
}

impl fmt::Display for UclReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`UclMtlsValidator::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UclValidation {
    /// Caller accepted.
    pub ok: bool,
    /// Set when rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<UclReason>,
    /// Extracted subject; on mismatch, the offending one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl UclValidation {
    fn reject(reason: UclReason, subject: Option<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
            subject,
        }
    }
}

/// Construction options.
#[derive(Debug, Clone, Default)]
pub struct UclValidatorOptions {
    /// Accepted subject DNs. Must contain at least one non-blank entry.
    pub expected_subjects: Vec<String>,
    /// Header carrying the caller identity; [`DEFAULT_HEADER`] if unset.
    pub header_name: Option<String>,
}

/// Validates a caller's identity header against an allow-list.
#[derive(Debug, Clone)]
pub struct UclMtlsValidator {
    expected: Vec<Vec<String>>,
    header_name: HeaderName,
}

impl UclMtlsValidator {
    /// Build a validator.
    ///
    /// Fails when no non-blank expected subject is given or the header name
    /// is not a valid HTTP header name.
    pub fn new(options: UclValidatorOptions) -> Result<Self> {
        let expected: Vec<Vec<String>> = options
            .expected_subjects
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(subject_tokens)
            .collect();
        if expected.is_empty() {
            return Err(Error::Config(
                "UCL validator requires a non-empty list of expected subjects".to_string(),
            ));
        }

        let name = options
            .header_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_HEADER);
        let header_name = HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes())
            .map_err(|e| Error::Config(format!("Invalid UCL header name '{name}': {e}")))?;

        Ok(Self {
            expected,
            header_name,
        })
    }

    /// Name of the header this validator reads.
    #[must_use]
    pub fn header_name(&self) -> &HeaderName {
        &self.header_name
    }

    /// Check the request headers.
    #[must_use]
    pub fn validate(&self, headers: Option<&HeaderMap>) -> UclValidation {
        let Some(headers) = headers else {
            return UclValidation::reject(UclReason::NoHeaders, None);
        };
        let Some(value) = headers.get(&self.header_name) else {
            debug!(header = %self.header_name, "UCL identity header missing");
            return UclValidation::reject(UclReason::HeaderMissing, None);
        };
        let Some(subject) = value.to_str().ok().and_then(extract_subject) else {
            return UclValidation::reject(UclReason::SubjectMissing, None);
        };

        let tokens = subject_tokens(&subject);
        if self.expected.iter().any(|expected| *expected == tokens) {
            debug!(subject = %subject, "UCL caller accepted");
            return UclValidation {
                ok: true,
                reason: None,
                subject: Some(subject),
            };
        }

        warn!(subject = %subject, "UCL caller subject not expected");
        UclValidation::reject(UclReason::SubjectMismatch, Some(subject))
    }
}

fn quoted_subject_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(?:^|[;,])\s*Subject\s*=\s*"([^"]+)""#).expect("static regex")
    })
}

fn unquoted_subject_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)(?:^|[;,])\s*Subject\s*=\s*([^";][^;]*?)\s*(?:;|,\s*(?:By|Hash|Cert|Chain|URI|DNS)\s*=|$)"#,
        )
        .expect("static regex")
    })
}

/// Subject from a header value: `Subject="..."`, then `Subject=...`, then
/// the whole value as a raw DN.
#[must_use]
pub fn extract_subject(value: &str) -> Option<String> {
    let captured = quoted_subject_regex()
        .captures(value)
        .or_else(|| unquoted_subject_regex().captures(value))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str());

    let subject = captured.unwrap_or(value).trim();
    (!subject.is_empty()).then(|| subject.to_string())
}

/// Sorted comma tokens, whitespace-trimmed around `,` and `=`.
fn subject_tokens(subject: &str) -> Vec<String> {
    let mut tokens: Vec<String> = subject
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| match t.split_once('=') {
            Some((key, value)) => format!("{}={}", key.trim(), value.trim()),
            None => t.to_string(),
        })
        .collect();
    tokens.sort_unstable();
    tokens
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use pretty_assertions::assert_eq;

    use super::*;

    fn validator(subjects: &[&str]) -> UclMtlsValidator {
        UclMtlsValidator::new(UclValidatorOptions {
            expected_subjects: subjects.iter().map(|s| (*s).to_string()).collect(),
            header_name: None,
        })
        .unwrap()
    }

    fn with_header(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(DEFAULT_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_order_insensitive_match() {
        let v = validator(&["CN=aggregator, O=SAP SE, C=DE"]);
        let result = v.validate(Some(&with_header("C=DE, O=SAP SE, CN=aggregator")));
        assert_eq!(
            result,
            UclValidation {
                ok: true,
                reason: None,
                subject: Some("C=DE, O=SAP SE, CN=aggregator".to_string()),
            }
        );
    }

    #[test]
    fn test_empty_header_is_subject_missing() {
        let v = validator(&["CN=aggregator, O=SAP SE, C=DE"]);
        let result = v.validate(Some(&with_header("")));
        assert!(!result.ok);
        assert_eq!(result.reason, Some(UclReason::SubjectMissing));
    }

    #[test]
    fn test_reasons_in_priority_order() {
        let v = validator(&["CN=aggregator"]);
        assert_eq!(v.validate(None).reason, Some(UclReason::NoHeaders));
        assert_eq!(
            v.validate(Some(&HeaderMap::new())).reason,
            Some(UclReason::HeaderMissing)
        );

        let result = v.validate(Some(&with_header("CN=intruder")));
        assert_eq!(result.reason, Some(UclReason::SubjectMismatch));
        assert_eq!(result.subject.as_deref(), Some("CN=intruder"));
    }

    #[test]
    fn test_xfcc_quoted_subject() {
        let v = validator(&["CN=bot,O=Example,C=DE"]);
        let header = r#"By=spiffe://svc;Hash=abc123;Subject="C=DE, O=Example, CN=bot";URI=spiffe://bot"#;
        let result = v.validate(Some(&with_header(header)));
        assert!(result.ok, "{result:?}");
        assert_eq!(result.subject.as_deref(), Some("C=DE, O=Example, CN=bot"));
    }

    #[test]
    fn test_xfcc_unquoted_subject() {
        assert_eq!(
            extract_subject("Hash=abc;Subject=CN=bot,O=Example;URI=spiffe://bot").as_deref(),
            Some("CN=bot,O=Example")
        );
        assert_eq!(
            extract_subject("Subject=CN=bot,O=Example,Hash=abc").as_deref(),
            Some("CN=bot,O=Example")
        );
        assert_eq!(
            extract_subject("Subject=CN=bot, O=Example").as_deref(),
            Some("CN=bot, O=Example")
        );
    }

    #[test]
    fn test_raw_dn_fallback() {
        assert_eq!(extract_subject("  CN=bot,O=Example ").as_deref(), Some("CN=bot,O=Example"));
        assert_eq!(extract_subject("   "), None);
    }

    #[test]
    fn test_whitespace_around_equals_is_ignored() {
        let v = validator(&["CN = bot , O=Example"]);
        assert!(v.validate(Some(&with_header("O=Example,CN=bot"))).ok);
    }

    #[test]
    fn test_custom_header_name() {
        let v = UclMtlsValidator::new(UclValidatorOptions {
            expected_subjects: vec!["CN=bot".into()],
            header_name: Some("X-Bot-Identity".into()),
        })
        .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-bot-identity", HeaderValue::from_static("CN=bot"));
        assert!(v.validate(Some(&headers)).ok);
        assert_eq!(
            v.validate(Some(&with_header("CN=bot"))).reason,
            Some(UclReason::HeaderMissing)
        );
    }

    #[test]
    fn test_construction_requires_subjects() {
        let err = UclMtlsValidator::new(UclValidatorOptions::default()).unwrap_err();
        assert!(err.to_string().contains("expected subjects"));

        let blank = UclMtlsValidator::new(UclValidatorOptions {
            expected_subjects: vec!["  ".into(), String::new()],
            header_name: None,
        });
        assert!(blank.is_err());
    }

    #[test]
    fn test_reason_serializes_screaming_snake() {
        let json = serde_json::to_string(&UclReason::SubjectMismatch).unwrap();
        assert_eq!(json, "\"SUBJECT_MISMATCH\"");
        assert_eq!(UclReason::NoHeaders.to_string(), "NO_HEADERS");
    }
}
