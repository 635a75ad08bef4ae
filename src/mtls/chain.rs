//! Certificate chain validation.
//!
//! Checks that a leaf certificate is inside its validity window and chains,
//! through CAs known to the [`CertificateLoader`], to a trusted self-signed
//! root, verifying every signature on the way.
//!
//! # Steps (fail-fast)
//!
//! 1. Time validity, with a 5 minute tolerance on both bounds.
//! 2. Walk issuer DNs through the loader index, at most
//!    [`MAX_CHAIN_DEPTH`] links. A missing issuer ends the walk.
//! 3. The walk must end at a self-signed CA whose fingerprint matches the
//!    trusted copy.
//! 4. Each certificate's signature must verify with the next one's key.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::mtls::certificate::LoadedCertificate;
use crate::mtls::loader::CertificateLoader;

/// Clock-skew tolerance applied to `validFrom` / `validTo`.
pub const GRACE_PERIOD: TimeDelta = TimeDelta::minutes(5);

/// Maximum number of issuer links followed from the leaf.
pub const MAX_CHAIN_DEPTH: usize = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Result types
// ─────────────────────────────────────────────────────────────────────────────

/// Which validation steps passed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationDetails {
    /// Inside the validity window (with grace).
    pub time_valid: bool,
    /// Chain reached a trusted root and every signature verified.
    pub chain_valid: bool,
}

/// Outcome of [`ChainValidator::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// True only if every step passed.
    pub is_valid: bool,
    /// First failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Per-step flags.
    pub details: ValidationDetails,
}

impl ValidationResult {
    fn failed(error: String, details: ValidationDetails) -> Self {
        Self {
            is_valid: false,
            error: Some(error),
            details,
        }
    }
}

/// Path from a leaf towards a trusted root. Built per call, never cached.
#[derive(Debug)]
pub struct CertificateChain<'a> {
    /// The certificate being validated.
    pub leaf: &'a LoadedCertificate,
    /// CAs between leaf and root, nearest first. Excludes the root.
    pub intermediates: Vec<&'a LoadedCertificate>,
    /// Trusted root, when the walk ended at one.
    pub root: Option<&'a LoadedCertificate>,
}

impl<'a> CertificateChain<'a> {
    /// `[leaf, ...intermediates, root]`. A self-signed trusted leaf appears
    /// twice so its self-signature is still checked.
    #[must_use]
    pub fn path(&self) -> Vec<&'a LoadedCertificate> {
        let mut path = Vec::with_capacity(self.intermediates.len() + 2);
        path.push(self.leaf);
        path.extend(self.intermediates.iter().copied());
        if let Some(root) = self.root {
            path.push(root);
        }
        path
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validator
// ─────────────────────────────────────────────────────────────────────────────

/// Validates client certificates against the loader's trusted CAs.
#[derive(Debug, Clone)]
pub struct ChainValidator {
    loader: Arc<CertificateLoader>,
}

impl ChainValidator {
    /// Validate against the CAs held by `loader`.
    ///
    /// The loader must be initialized before validating; an uninitialized
    /// loader knows no roots, so every chain fails.
    #[must_use]
    pub fn new(loader: Arc<CertificateLoader>) -> Self {
        Self { loader }
    }

    /// Validate `leaf` at the current time.
    #[must_use]
    pub fn validate(&self, leaf: &LoadedCertificate) -> ValidationResult {
        self.validate_at(leaf, Utc::now())
    }

    /// Validate `leaf` as of `now`.
    #[must_use]
    pub fn validate_at(&self, leaf: &LoadedCertificate, now: DateTime<Utc>) -> ValidationResult {
        let mut details = ValidationDetails::default();

        if let Err(e) = check_time_validity(leaf, now) {
            debug!(subject = %leaf.subject_dn, error = %e, "Certificate outside validity window");
            return ValidationResult::failed(e, details);
        }
        details.time_valid = true;

        let chain = self.build_chain(leaf);
        if chain.root.is_none() {
            warn!(
                subject = %leaf.subject_dn,
                issuer = %leaf.issuer_dn,
                depth = chain.intermediates.len(),
                "Certificate chain does not reach a trusted root"
            );
            return ValidationResult::failed(
                "Certificate chain does not terminate at a trusted root CA".to_string(),
                details,
            );
        }

        if let Err(e) = verify_signatures(&chain) {
            return ValidationResult::failed(e, details);
        }
        details.chain_valid = true;

        debug!(
            subject = %leaf.subject_dn,
            intermediates = chain.intermediates.len(),
            "Certificate chain validated"
        );
        ValidationResult {
            is_valid: true,
            error: None,
            details,
        }
    }

    /// Walk from `leaf` towards a trusted root.
    #[must_use]
    pub fn build_chain<'a>(&'a self, leaf: &'a LoadedCertificate) -> CertificateChain<'a> {
        let mut intermediates: Vec<&LoadedCertificate> = Vec::new();
        let mut current = leaf;

        while !current.is_self_signed() && intermediates.len() < MAX_CHAIN_DEPTH {
            let Some(issuer) = self.loader.get_by_subject(&current.issuer_dn) else {
                debug!(issuer = %current.issuer_dn, "Issuer not among trusted CAs");
                break;
            };
            intermediates.push(issuer);
            current = issuer;
        }

        let root = if current.is_self_signed() {
            self.loader
                .get_by_subject(&current.subject_dn)
                .filter(|trusted| trusted.fingerprint == current.fingerprint)
        } else {
            None
        };

        // the walk pushed the root itself as its last step
        if root.is_some()
            && intermediates
                .last()
                .is_some_and(|last| Some(last.fingerprint.as_str()) == root.map(|r| r.fingerprint.as_str()))
        {
            intermediates.pop();
        }

        CertificateChain {
            leaf,
            intermediates,
            root,
        }
    }
}

/// Step 1: validity window with [`GRACE_PERIOD`] on each side.
fn check_time_validity(cert: &LoadedCertificate, now: DateTime<Utc>) -> Result<(), String> {
    if now + GRACE_PERIOD < cert.valid_from {
        return Err(format!(
            "Certificate is not yet valid (validFrom {})",
            cert.valid_from.to_rfc3339()
        ));
    }
    if now - GRACE_PERIOD > cert.valid_to {
        return Err(format!(
            "Certificate has expired (validTo {})",
            cert.valid_to.to_rfc3339()
        ));
    }
    Ok(())
}

/// Step 4: every adjacent `(subject, issuer)` pair in the path.
fn verify_signatures(chain: &CertificateChain<'_>) -> Result<(), String> {
    let path = chain.path();
    for (position, pair) in path.windows(2).enumerate() {
        let (subject, issuer) = (pair[0], pair[1]);
        if let Err(e) = subject.verify_signed_by(issuer) {
            warn!(
                position,
                subject = %subject.subject_dn,
                issuer = %issuer.subject_dn,
                error = %e,
                "Chain signature check failed"
            );
            return Err(format!(
                "Certificate chain signature invalid at position {position}"
            ));
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use rcgen::date_time_ymd;

    use super::*;
    use crate::mtls::testing::{TestPki, ca_params, leaf_params};

    fn loaded(cert: &rcgen::Certificate) -> LoadedCertificate {
        LoadedCertificate::from_der(cert.der()).unwrap()
    }

    #[tokio::test]
    async fn full_chain_validates() {
        // GIVEN: root and intermediate are trusted
        let pki = TestPki::generate();
        let loader =
            TestPki::loader(&[("root", &pki.root), ("intermediate", &pki.intermediate)]).await;
        let validator = ChainValidator::new(loader);

        // WHEN: validating the leaf
        let result = validator.validate(&loaded(&pki.leaf));

        // THEN: both steps pass
        assert!(result.is_valid, "{result:?}");
        assert_eq!(
            result.details,
            ValidationDetails {
                time_valid: true,
                chain_valid: true
            }
        );
    }

    #[tokio::test]
    async fn chain_shape_excludes_root_from_intermediates() {
        let pki = TestPki::generate();
        let loader =
            TestPki::loader(&[("root", &pki.root), ("intermediate", &pki.intermediate)]).await;
        let validator = ChainValidator::new(loader);
        let leaf = loaded(&pki.leaf);

        let chain = validator.build_chain(&leaf);

        assert_eq!(chain.intermediates.len(), 1);
        assert_eq!(chain.intermediates[0].common_name.as_deref(), Some("Example Intermediate CA"));
        assert_eq!(chain.root.unwrap().common_name.as_deref(), Some("Example Root CA"));
        assert_eq!(chain.path().len(), 3);
    }

    #[tokio::test]
    async fn missing_intermediate_fails_as_untrusted() {
        // GIVEN: only the root is trusted
        let pki = TestPki::generate();
        let loader = TestPki::loader(&[("root", &pki.root)]).await;
        let validator = ChainValidator::new(loader);

        let result = validator.validate(&loaded(&pki.leaf));

        assert!(!result.is_valid);
        assert!(result.details.time_valid);
        assert!(!result.details.chain_valid);
        assert!(result.error.unwrap().contains("trusted root"));
    }

    #[tokio::test]
    async fn root_with_same_subject_but_other_key_is_rejected() {
        // GIVEN: the loader holds a different root that reuses the subject DN
        let pki = TestPki::generate();
        let impostor_key = rcgen::KeyPair::generate().unwrap();
        let impostor = ca_params("Example Root CA").self_signed(&impostor_key).unwrap();
        let loader =
            TestPki::loader(&[("root", &impostor), ("intermediate", &pki.intermediate)]).await;
        let validator = ChainValidator::new(loader);

        let result = validator.validate(&loaded(&pki.leaf));

        // THEN: the root is found, but the intermediate's signature fails
        assert!(!result.is_valid);
        assert!(result.error.unwrap().contains("position 1"));
    }

    #[tokio::test]
    async fn trusted_self_signed_leaf_is_its_own_root() {
        let pki = TestPki::generate();
        let loader = TestPki::loader(&[("root", &pki.root)]).await;
        let validator = ChainValidator::new(loader);
        let root = loaded(&pki.root);

        let chain = validator.build_chain(&root);
        assert!(chain.intermediates.is_empty());
        assert!(chain.root.is_some());
        assert!(validator.validate(&root).is_valid);
    }

    #[tokio::test]
    async fn expired_leaf_fails_time_check_first() {
        let pki = TestPki::generate();
        let loader =
            TestPki::loader(&[("root", &pki.root), ("intermediate", &pki.intermediate)]).await;
        let validator = ChainValidator::new(loader);

        let mut params = leaf_params("old.example.com");
        params.not_before = date_time_ymd(2000, 1, 1);
        params.not_after = date_time_ymd(2001, 1, 1);
        let expired = TestPki::issue(&pki.intermediate_issuer, params);

        let result = validator.validate(&loaded(&expired));

        assert!(!result.is_valid);
        assert_eq!(result.details, ValidationDetails::default());
        assert!(result.error.unwrap().contains("expired"));
    }

    #[tokio::test]
    async fn grace_period_tolerates_small_skew() {
        let pki = TestPki::generate();
        let loader =
            TestPki::loader(&[("root", &pki.root), ("intermediate", &pki.intermediate)]).await;
        let validator = ChainValidator::new(loader);
        let leaf = loaded(&pki.leaf);

        // 4 minutes before validFrom: tolerated
        let early = leaf.valid_from - TimeDelta::minutes(4);
        assert!(validator.validate_at(&leaf, early).details.time_valid);

        // 6 minutes before validFrom: rejected
        let too_early = leaf.valid_from - TimeDelta::minutes(6);
        let result = validator.validate_at(&leaf, too_early);
        assert!(!result.details.time_valid);
        assert!(result.error.unwrap().contains("not yet valid"));

        // 4 minutes after validTo: tolerated; 6 minutes: rejected
        assert!(validator.validate_at(&leaf, leaf.valid_to + TimeDelta::minutes(4)).details.time_valid);
        assert!(!validator.validate_at(&leaf, leaf.valid_to + TimeDelta::minutes(6)).details.time_valid);
    }

    #[tokio::test]
    async fn validation_is_idempotent() {
        let pki = TestPki::generate();
        let loader = TestPki::loader(&[("root", &pki.root)]).await;
        let validator = ChainValidator::new(loader);
        let leaf = loaded(&pki.leaf);
        let now = Utc::now();

        assert_eq!(validator.validate_at(&leaf, now), validator.validate_at(&leaf, now));
    }

    #[tokio::test]
    async fn depth_bound_stops_long_chains() {
        // GIVEN: 11 CAs stacked under one root, all trusted
        let root_key = rcgen::KeyPair::generate().unwrap();
        let root_params = ca_params("Deep Root");
        let root = root_params.self_signed(&root_key).unwrap();
        let mut issuer = rcgen::Issuer::new(root_params, root_key);
        let mut certs = vec![("root".to_string(), root)];
        for i in 0..11 {
            let key = rcgen::KeyPair::generate().unwrap();
            let params = ca_params(&format!("Level {i}"));
            let cert = params.signed_by(&key, &issuer).unwrap();
            issuer = rcgen::Issuer::new(params, key);
            certs.push((format!("level{i}"), cert));
        }
        let leaf = TestPki::issue(&issuer, leaf_params("deep.example.com"));
        let refs: Vec<(&str, &rcgen::Certificate)> =
            certs.iter().map(|(n, c)| (n.as_str(), c)).collect();
        let validator = ChainValidator::new(TestPki::loader(&refs).await);

        // WHEN: walking from the leaf
        let leaf = loaded(&leaf);
        let chain = validator.build_chain(&leaf);

        // THEN: the walk stops at the bound without reaching the root
        assert_eq!(chain.intermediates.len(), MAX_CHAIN_DEPTH);
        assert!(chain.root.is_none());
        assert!(!validator.validate(&leaf).is_valid);
    }
}
