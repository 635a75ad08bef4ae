//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, Issuer,
    KeyPair,
};

use provider_auth::mtls::RemoteFetcher;
use provider_auth::{Error, Result};

/// Serves fixed bodies by URL and counts requests.
#[derive(Default)]
pub struct MapFetcher {
    bodies: HashMap<String, Vec<u8>>,
    pub calls: AtomicUsize,
}

impl MapFetcher {
    pub fn with(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.insert(url.to_string(), body.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteFetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Fetch(format!("404 for {url}")))
    }
}

pub fn name(cn: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CountryName, "DE");
    dn.push(DnType::OrganizationName, "Example");
    dn.push(DnType::CommonName, cn);
    dn
}

fn ca_params(cn: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = name(cn);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
}

/// Root, intermediate and a client leaf issued by the intermediate.
pub struct Pki {
    pub root: Certificate,
    pub intermediate: Certificate,
    pub leaf: Certificate,
}

impl Pki {
    pub fn generate(root_cn: &str) -> Self {
        let root_key = KeyPair::generate().unwrap();
        let root_params = ca_params(root_cn);
        let root = root_params.self_signed(&root_key).unwrap();
        let root_issuer = Issuer::new(root_params, root_key);

        let int_key = KeyPair::generate().unwrap();
        let int_params = ca_params(&format!("{root_cn} Intermediate"));
        let intermediate = int_params.signed_by(&int_key, &root_issuer).unwrap();
        let int_issuer = Issuer::new(int_params, int_key);

        let leaf_key = KeyPair::generate().unwrap();
        let mut leaf_params = CertificateParams::default();
        leaf_params.distinguished_name = name("client.example.com");
        let leaf = leaf_params.signed_by(&leaf_key, &int_issuer).unwrap();

        Self {
            root,
            intermediate,
            leaf,
        }
    }

    /// Fetcher serving root and intermediate as DER under `https://pki.test/`.
    pub fn fetcher(&self) -> MapFetcher {
        MapFetcher::default()
            .with("https://pki.test/root", self.root.der().to_vec())
            .with("https://pki.test/intermediate", self.intermediate.pem())
    }

    /// The matching CA definitions document.
    pub fn definitions() -> String {
        serde_json::json!([
            { "name": "root", "url": "https://pki.test/root" },
            { "name": "intermediate", "url": "https://pki.test/intermediate" }
        ])
        .to_string()
    }

    /// The leaf PEM, base64-encoded for a forwarded-certificate header.
    pub fn leaf_header(&self) -> String {
        STANDARD.encode(self.leaf.pem())
    }
}

/// Subject DN of the generated client leaf.
pub const LEAF_SUBJECT: &str = "CN=client.example.com,O=Example,C=DE";
