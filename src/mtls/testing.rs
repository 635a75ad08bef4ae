//! Test fixtures: generated PKIs and an in-memory fetcher.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, Issuer,
    KeyPair,
};

use crate::mtls::config::{CaChainSource, FetchRetryConfig};
use crate::mtls::fetch::RemoteFetcher;
use crate::mtls::loader::CertificateLoader;
use crate::{Error, Result};

/// Serves fixed bodies by URL.
pub(crate) struct StaticFetcher {
    bodies: HashMap<String, Vec<u8>>,
    pub(crate) calls: AtomicUsize,
}

impl StaticFetcher {
    pub(crate) fn new(bodies: Vec<(String, Vec<u8>)>) -> Self {
        Self {
            bodies: bodies.into_iter().collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RemoteFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Fetch(format!("404 for {url}")))
    }
}

pub(crate) fn name(cn: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CountryName, "DE");
    dn.push(DnType::OrganizationName, "Example");
    dn.push(DnType::CommonName, cn);
    dn
}

pub(crate) fn ca_params(cn: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = name(cn);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
}

/// Root → intermediate → leaf.
pub(crate) struct TestPki {
    pub(crate) root: Certificate,
    pub(crate) intermediate: Certificate,
    pub(crate) leaf: Certificate,
    pub(crate) intermediate_issuer: Issuer<'static, KeyPair>,
}

impl TestPki {
    pub(crate) fn generate() -> Self {
        let root_key = KeyPair::generate().unwrap();
        let root_params = ca_params("Example Root CA");
        let root = root_params.self_signed(&root_key).unwrap();
        let root_issuer = Issuer::new(root_params, root_key);

        let int_key = KeyPair::generate().unwrap();
        let int_params = ca_params("Example Intermediate CA");
        let intermediate = int_params.signed_by(&int_key, &root_issuer).unwrap();
        let intermediate_issuer = Issuer::new(int_params, int_key);

        let leaf = Self::issue(&intermediate_issuer, leaf_params("client.example.com"));

        Self {
            root,
            intermediate,
            leaf,
            intermediate_issuer,
        }
    }

    pub(crate) fn issue(issuer: &Issuer<'static, KeyPair>, params: CertificateParams) -> Certificate {
        let key = KeyPair::generate().unwrap();
        params.signed_by(&key, issuer).unwrap()
    }

    /// A loader that already holds `certs` under the given names.
    pub(crate) async fn loader(certs: &[(&str, &Certificate)]) -> Arc<CertificateLoader> {
        let definitions: Vec<serde_json::Value> = certs
            .iter()
            .map(|(n, _)| serde_json::json!({ "name": n, "url": format!("https://pki.test/{n}") }))
            .collect();
        let bodies = certs
            .iter()
            .map(|(n, c)| (format!("https://pki.test/{n}"), c.der().to_vec()))
            .collect();

        let loader = CertificateLoader::new(
            CaChainSource::Inline(serde_json::Value::Array(definitions).to_string()),
            FetchRetryConfig::default(),
            Arc::new(StaticFetcher::new(bodies)),
        );
        loader.initialize().await.unwrap();
        Arc::new(loader)
    }
}

pub(crate) fn leaf_params(cn: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = name(cn);
    params
}
