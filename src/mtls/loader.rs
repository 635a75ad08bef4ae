//! Trusted CA certificate loading.
//!
//! The loader reads a list of [`CertificateDefinition`]s (inline JSON or a
//! file), fetches every certificate concurrently, and indexes the results by
//! logical name and by subject DN.
//!
//! # Lifecycle
//!
//! Initialization is lazy and single-flight: concurrent first callers of
//! [`CertificateLoader::initialize`] wait on one in-progress load instead of
//! each fetching. A failed initialization leaves the loader uninitialized so
//! a later call can try again. Once initialized, lookups are plain reads of
//! immutable maps.
//!
//! # Failure policy
//!
//! - malformed definitions fail before any network call
//! - a single CA that cannot be fetched or parsed is skipped with a warning
//! - if CAs were configured and none loaded, initialization fails

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::dn;
use crate::mtls::certificate::LoadedCertificate;
use crate::mtls::config::{
    CaChainSource, CertificateDefinition, FetchRetryConfig, MtlsConfig, parse_definitions,
};
use crate::mtls::fetch::{RemoteFetcher, fetch_with_retry};
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Index
// ─────────────────────────────────────────────────────────────────────────────

/// Loaded certificates, written once during initialization.
#[derive(Debug, Default)]
struct CertificateIndex {
    definitions: Vec<CertificateDefinition>,
    by_name: HashMap<String, Arc<LoadedCertificate>>,
    by_subject: HashMap<String, Arc<LoadedCertificate>>,
    /// Load order, for stable `get_all` output.
    order: Vec<Arc<LoadedCertificate>>,
}

impl CertificateIndex {
    fn insert(&mut self, name: &str, cert: LoadedCertificate) {
        let cert = Arc::new(cert);
        let subject_key = dn::normalize(&cert.subject_dn);

        if self.by_subject.contains_key(&subject_key) {
            debug!(name = %name, subject = %cert.subject_dn, "Duplicate CA subject, keeping first");
        } else {
            self.by_subject.insert(subject_key, Arc::clone(&cert));
        }
        self.by_name.insert(name.to_string(), Arc::clone(&cert));
        self.order.push(cert);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loader
// ─────────────────────────────────────────────────────────────────────────────

/// Loads and indexes trusted CA certificates.
pub struct CertificateLoader {
    source: CaChainSource,
    retry: FetchRetryConfig,
    fetcher: Arc<dyn RemoteFetcher>,
    index: OnceCell<CertificateIndex>,
}

impl std::fmt::Debug for CertificateLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateLoader")
            .field("source", &self.source)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl CertificateLoader {
    /// Create an uninitialized loader.
    #[must_use]
    pub fn new(
        source: CaChainSource,
        retry: FetchRetryConfig,
        fetcher: Arc<dyn RemoteFetcher>,
    ) -> Self {
        Self {
            source,
            retry,
            fetcher,
            index: OnceCell::new(),
        }
    }

    /// Create a loader for the CA chain named in `config`.
    #[must_use]
    pub fn from_config(config: &MtlsConfig, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        Self::new(config.ca_chain_source(), config.retry.clone(), fetcher)
    }

    /// Whether a CA chain is configured at all.
    #[must_use]
    pub fn has_ca_source(&self) -> bool {
        self.source != CaChainSource::None
    }

    /// Whether a CA chain is configured and produced definitions.
    ///
    /// Only meaningful after [`CertificateLoader::initialize`].
    #[must_use]
    pub fn has_ca_chain(&self) -> bool {
        self.index.get().is_some_and(|idx| !idx.definitions.is_empty())
    }

    /// Load all configured CA certificates, once.
    ///
    /// Returns immediately when already initialized. With no CA source
    /// configured this succeeds without loading anything.
    pub async fn initialize(&self) -> Result<()> {
        self.index.get_or_try_init(|| self.load()).await.map(|_| ())
    }

    /// Whether [`CertificateLoader::initialize`] has completed successfully.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.index.initialized()
    }

    /// Look up a CA by subject DN (order- and whitespace-insensitive).
    #[must_use]
    pub fn get_by_subject(&self, subject_dn: &str) -> Option<&LoadedCertificate> {
        self.index
            .get()?
            .by_subject
            .get(&dn::normalize(subject_dn))
            .map(AsRef::as_ref)
    }

    /// Look up a CA by its logical name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&LoadedCertificate> {
        self.index.get()?.by_name.get(name).map(AsRef::as_ref)
    }

    /// All loaded CAs in load order.
    #[must_use]
    pub fn get_all(&self) -> Vec<&LoadedCertificate> {
        self.index
            .get()
            .map(|idx| idx.order.iter().map(AsRef::as_ref).collect())
            .unwrap_or_default()
    }

    /// The definitions read at initialization.
    #[must_use]
    pub fn get_definitions(&self) -> &[CertificateDefinition] {
        self.index
            .get()
            .map(|idx| idx.definitions.as_slice())
            .unwrap_or_default()
    }

    /// Drop all loaded state. Test harnesses only.
    #[doc(hidden)]
    pub fn reset(&mut self) {
        self.index = OnceCell::new();
    }

    // ── loading ───────────────────────────────────────────────────────────

    async fn load(&self) -> Result<CertificateIndex> {
        let definitions = self.read_definitions().await?;
        if definitions.is_empty() {
            info!("No CA chain configured, client certificates are checked by header only");
            return Ok(CertificateIndex::default());
        }

        debug!(count = definitions.len(), "Loading CA certificates");
        let results = join_all(definitions.iter().map(|def| self.load_one(def))).await;

        let mut index = CertificateIndex::default();
        for (def, result) in definitions.iter().zip(results) {
            match result {
                Ok(cert) => {
                    debug!(
                        name = %def.name,
                        subject = %cert.subject_dn,
                        fingerprint = %cert.fingerprint,
                        "Loaded CA certificate"
                    );
                    index.insert(&def.name, cert);
                }
                Err(e) => {
                    warn!(name = %def.name, url = %def.url, error = %e, "Skipping CA certificate");
                }
            }
        }

        if index.order.is_empty() {
            return Err(Error::LoaderInitialization(format!(
                "none of the {} configured CA certificates could be loaded",
                definitions.len()
            )));
        }

        info!(
            loaded = index.order.len(),
            configured = definitions.len(),
            "CA certificates ready"
        );
        index.definitions = definitions;
        Ok(index)
    }

    async fn read_definitions(&self) -> Result<Vec<CertificateDefinition>> {
        match &self.source {
            CaChainSource::None => Ok(Vec::new()),
            CaChainSource::Inline(json) => parse_definitions(json),
            CaChainSource::File(path) => {
                let json = tokio::fs::read_to_string(path).await.map_err(|e| {
                    Error::Config(format!(
                        "Cannot read CA chain file '{}': {e}",
                        path.display()
                    ))
                })?;
                parse_definitions(&json)
            }
        }
    }

    async fn load_one(&self, def: &CertificateDefinition) -> Result<LoadedCertificate> {
        let bytes = fetch_with_retry(self.fetcher.as_ref(), &self.retry, &def.url).await?;
        LoadedCertificate::from_bytes(&bytes)
    }
}
