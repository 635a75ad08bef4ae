//! Proxy-terminated mutual TLS (mTLS) authentication.
//!
//! TLS is terminated by a front proxy that forwards the client certificate
//! in request headers. This module decides whether to trust what it
//! forwards.
//!
//! # Architecture
//!
//! ```text
//! request headers
//!   → PlatformMtlsHandler   (verify flag, subject/issuer extraction)
//!   → TrustStore            (static lists + config endpoints)
//!   → CertificateLoader     (trusted CAs, fetched once with retry)
//!   → ChainValidator        (validity window, issuer walk, signatures)
//! ```
//!
//! # Modules
//!
//! - [`config`]: `MtlsConfig`, CA definitions, fetch retry settings
//! - [`fetch`]: remote fetch trait, HTTP fetcher, bounded retry
//! - [`certificate`]: `LoadedCertificate`
//! - [`loader`]: `CertificateLoader`
//! - [`chain`]: `ChainValidator`
//! - [`trust`]: `TrustStore`
//! - [`headers`]: `PlatformMtlsHandler`

pub mod certificate;
pub mod chain;
pub mod config;
pub mod fetch;
pub mod headers;
pub mod loader;
pub mod trust;

#[cfg(test)]
pub(crate) mod testing;

pub use certificate::LoadedCertificate;
pub use chain::{CertificateChain, ChainValidator, ValidationDetails, ValidationResult};
pub use config::{CaChainSource, CertificateDefinition, FetchRetryConfig, MtlsConfig};
pub use fetch::{HttpFetcher, RemoteFetcher};
pub use headers::{ClientCertificateInfo, MtlsError, PlatformMtlsHandler};
pub use loader::CertificateLoader;
pub use trust::{TrustLists, TrustStore};
