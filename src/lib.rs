//! Provider authentication library
//!
//! Request-time access control for HTTP services behind a TLS-terminating
//! proxy.
//!
//! # Features
//!
//! - **Open / Basic / mTLS**: strategies selected and combined from configuration
//! - **Proxy-terminated mTLS**: trusts the proxy's verdict, checks subject and
//!   issuer trust lists, optionally re-validates the forwarded certificate chain
//! - **CA loading**: remote CA certificates fetched once with bounded retry
//! - **Chain validation**: validity window with clock-skew grace, issuer walk,
//!   signature checks up to a trusted root
//! - **Federated callers**: trusted-subject check on a single identity header

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod dn;
pub mod error;
pub mod gateway;
pub mod mtls;
pub mod ucl;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    }
    .map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
