//! Remote fetches with bounded retry.
//!
//! CA certificates and trust-list documents are pulled over HTTP. Each
//! attempt is capped by a timeout; failed attempts are retried with an
//! exponential delay until `max_attempts` is reached.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::mtls::config::FetchRetryConfig;
use crate::{Error, Result};

/// Something that can fetch the body of a URL.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Fetch `url` and return the raw body.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// `reqwest`-backed fetcher.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with its own connection pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(concat!("provider-auth/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!("{url} returned HTTP {status}")));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Delay schedule for `policy`.
///
/// Failed attempt `n` (1-based) is followed by `base_delay * 2^n`, without
/// jitter, for at most `max_attempts - 1` retries.
#[must_use]
pub fn backoff(policy: &FetchRetryConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_factor(2.0)
        .with_min_delay(policy.base_delay.saturating_mul(2))
        .without_max_delay()
        .with_max_times(policy.max_attempts.saturating_sub(1) as usize)
}

/// Run `op` under the retry policy.
///
/// Each attempt is bounded by `policy.attempt_timeout`; a timeout counts as a
/// retryable failure. Non-retryable errors are returned immediately.
pub async fn with_retry<F, Fut, T>(policy: &FetchRetryConfig, name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempt_timeout = policy.attempt_timeout;
    let mut attempts = 0u32;

    let result = (|| {
        attempts += 1;
        let attempt = op();
        async move {
            timeout(attempt_timeout, attempt).await.unwrap_or_else(|_| {
                Err(Error::Fetch(format!(
                    "attempt timed out after {}ms",
                    attempt_timeout.as_millis()
                )))
            })
        }
    })
    .retry(backoff(policy))
    .when(Error::is_retryable)
    .notify(|e: &Error, delay: Duration| {
        debug!(
            operation = name,
            delay_ms = delay.as_millis(),
            error = %e,
            "Retrying after backoff"
        );
    })
    .await;

    if let Err(e) = &result {
        if e.is_retryable() {
            warn!(operation = name, attempts, "Max retry attempts reached");
        }
    }
    result
}

/// Fetch `url` through `fetcher` under the retry policy.
pub async fn fetch_with_retry(
    fetcher: &dyn RemoteFetcher,
    policy: &FetchRetryConfig,
    url: &str,
) -> Result<Vec<u8>> {
    with_retry(policy, url, || fetcher.fetch(url)).await
}
