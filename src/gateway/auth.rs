//! Authentication dispatcher and middleware
//!
//! Supports:
//! - Open access (no checks)
//! - HTTP Basic with SHA-256 password digests
//! - Proxy-terminated mTLS (see [`crate::mtls`])
//! - A trusted-subject guard for federated caller endpoints (see [`crate::ucl`])
//! - Public paths that bypass authentication
//!
//! Per request: UCL guard (on its endpoints), public paths, then the
//! configured strategies in the order Open, Basic, mTLS. The first strategy
//! that allows wins.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::Result;
use crate::config::{AuthType, AuthenticationConfig, Config};
use crate::mtls::{ClientCertificateInfo, HttpFetcher, PlatformMtlsHandler, RemoteFetcher};
use crate::ucl::UclMtlsValidator;

/// Prefix marking a SHA-256 password digest
pub const SHA256_PREFIX: &str = "sha256:";

/// Message when no strategy accepted the request
pub const AUTHENTICATION_REQUIRED: &str = "Authentication required.";

/// Message when the UCL guard rejects the caller
pub const UNTRUSTED_CALLER: &str = "Untrusted caller";

// ─────────────────────────────────────────────────────────────────────────────
// Decisions
// ─────────────────────────────────────────────────────────────────────────────

/// How a client was let in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Open access
    Open,
    /// Public path
    Public,
    /// HTTP Basic
    Basic,
    /// Client certificate
    Mtls,
}

/// Information about an authenticated client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedClient {
    /// Client name (username, certificate CN, or a fixed label)
    pub name: String,
    /// Strategy that accepted the client
    pub method: AuthMethod,
    /// Forwarded certificate details (mTLS only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<ClientCertificateInfo>,
}

impl AuthenticatedClient {
    fn anonymous(name: &str, method: AuthMethod) -> Self {
        Self {
            name: name.to_string(),
            method,
            certificate: None,
        }
    }
}

/// A rejected request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    /// Response status (401 or 500)
    pub status: StatusCode,
    /// Response message
    pub message: String,
    /// `WWW-Authenticate` challenge, if any
    pub www_authenticate: Option<String>,
}

impl AuthFailure {
    /// 401 without a challenge
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
            www_authenticate: None,
        }
    }

    /// Attach a Basic challenge for `realm`
    #[must_use]
    pub fn with_basic_challenge(mut self, realm: &str) -> Self {
        self.www_authenticate = Some(format!("Basic realm=\"{realm}\""));
        self
    }
}

impl IntoResponse for AuthFailure {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.status.as_u16(),
                "message": self.message
            }
        }));
        let mut response = (self.status, body).into_response();
        if let Some(challenge) = self
            .www_authenticate
            .and_then(|c| HeaderValue::from_str(&c).ok())
        {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, challenge);
        }
        response
    }
}

/// Result of [`Authenticator::authenticate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// Continue processing
    Allow(AuthenticatedClient),
    /// Reject
    Deny(AuthFailure),
}

impl AuthDecision {
    /// Whether the request was allowed
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }
}

/// Why Basic authentication failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BasicFailure {
    /// No `Authorization` header
    #[error("Authorization header missing")]
    HeaderMissing,
    /// `Authorization` header without the `Basic ` scheme
    #[error("Invalid authentication type")]
    InvalidType,
    /// Unknown user, wrong password, or undecodable credentials
    #[error("Invalid credentials")]
    InvalidCredentials,
}

// ─────────────────────────────────────────────────────────────────────────────
// Password digests
// ─────────────────────────────────────────────────────────────────────────────

/// Digest to configure for `password`: `sha256:<hex>`
#[must_use]
pub fn hash_password(password: &str) -> String {
    format!("{SHA256_PREFIX}{}", hex::encode(Sha256::digest(password.as_bytes())))
}

/// Compare `password` to a configured digest in constant time.
///
/// The `sha256:` prefix is optional and hex case is ignored.
#[must_use]
pub fn verify_password(password: &str, digest: &str) -> bool {
    let expected = digest
        .strip_prefix(SHA256_PREFIX)
        .unwrap_or(digest)
        .to_ascii_lowercase();
    let actual = hex::encode(Sha256::digest(password.as_bytes()));
    actual.as_bytes().ct_eq(expected.as_bytes()).into()
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────────────────────────────────────

/// Per-request authentication over the resolved configuration
#[derive(Debug)]
pub struct Authenticator {
    config: AuthenticationConfig,
    mtls: Option<PlatformMtlsHandler>,
    ucl: Option<UclGuard>,
}

#[derive(Debug)]
struct UclGuard {
    validator: UclMtlsValidator,
    endpoints: Vec<String>,
}

impl Authenticator {
    /// Create a dispatcher; `fetcher` is used for CA and trust-list fetches.
    #[must_use]
    pub fn new(config: AuthenticationConfig, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        let mtls = config
            .mtls
            .as_ref()
            .map(|mtls| PlatformMtlsHandler::new(mtls, fetcher));
        Self {
            config,
            mtls,
            ucl: None,
        }
    }

    /// Guard requests under `endpoints` with `validator`.
    #[must_use]
    pub fn with_ucl(mut self, validator: UclMtlsValidator, endpoints: Vec<String>) -> Self {
        self.ucl = Some(UclGuard {
            validator,
            endpoints,
        });
        self
    }

    /// Resolve everything from the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let resolved = config.auth.resolve()?;
        let mut authenticator = Self::new(resolved, Arc::new(HttpFetcher::new()));
        if let Some(validator) = config.ucl.validator()? {
            authenticator = authenticator.with_ucl(validator, config.ucl.endpoint_prefixes()?);
        }
        Ok(authenticator)
    }

    /// The resolved configuration
    #[must_use]
    pub fn config(&self) -> &AuthenticationConfig {
        &self.config
    }

    /// The mTLS handler, when mTLS is active
    #[must_use]
    pub fn mtls_handler(&self) -> Option<&PlatformMtlsHandler> {
        self.mtls.as_ref()
    }

    /// Check if a path is public (bypasses auth)
    #[must_use]
    pub fn is_public_path(&self, path: &str) -> bool {
        self.config.public_paths.iter().any(|p| path.starts_with(p))
    }

    /// Check if a path is guarded by the UCL validator
    #[must_use]
    pub fn is_ucl_path(&self, path: &str) -> bool {
        self.ucl
            .as_ref()
            .is_some_and(|g| g.endpoints.iter().any(|p| path.starts_with(p)))
    }

    /// Decide whether a request for `path` with `headers` may proceed.
    pub async fn authenticate(&self, path: &str, headers: &HeaderMap) -> AuthDecision {
        if let Some(guard) = self.ucl.as_ref().filter(|_| self.is_ucl_path(path)) {
            let result = guard.validator.validate(Some(headers));
            if !result.ok {
                warn!(
                    path = %path,
                    reason = ?result.reason,
                    subject = ?result.subject,
                    "UCL caller rejected"
                );
                return AuthDecision::Deny(AuthFailure::unauthorized(UNTRUSTED_CALLER));
            }
        }

        if self.is_public_path(path) {
            debug!(path = %path, "Public path, skipping auth");
            return AuthDecision::Allow(AuthenticatedClient::anonymous("public", AuthMethod::Public));
        }

        if self.config.has(AuthType::Open) {
            return AuthDecision::Allow(AuthenticatedClient::anonymous("anonymous", AuthMethod::Open));
        }

        let mut denials = Vec::with_capacity(self.config.types.len());

        if self.config.has(AuthType::Basic) {
            match self.authenticate_basic(headers) {
                Ok(client) => {
                    debug!(client = %client.name, path = %path, "Basic authentication succeeded");
                    return AuthDecision::Allow(client);
                }
                Err(failure) => {
                    debug!(path = %path, reason = %failure, "Basic authentication failed");
                    denials.push(self.basic_denial(failure));
                }
            }
        }

        if let Some(handler) = &self.mtls {
            match handler.authenticate(headers).await {
                Ok(info) => {
                    return AuthDecision::Allow(AuthenticatedClient {
                        name: info.display_name().to_string(),
                        method: AuthMethod::Mtls,
                        certificate: Some(info),
                    });
                }
                Err(e) if e.status() == StatusCode::INTERNAL_SERVER_ERROR => {
                    error!(path = %path, error = %e, "mTLS authentication error");
                    return AuthDecision::Deny(AuthFailure {
                        status: e.status(),
                        message: e.public_message(),
                        www_authenticate: None,
                    });
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "mTLS authentication failed");
                    denials.push(AuthFailure::unauthorized(e.public_message()));
                }
            }
        }

        let failure = if denials.len() == 1 {
            denials.remove(0)
        } else {
            let mut failure = AuthFailure::unauthorized(AUTHENTICATION_REQUIRED);
            if self.config.has(AuthType::Basic) {
                failure = failure.with_basic_challenge(&self.config.realm);
            }
            failure
        };
        AuthDecision::Deny(failure)
    }

    /// Validate the `Authorization: Basic` header against the credentials.
    pub fn authenticate_basic(
        &self,
        headers: &HeaderMap,
    ) -> std::result::Result<AuthenticatedClient, BasicFailure> {
        let value = headers
            .get(header::AUTHORIZATION)
            .ok_or(BasicFailure::HeaderMissing)?
            .to_str()
            .map_err(|_| BasicFailure::InvalidType)?;

        let encoded = value
            .strip_prefix("Basic ")
            .or_else(|| value.strip_prefix("basic "))
            .ok_or(BasicFailure::InvalidType)?;

        let decoded = STANDARD
            .decode(encoded.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or(BasicFailure::InvalidCredentials)?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or(BasicFailure::InvalidCredentials)?;

        match self.config.credentials.get(username) {
            Some(digest) if verify_password(password, digest) => Ok(AuthenticatedClient {
                name: username.to_string(),
                method: AuthMethod::Basic,
                certificate: None,
            }),
            _ => Err(BasicFailure::InvalidCredentials),
        }
    }

    fn basic_denial(&self, failure: BasicFailure) -> AuthFailure {
        let denial = AuthFailure::unauthorized(failure.to_string());
        if failure == BasicFailure::HeaderMissing {
            denial.with_basic_challenge(&self.config.realm)
        } else {
            denial
        }
    }
}

/// Authentication middleware
pub async fn auth_middleware(
    State(authenticator): State<Arc<Authenticator>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    match authenticator.authenticate(&path, request.headers()).await {
        AuthDecision::Allow(client) => {
            // Inject client info for downstream handlers
            request.extensions_mut().insert(client);
            next.run(request).await
        }
        AuthDecision::Deny(failure) => failure.into_response(),
    }
}
