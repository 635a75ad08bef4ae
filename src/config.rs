//! Configuration management
//!
//! Settings come from an optional YAML file merged with environment
//! variables prefixed `PROVIDER_AUTH_` (`__` separates nested keys):
//!
//! ```text
//! PROVIDER_AUTH_AUTH__TYPES=basic,mtls
//! PROVIDER_AUTH_AUTH__BASIC_CREDENTIALS={"admin":"sha256:2bb8..."}
//! PROVIDER_AUTH_AUTH__MTLS={"trustedSubjects":["CN=caller,O=Example"]}
//! ```
//!
//! Authentication settings accept both structured values and JSON-encoded
//! strings, since platforms often only offer flat string variables. They
//! are turned into an [`AuthenticationConfig`] by [`AuthSettings::resolve`].

use std::collections::{BTreeSet, HashMap};
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::mtls::config::MtlsConfig;
use crate::ucl::{DEFAULT_HEADER, UclMtlsValidator, UclValidatorOptions};
use crate::{Error, Result};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "PROVIDER_AUTH_";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthSettings,
    /// Trusted-subject check for federated callers
    pub ucl: UclConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authentication types
// ─────────────────────────────────────────────────────────────────────────────

/// Authentication strategy. Ordered by dispatch priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    /// No authentication
    Open,
    /// HTTP Basic with hashed passwords
    Basic,
    /// Proxy-terminated mutual TLS
    Mtls,
}

impl AuthType {
    /// Configuration name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Basic => "basic",
            Self::Mtls => "mtls",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "basic" => Ok(Self::Basic),
            "mtls" => Ok(Self::Mtls),
            other => Err(Error::Config(format!(
                "Unknown authentication type '{other}' (expected open, basic or mtls)"
            ))),
        }
    }
}

/// What to do with a credentials or mTLS setting that cannot be parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidConfigPolicy {
    /// Log and treat the setting as absent. Absent settings still deny.
    #[default]
    Degrade,
    /// Refuse to start.
    Reject,
}

// ─────────────────────────────────────────────────────────────────────────────
// Raw settings
// ─────────────────────────────────────────────────────────────────────────────

/// A list given either structurally or as one encoded string
/// (a JSON array, or comma-separated values).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListSetting {
    /// `[a, b]`
    List(Vec<String>),
    /// `'["a","b"]'` or `"a,b"`
    Encoded(String),
}

impl Default for ListSetting {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl ListSetting {
    /// The trimmed, non-empty items.
    pub fn items(&self) -> Result<Vec<String>> {
        let raw = match self {
            Self::List(items) => items.clone(),
            Self::Encoded(value) if value.trim_start().starts_with('[') => {
                serde_json::from_str(value)
                    .map_err(|e| Error::Config(format!("Invalid JSON list '{value}': {e}")))?
            }
            Self::Encoded(value) => value.split(',').map(str::to_owned).collect(),
        };
        Ok(raw
            .into_iter()
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect())
    }
}

/// A setting given structurally or as a JSON-encoded string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EncodedSetting<T> {
    /// JSON text, decoded at resolution
    Encoded(String),
    /// Already structured
    Value(T),
}

impl<T: serde::de::DeserializeOwned + Clone> EncodedSetting<T> {
    /// Decode if needed.
    pub fn decode(&self) -> std::result::Result<T, serde_json::Error> {
        match self {
            Self::Value(value) => Ok(value.clone()),
            Self::Encoded(json) => serde_json::from_str(json),
        }
    }
}

/// Authentication settings as configured
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Active strategies (default: `["open"]`)
    pub types: ListSetting,

    /// Basic credentials: username to password digest (`sha256:<hex>`).
    /// Digests support `env:VAR_NAME`.
    pub basic_credentials: Option<EncodedSetting<HashMap<String, String>>>,

    /// mTLS settings
    pub mtls: Option<EncodedSetting<MtlsConfig>>,

    /// Realm announced in `WWW-Authenticate`
    pub realm: String,

    /// Paths that bypass authentication (default: `["/health"]`)
    pub public_paths: Vec<String>,

    /// Handling of unparseable credentials or mTLS settings
    pub invalid_config: InvalidConfigPolicy,
}

fn default_public_paths() -> Vec<String> {
    vec!["/health".to_string()]
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            types: ListSetting::List(vec!["open".to_string()]),
            basic_credentials: None,
            mtls: None,
            realm: "Restricted".to_string(),
            public_paths: default_public_paths(),
            invalid_config: InvalidConfigPolicy::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolved configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Validated authentication configuration, fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationConfig {
    /// Active strategies, in dispatch order
    pub types: BTreeSet<AuthType>,
    /// Username to password digest
    pub credentials: HashMap<String, String>,
    /// mTLS settings, present iff `types` contains [`AuthType::Mtls`]
    pub mtls: Option<MtlsConfig>,
    /// Basic realm
    pub realm: String,
    /// Paths that bypass authentication
    pub public_paths: Vec<String>,
}

impl AuthenticationConfig {
    /// Whether `auth_type` is active.
    #[must_use]
    pub fn has(&self, auth_type: AuthType) -> bool {
        self.types.contains(&auth_type)
    }
}

impl AuthSettings {
    /// Validate and resolve into an [`AuthenticationConfig`].
    ///
    /// # Errors
    ///
    /// - `open` combined with another type, or an unknown type name
    /// - mTLS active without usable settings or trust source
    /// - malformed inline CA definitions
    /// - unparseable credentials or mTLS settings under
    ///   [`InvalidConfigPolicy::Reject`]
    pub fn resolve(&self) -> Result<AuthenticationConfig> {
        let mut types = self
            .types
            .items()?
            .iter()
            .map(|t| t.parse::<AuthType>())
            .collect::<Result<BTreeSet<_>>>()?;
        if types.is_empty() {
            types.insert(AuthType::Open);
        }
        if types.contains(&AuthType::Open) && types.len() > 1 {
            return Err(Error::Config(
                "Open authentication cannot be combined with any other authentication type"
                    .to_string(),
            ));
        }

        let credentials = if types.contains(&AuthType::Basic) {
            self.resolve_credentials()?
        } else {
            HashMap::new()
        };

        let mtls = if types.contains(&AuthType::Mtls) {
            Some(self.resolve_mtls()?)
        } else {
            if self.mtls.is_some() {
                debug!("mTLS settings present but mtls authentication is not enabled");
            }
            None
        };

        Ok(AuthenticationConfig {
            types,
            credentials,
            mtls,
            realm: self.realm.clone(),
            public_paths: self.public_paths.clone(),
        })
    }

    fn resolve_credentials(&self) -> Result<HashMap<String, String>> {
        let decoded = match self.basic_credentials.as_ref().map(EncodedSetting::decode) {
            None => HashMap::new(),
            Some(Ok(map)) => map,
            Some(Err(e)) => self.on_invalid("basic_credentials", &e)?.unwrap_or_default(),
        };

        let credentials: HashMap<String, String> = decoded
            .into_iter()
            .map(|(user, digest)| (user, resolve_env_reference(&digest)))
            .collect();
        if credentials.is_empty() {
            warn!("Basic authentication has no credentials, every login will be rejected");
        }
        Ok(credentials)
    }

    fn resolve_mtls(&self) -> Result<MtlsConfig> {
        let config = match self.mtls.as_ref().map(EncodedSetting::decode) {
            Some(Ok(config)) => Some(config),
            Some(Err(e)) => self.on_invalid("mtls", &e)?,
            None => None,
        };
        let config = config.ok_or_else(|| {
            Error::Config("mTLS authentication is enabled but no mtls settings are usable".into())
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply the invalid-config policy. `Ok(None)` means "treat as absent".
    fn on_invalid<T>(&self, setting: &str, err: &serde_json::Error) -> Result<Option<T>> {
        match self.invalid_config {
            InvalidConfigPolicy::Reject => Err(Error::Config(format!(
                "Setting '{setting}' is not valid JSON: {err}"
            ))),
            InvalidConfigPolicy::Degrade => {
                warn!(setting, error = %err, "Ignoring unparseable authentication setting");
                Ok(None)
            }
        }
    }
}

/// Expand `env:VAR_NAME`; other values pass through.
fn resolve_env_reference(value: &str) -> String {
    match value.strip_prefix("env:") {
        Some(var_name) => env::var(var_name).unwrap_or_else(|_| {
            warn!(var = var_name, "Credential references unset environment variable");
            value.to_string()
        }),
        None => value.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// UCL
// ─────────────────────────────────────────────────────────────────────────────

/// Trusted-subject check for federated callers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UclConfig {
    /// Accepted caller subject DNs
    pub expected_subjects: Vec<String>,
    /// Header carrying the caller identity
    pub header_name: String,
    /// Request path prefixes guarded by the check
    pub endpoints: ListSetting,
}

impl Default for UclConfig {
    fn default() -> Self {
        Self {
            expected_subjects: Vec::new(),
            header_name: DEFAULT_HEADER.to_string(),
            endpoints: ListSetting::default(),
        }
    }
}

impl UclConfig {
    /// Guarded path prefixes.
    pub fn endpoint_prefixes(&self) -> Result<Vec<String>> {
        self.endpoints.items()
    }

    /// Build the validator, or `None` when no endpoint is guarded.
    pub fn validator(&self) -> Result<Option<UclMtlsValidator>> {
        if self.endpoint_prefixes()?.is_empty() {
            return Ok(None);
        }
        UclMtlsValidator::new(UclValidatorOptions {
            expected_subjects: self.expected_subjects.clone(),
            header_name: Some(self.header_name.clone()),
        })
        .map(Some)
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // "ms" before "s"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    fn settings(types: &[&str]) -> AuthSettings {
        AuthSettings {
            types: ListSetting::List(types.iter().map(|t| (*t).to_string()).collect()),
            ..AuthSettings::default()
        }
    }

    #[test]
    fn test_default_is_open() {
        let resolved = AuthSettings::default().resolve().unwrap();
        assert_eq!(resolved.types, BTreeSet::from([AuthType::Open]));
        assert_eq!(resolved.public_paths, vec!["/health".to_string()]);
        assert_eq!(resolved.realm, "Restricted");
    }

    #[test]
    fn test_open_cannot_be_combined() {
        let err = settings(&["open", "basic"]).resolve().unwrap_err();
        assert!(
            err.to_string()
                .contains("Open authentication cannot be combined with any other authentication type")
        );
    }

    #[test]
    fn test_types_parse_from_encoded_strings() {
        let comma = AuthSettings {
            types: ListSetting::Encoded("Basic, MTLS".into()),
            mtls: Some(EncodedSetting::Encoded(
                r#"{"trustedSubjects":["CN=caller"]}"#.into(),
            )),
            ..AuthSettings::default()
        };
        assert_eq!(
            comma.resolve().unwrap().types,
            BTreeSet::from([AuthType::Basic, AuthType::Mtls])
        );

        let json = AuthSettings {
            types: ListSetting::Encoded(r#"["basic"]"#.into()),
            ..AuthSettings::default()
        };
        assert!(json.resolve().unwrap().has(AuthType::Basic));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = settings(&["kerberos"]).resolve().unwrap_err();
        assert!(err.to_string().contains("kerberos"));
    }

    #[test]
    fn test_malformed_credentials_degrade_to_none() {
        let degraded = AuthSettings {
            basic_credentials: Some(EncodedSetting::Encoded("{not json".into())),
            ..settings(&["basic"])
        };
        let resolved = degraded.resolve().unwrap();
        assert!(resolved.has(AuthType::Basic));
        assert!(resolved.credentials.is_empty());

        let strict = AuthSettings {
            invalid_config: InvalidConfigPolicy::Reject,
            ..degraded
        };
        assert!(strict.resolve().is_err());
    }

    #[test]
    fn test_malformed_mtls_never_resolves() {
        let degraded = AuthSettings {
            mtls: Some(EncodedSetting::Encoded("[broken".into())),
            ..settings(&["mtls"])
        };
        assert!(degraded.resolve().is_err());
    }

    #[test]
    fn test_mtls_requires_trust_source() {
        let empty = AuthSettings {
            mtls: Some(EncodedSetting::Value(MtlsConfig::default())),
            ..settings(&["mtls"])
        };
        let err = empty.resolve().unwrap_err();
        assert!(err.to_string().contains("trust"));
    }

    #[test]
    fn test_mtls_inline_ca_definitions_are_checked() {
        let bad = AuthSettings {
            mtls: Some(EncodedSetting::Value(MtlsConfig {
                ca_chain_file: Some(r#"[{"name":"root"}]"#.into()),
                ..MtlsConfig::default()
            })),
            ..settings(&["mtls"])
        };
        let err = bad.resolve().unwrap_err();
        assert!(err.to_string().contains("'url' must be a non-empty string"));
    }

    #[test]
    fn test_mtls_empty_ca_list_is_not_a_trust_source() {
        // GIVEN: the inline CA list is the only trust source, and it is empty
        for encoded in [r#"{"caChainFile": "[]"}"#, r#"{"caChainFile": " [ ] "}"#] {
            let auth = AuthSettings {
                mtls: Some(EncodedSetting::Encoded(encoded.to_string())),
                ..settings(&["mtls"])
            };
            // THEN: startup fails instead of admitting every caller
            let err = auth.resolve().unwrap_err();
            assert!(err.to_string().contains("lists no CA certificates"), "{err}");
        }
    }

    #[test]
    fn test_credentials_from_yaml_map_and_env_reference() {
        let yaml = r#"
types: [basic]
basic_credentials:
  admin: "sha256:abc"
  robot: "env:PROVIDER_AUTH_TEST_UNSET_DIGEST"
"#;
        let settings: AuthSettings = serde_yaml::from_str(yaml).unwrap();
        let resolved = settings.resolve().unwrap();
        assert_eq!(resolved.credentials["admin"], "sha256:abc");
        // unset variables are kept verbatim and can never match a digest
        assert_eq!(
            resolved.credentials["robot"],
            "env:PROVIDER_AUTH_TEST_UNSET_DIGEST"
        );
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  port: 9999
auth:
  types: [mtls]
  realm: Providers
  mtls:
    trustedIssuers: ["CN=Client CA,O=Example"]
    retry:
      max_attempts: 5
      base_delay: 500ms
ucl:
  expected_subjects: ["CN=aggregator, O=SAP SE, C=DE"]
  endpoints: [/discovery]
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.auth.realm, "Providers");

        let resolved = config.auth.resolve().unwrap();
        let mtls = resolved.mtls.unwrap();
        assert_eq!(mtls.trusted_issuers, vec!["CN=Client CA,O=Example".to_string()]);
        assert_eq!(mtls.retry.max_attempts, 5);
        assert_eq!(mtls.retry.base_delay, Duration::from_millis(500));

        assert_eq!(config.ucl.endpoint_prefixes().unwrap(), vec!["/discovery".to_string()]);
        assert!(config.ucl.validator().unwrap().is_some());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/provider-auth.yaml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_ucl_without_endpoints_is_disabled() {
        assert!(UclConfig::default().validator().unwrap().is_none());

        let missing_subjects = UclConfig {
            endpoints: ListSetting::Encoded("/discovery".into()),
            ..UclConfig::default()
        };
        assert!(missing_subjects.validator().is_err());
    }

    #[test]
    fn test_humantime_round_trip_units() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            #[serde(with = "humantime_serde")]
            d: Duration,
        }

        let parsed: Wrapper = serde_yaml::from_str("d: 2m").unwrap();
        assert_eq!(parsed.d, Duration::from_secs(120));
        let parsed: Wrapper = serde_yaml::from_str("d: 250ms").unwrap();
        assert_eq!(parsed.d, Duration::from_millis(250));

        let out = serde_yaml::to_string(&Wrapper {
            d: Duration::from_millis(250),
        })
        .unwrap();
        assert!(out.contains("250ms"));
    }
}
