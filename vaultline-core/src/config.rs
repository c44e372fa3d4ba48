//! Session configuration.
//!
//! This module provides:
//! - [`SessionConfig`] - Connection, identity and lifecycle settings for a session
//! - [`TlsConfig`] - CA and client certificate material
//! - [`IdentityConfig`] - Provider namespace and credential source selection
//! - [`LoginConfig`] - Parameters for a login method
//! - [`LifecycleConfig`] - Child token and version probe settings
//!
//! Every struct deserializes from TOML with sensible defaults, and also
//! offers `with_*` builders for programmatic construction.
//!
//! # Example
//!
//! ```
//! use vaultline_core::config::SessionConfig;
//!
//! let config = SessionConfig::new("https://vault.example:8200")
//!     .with_namespace("teamA")
//!     .with_token("s.abc")
//!     .with_max_lease_ttl_seconds(3600);
//!
//! assert_eq!(config.identity.namespace.as_deref(), Some("teamA"));
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::secret::Secret;

/// Address used when none is configured.
pub const DEFAULT_ADDRESS: &str = "https://127.0.0.1:8200";

/// Default number of transport-level retries.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default retry count for check-and-commit style operations.
pub const DEFAULT_MAX_RETRIES_CCC: u32 = 10;

/// Default bound on the derived token lifetime, in seconds.
pub const DEFAULT_MAX_LEASE_TTL_SECONDS: u64 = 1200;

/// Default display name attached to derived tokens.
pub const DEFAULT_TOKEN_NAME: &str = "vaultline";

/// Error type for invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The server address could not be used.
    #[error("invalid address {address:?}: {message}")]
    InvalidAddress { address: String, message: String },

    /// TLS material is inconsistent or unreadable.
    #[error("invalid TLS configuration: {message}")]
    InvalidTls { message: String },

    /// A custom header has an invalid name or value.
    #[error("invalid header {name:?}: {message}")]
    InvalidHeader { name: String, message: String },

    /// The explicit version override is not a semantic version.
    #[error("invalid version_override {value:?}: {message}")]
    InvalidVersionOverride { value: String, message: String },

    /// Reading a file referenced by the configuration failed.
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP transport could not be built.
    #[error("failed to build HTTP transport: {message}")]
    Transport { message: String },
}

/// Complete, immutable description of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Server address, e.g. `https://vault.example:8200`.
    #[serde(default)]
    pub address: String,

    /// TLS material and verification settings.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Headers attached to every request.
    #[serde(default)]
    pub headers: Vec<HeaderConfig>,

    /// Extra attempts made by the transport on retryable failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Retry count callers should use for check-and-commit operations.
    #[serde(default = "default_max_retries_ccc")]
    pub max_retries_ccc: u32,

    /// Lower bound of the per-attempt retry wait, in milliseconds.
    #[serde(default = "default_min_retry_wait_ms")]
    pub min_retry_wait_ms: u64,

    /// Upper bound of the per-attempt retry wait, in milliseconds.
    #[serde(default = "default_max_retry_wait_ms")]
    pub max_retry_wait_ms: u64,

    /// Per-request timeout, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Where the session credential comes from.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Child token and capability probe settings.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_max_retries_ccc() -> u32 {
    DEFAULT_MAX_RETRIES_CCC
}

fn default_min_retry_wait_ms() -> u64 {
    1000
}

fn default_max_retry_wait_ms() -> u64 {
    1500
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            tls: TlsConfig::default(),
            headers: Vec::new(),
            max_retries: default_max_retries(),
            max_retries_ccc: default_max_retries_ccc(),
            min_retry_wait_ms: default_min_retry_wait_ms(),
            max_retry_wait_ms: default_max_retry_wait_ms(),
            timeout_secs: default_timeout_secs(),
            identity: IdentityConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Create a configuration for the given address with default settings.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// The configured address, or [`DEFAULT_ADDRESS`] when blank.
    pub fn effective_address(&self) -> &str {
        let trimmed = self.address.trim();
        if trimmed.is_empty() {
            DEFAULT_ADDRESS
        } else {
            trimmed
        }
    }

    /// Set the provider namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.identity.namespace = Some(namespace.into());
        self
    }

    /// Set an explicit static token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.identity.token = Some(Secret::new(token));
        self
    }

    /// Set the login method block.
    pub fn with_login(mut self, login: LoginConfig) -> Self {
        self.identity.login = Some(login);
        self
    }

    /// Set the TLS configuration.
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Append a custom header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(HeaderConfig {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Set the transport retry count.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the retry wait bounds in milliseconds.
    pub fn with_retry_wait_ms(mut self, min: u64, max: u64) -> Self {
        self.min_retry_wait_ms = min;
        self.max_retry_wait_ms = max;
        self
    }

    /// Set the derived token lifetime bound.
    pub fn with_max_lease_ttl_seconds(mut self, seconds: u64) -> Self {
        self.lifecycle.max_lease_ttl_seconds = seconds;
        self
    }

    /// Use the bootstrap token as-is instead of deriving a child token.
    pub fn with_skip_child_token(mut self, skip: bool) -> Self {
        self.lifecycle.skip_child_token = skip;
        self
    }

    /// Disable the server version probe.
    pub fn with_skip_version_probe(mut self, skip: bool) -> Self {
        self.lifecycle.skip_version_probe = skip;
        self
    }

    /// Use a fixed server version instead of probing.
    pub fn with_version_override(mut self, version: impl Into<String>) -> Self {
        self.lifecycle.version_override = Some(version.into());
        self
    }

    /// Treat a failed version probe as fatal.
    pub fn with_strict_version_check(mut self, strict: bool) -> Self {
        self.lifecycle.strict_version_check = strict;
        self
    }
}

/// TLS material and verification settings.
///
/// Certificate material is given either entirely as file paths, entirely as
/// inline PEM, or not at all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM file containing one or more CA certificates.
    #[serde(default)]
    pub ca_cert_file: Option<PathBuf>,

    /// Directory of PEM encoded CA certificates.
    #[serde(default)]
    pub ca_cert_dir: Option<PathBuf>,

    /// Inline PEM encoded CA certificates.
    #[serde(default)]
    pub ca_cert_pem: Option<String>,

    /// Client certificate file for mutual TLS.
    #[serde(default)]
    pub client_cert_file: Option<PathBuf>,

    /// Client private key file for mutual TLS.
    #[serde(default)]
    pub client_key_file: Option<PathBuf>,

    /// Inline PEM client certificate.
    #[serde(default)]
    pub client_cert_pem: Option<String>,

    /// Inline PEM client private key (PKCS#1, PKCS#8 or SEC1).
    #[serde(default)]
    pub client_key_pem: Option<Secret>,

    /// Name to verify the server certificate against.
    #[serde(default)]
    pub server_name: Option<String>,

    /// Disable certificate verification entirely.
    #[serde(default)]
    pub skip_verify: bool,
}

impl TlsConfig {
    /// Whether any certificate material is given as a file path.
    pub fn has_file_material(&self) -> bool {
        self.ca_cert_file.is_some()
            || self.ca_cert_dir.is_some()
            || self.client_cert_file.is_some()
            || self.client_key_file.is_some()
    }

    /// Whether any certificate material is given inline.
    pub fn has_inline_material(&self) -> bool {
        self.ca_cert_pem.is_some() || self.client_cert_pem.is_some() || self.client_key_pem.is_some()
    }
}

/// A single custom request header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderConfig {
    pub name: String,
    pub value: String,
}

/// Credential source selection and the provider namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Namespace that all session handles are rooted at.
    #[serde(default)]
    pub namespace: Option<String>,

    /// Explicit static token; takes precedence over every other source.
    #[serde(default)]
    pub token: Option<Secret>,

    /// Login method used when no static token is configured.
    #[serde(default)]
    pub login: Option<LoginConfig>,
}

/// A login method and its parameters.
///
/// The `method` key selects the variant when deserializing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginConfig {
    /// Namespace to authenticate in; overrides the provider namespace for login only.
    #[serde(default)]
    pub namespace: Option<String>,

    /// Mount path of the auth method; defaults to the method name.
    #[serde(default)]
    pub mount: Option<String>,

    #[serde(flatten)]
    pub method: LoginMethod,
}

impl LoginConfig {
    /// Create a login block for the given method with the default mount.
    pub fn new(method: LoginMethod) -> Self {
        Self {
            namespace: None,
            mount: None,
            method,
        }
    }

    /// Authenticate in a specific namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Use a non-default mount path.
    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        self.mount = Some(mount.into());
        self
    }
}

/// Supported login methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum LoginMethod {
    /// Machine identity via role and secret IDs.
    #[serde(rename = "approle")]
    AppRole {
        role_id: String,
        #[serde(default)]
        secret_id: Option<Secret>,
    },

    /// Username and password held by Vault.
    Userpass { username: String, password: Secret },

    /// Directory identity.
    Ldap { username: String, password: Secret },

    /// Signed assertion (JWT/OIDC) exchanged for a role.
    Jwt { role: String, jwt: Secret },

    /// Kubernetes service account token read from disk.
    Kubernetes {
        role: String,
        #[serde(default = "default_kubernetes_jwt_file")]
        jwt_file: PathBuf,
    },

    /// Google Cloud identity via a signed JWT.
    Gcp { role: String, jwt: Secret },

    /// TLS client certificate login; uses the transport's client certificate.
    Cert {
        #[serde(default)]
        name: Option<String>,
    },
}

fn default_kubernetes_jwt_file() -> PathBuf {
    PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/token")
}

impl LoginMethod {
    /// Short method name, also the default mount path.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AppRole { .. } => "approle",
            Self::Userpass { .. } => "userpass",
            Self::Ldap { .. } => "ldap",
            Self::Jwt { .. } => "jwt",
            Self::Kubernetes { .. } => "kubernetes",
            Self::Gcp { .. } => "gcp",
            Self::Cert { .. } => "cert",
        }
    }
}

/// Derived token and capability probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Lifetime bound, in seconds, of the derived child token.
    #[serde(default = "default_max_lease_ttl_seconds")]
    pub max_lease_ttl_seconds: u64,

    /// Use the bootstrap token directly.
    #[serde(default)]
    pub skip_child_token: bool,

    /// Display name of the derived child token.
    #[serde(default = "default_token_name")]
    pub token_name: String,

    /// Do not query the server version.
    #[serde(default)]
    pub skip_version_probe: bool,

    /// Fixed server version; disables probing.
    #[serde(default)]
    pub version_override: Option<String>,

    /// Fail session construction when the version probe fails.
    #[serde(default)]
    pub strict_version_check: bool,
}

fn default_max_lease_ttl_seconds() -> u64 {
    DEFAULT_MAX_LEASE_TTL_SECONDS
}

fn default_token_name() -> String {
    DEFAULT_TOKEN_NAME.to_string()
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_lease_ttl_seconds: default_max_lease_ttl_seconds(),
            skip_child_token: false,
            token_name: default_token_name(),
            skip_version_probe: false,
            version_override: None,
            strict_version_check: false,
        }
    }
}
