//! Connection handles and the factory that builds them.
//!
//! This module provides:
//! - [`ClientFactory`] - Validates a [`SessionConfig`] and builds the root handle
//! - [`ConnectionHandle`] - A namespace and token bound view over a shared transport
//! - [`HandleError`] - Errors raised by requests made through a handle
//!
//! Handles are cheap to clone. Every clone shares the same HTTP connection
//! pool, custom headers, retry policy and read-your-writes state, while the
//! namespace and token are copied and can be changed independently.

use parking_lot::Mutex;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Certificate, Identity, Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use zeroize::Zeroizing;

use crate::config::{ConfigError, SessionConfig, TlsConfig};
use crate::secret::Secret;

/// Header carrying the request token.
pub const TOKEN_HEADER: &str = "X-Vault-Token";

/// Header carrying the request namespace.
pub const NAMESPACE_HEADER: &str = "X-Vault-Namespace";

/// Header carrying the replication index for read-your-writes.
pub const INDEX_HEADER: &str = "X-Vault-Index";

const REQUEST_HEADER: HeaderName = HeaderName::from_static("x-vault-request");

/// Error type for requests made through a [`ConnectionHandle`].
#[derive(Debug, Error)]
pub enum HandleError {
    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// The server answered with an error status.
    #[error("{method} {path} returned {status}: {}", .errors.join("; "))]
    Status {
        method: Method,
        path: String,
        status: StatusCode,
        errors: Vec<String>,
    },

    /// The response body could not be decoded.
    #[error("failed to decode response from {path}: {message}")]
    Decode { path: String, message: String },

    /// A namespace cannot be sent as a header value.
    #[error("invalid namespace {namespace:?}: {message}")]
    InvalidNamespace { namespace: String, message: String },
}

impl HandleError {
    /// HTTP status of the failed request, if the server answered.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

/// Retry behaviour applied at the transport boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Lower bound of the wait before the first retry.
    pub min_wait: Duration,
    /// Upper bound of the wait before the first retry.
    pub max_wait: Duration,
}

impl RetryPolicy {
    /// Whether a response status warrants another attempt.
    ///
    /// Server errors are retried except `501 Not Implemented`; `412` is
    /// retried because a replica may not have caught up with a prior write.
    pub fn is_retryable(status: StatusCode) -> bool {
        status == StatusCode::PRECONDITION_FAILED
            || (status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED)
    }

    /// Linear jittered back-off for the given 1-based attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let min = (self.min_wait.as_millis() as u64).saturating_mul(attempt as u64);
        let max = (self.max_wait.as_millis() as u64).saturating_mul(attempt as u64);
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// State shared by every handle cloned from the same root.
#[derive(Debug)]
struct Transport {
    http: reqwest::Client,
    address: Url,
    configured_address: String,
    headers: HeaderMap,
    retry: RetryPolicy,
    last_index: Mutex<Option<HeaderValue>>,
}

/// Builds root connection handles from a [`SessionConfig`].
///
/// Construction performs no network I/O; certificate files are read and
/// parsed up front so invalid material fails before the first request.
pub struct ClientFactory;

impl ClientFactory {
    /// Validate the configuration and build an unauthenticated root handle.
    pub fn build(config: &SessionConfig) -> Result<ConnectionHandle, ConfigError> {
        let mut address = parse_address(config.effective_address())?;
        let headers = build_headers(config)?;
        let retry = RetryPolicy {
            max_retries: config.max_retries,
            min_wait: Duration::from_millis(config.min_retry_wait_ms),
            max_wait: Duration::from_millis(config.max_retry_wait_ms.max(config.min_retry_wait_ms)),
        };

        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent())
            .timeout(Duration::from_secs(config.timeout_secs));
        builder = apply_tls(builder, &config.tls, &mut address)?;

        let http = builder.build().map_err(|e| ConfigError::Transport {
            message: e.to_string(),
        })?;

        tracing::debug!("Built transport for {} (max_retries={})", address, retry.max_retries);

        Ok(ConnectionHandle {
            transport: Arc::new(Transport {
                http,
                address,
                configured_address: config.effective_address().to_string(),
                headers,
                retry,
                last_index: Mutex::new(None),
            }),
            namespace: None,
            token: None,
        })
    }
}

fn user_agent() -> String {
    format!("vaultline/{}", env!("CARGO_PKG_VERSION"))
}

fn parse_address(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidAddress {
        address: raw.to_string(),
        message,
    };

    let url = Url::parse(raw.trim_end_matches('/')).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme {:?}", other))),
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

fn build_headers(config: &SessionConfig) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();
    headers.insert(REQUEST_HEADER, HeaderValue::from_static("true"));

    for header in &config.headers {
        let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|e| {
            ConfigError::InvalidHeader {
                name: header.name.clone(),
                message: e.to_string(),
            }
        })?;
        let value = HeaderValue::from_str(&header.value).map_err(|e| ConfigError::InvalidHeader {
            name: header.name.clone(),
            message: e.to_string(),
        })?;
        headers.append(name, value);
    }

    Ok(headers)
}

fn apply_tls(
    mut builder: reqwest::ClientBuilder,
    tls: &TlsConfig,
    address: &mut Url,
) -> Result<reqwest::ClientBuilder, ConfigError> {
    if tls.has_file_material() && tls.has_inline_material() {
        return Err(ConfigError::InvalidTls {
            message: "certificate material must be given either as files or inline, not both"
                .to_string(),
        });
    }

    for pem in ca_bundles(tls)? {
        let certs = Certificate::from_pem_bundle(&pem).map_err(|e| ConfigError::InvalidTls {
            message: format!("invalid CA certificate: {}", e),
        })?;
        if certs.is_empty() {
            return Err(ConfigError::InvalidTls {
                message: "CA material contains no certificates".to_string(),
            });
        }
        for cert in certs {
            builder = builder.add_root_certificate(cert);
        }
    }

    if let Some((cert, key)) = client_identity(tls)? {
        let mut pem = Zeroizing::new(cert);
        pem.push(b'\n');
        pem.extend_from_slice(&key);
        let identity = Identity::from_pem(&pem).map_err(|e| ConfigError::InvalidTls {
            message: format!("invalid client certificate or key: {}", e),
        })?;
        builder = builder.identity(identity);
    }

    if let Some(server_name) = tls.server_name.as_deref().filter(|s| !s.is_empty()) {
        builder = pin_server_name(builder, server_name, address)?;
    }

    if tls.skip_verify {
        tracing::warn!("TLS certificate verification is disabled");
        builder = builder.danger_accept_invalid_certs(true);
    }

    Ok(builder)
}

fn ca_bundles(tls: &TlsConfig) -> Result<Vec<Vec<u8>>, ConfigError> {
    let mut bundles = Vec::new();

    if let Some(pem) = &tls.ca_cert_pem {
        bundles.push(pem.as_bytes().to_vec());
    }
    if let Some(path) = &tls.ca_cert_file {
        bundles.push(read_file(path)?);
    }
    if let Some(dir) = &tls.ca_cert_dir {
        let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::Io {
            path: dir.clone(),
            source,
        })?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ConfigError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        if paths.is_empty() {
            return Err(ConfigError::InvalidTls {
                message: format!("CA directory {:?} contains no certificates", dir),
            });
        }
        for path in paths {
            bundles.push(read_file(&path)?);
        }
    }

    Ok(bundles)
}

/// Client certificate and key PEM. The key may be PKCS#1, PKCS#8 or SEC1.
fn client_identity(
    tls: &TlsConfig,
) -> Result<Option<(Vec<u8>, Zeroizing<Vec<u8>>)>, ConfigError> {
    let cert = match (&tls.client_cert_file, &tls.client_cert_pem) {
        (Some(path), None) => Some(read_file(path)?),
        (None, Some(pem)) => Some(pem.as_bytes().to_vec()),
        _ => None,
    };
    let key = match (&tls.client_key_file, &tls.client_key_pem) {
        (Some(path), None) => Some(Zeroizing::new(read_file(path)?)),
        (None, Some(pem)) => Some(Zeroizing::new(pem.expose().as_bytes().to_vec())),
        _ => None,
    };

    match (cert, key) {
        (Some(cert), Some(key)) => Ok(Some((cert, key))),
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigError::InvalidTls {
            message: "client certificate given without a client key".to_string(),
        }),
        (None, Some(_)) => Err(ConfigError::InvalidTls {
            message: "client key given without a client certificate".to_string(),
        }),
    }
}

/// Verify the server certificate against `server_name` by addressing the
/// server through that name and pinning it to the configured IP.
fn pin_server_name(
    builder: reqwest::ClientBuilder,
    server_name: &str,
    address: &mut Url,
) -> Result<reqwest::ClientBuilder, ConfigError> {
    let host = address.host_str().unwrap_or_default().trim_matches(|c| c == '[' || c == ']');
    let Ok(ip) = host.parse::<IpAddr>() else {
        if host != server_name {
            tracing::warn!(
                "tls server_name {:?} is only applied to IP addresses, verifying against {:?}",
                server_name,
                host
            );
        }
        return Ok(builder);
    };

    let port = address.port_or_known_default().unwrap_or(8200);
    address
        .set_host(Some(server_name))
        .map_err(|e| ConfigError::InvalidTls {
            message: format!("invalid server_name {:?}: {}", server_name, e),
        })?;

    Ok(builder.resolve(server_name, SocketAddr::new(ip, port)))
}

fn read_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// A connection bound to one namespace and one token.
///
/// `Clone` copies the namespace and token and shares the transport.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    transport: Arc<Transport>,
    namespace: Option<HeaderValue>,
    token: Option<Secret>,
}

impl ConnectionHandle {
    /// Server address requests are sent to.
    pub fn address(&self) -> &Url {
        &self.transport.address
    }

    /// Server address as it was configured, before normalization or
    /// server name pinning.
    pub fn configured_address(&self) -> &str {
        &self.transport.configured_address
    }

    /// Retry policy of the shared transport.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.transport.retry
    }

    /// Current namespace, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_ref().and_then(|v| v.to_str().ok())
    }

    /// Set the namespace sent with every request.
    ///
    /// Fails if the namespace cannot be represented as a header value.
    pub fn set_namespace(&mut self, namespace: &str) -> Result<(), HandleError> {
        let value = HeaderValue::from_str(namespace).map_err(|e| HandleError::InvalidNamespace {
            namespace: namespace.to_string(),
            message: e.to_string(),
        })?;
        self.namespace = Some(value);
        Ok(())
    }

    /// Remove the namespace from this handle.
    pub fn clear_namespace(&mut self) {
        self.namespace = None;
    }

    /// Clone this handle with a different namespace.
    pub fn with_namespace(&self, namespace: &str) -> Result<Self, HandleError> {
        let mut clone = self.clone();
        clone.set_namespace(namespace)?;
        Ok(clone)
    }

    /// Current token, if any.
    pub fn token(&self) -> Option<&Secret> {
        self.token.as_ref()
    }

    /// Replace the token sent with every request.
    pub fn set_token(&mut self, token: Secret) {
        self.token = Some(token);
    }

    /// Whether this handle carries a non-blank token.
    pub fn has_token(&self) -> bool {
        self.token.as_ref().is_some_and(|t| !t.is_blank())
    }

    /// Whether two handles share the same transport.
    pub fn shares_transport_with(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.transport, &other.transport)
    }

    /// `GET /v1/{path}`.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, HandleError> {
        self.request(Method::GET, path, None).await
    }

    /// `POST /v1/{path}` with a JSON body.
    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, HandleError> {
        self.request(Method::POST, path, Some(body)).await
    }

    /// Send a request, retrying per the transport's [`RetryPolicy`].
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, HandleError> {
        let path = path.trim_start_matches('/');
        let bytes = self.send(&method, path, body).await?;
        serde_json::from_slice(&bytes).map_err(|e| HandleError::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    async fn send(
        &self,
        method: &Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, HandleError> {
        let retry = self.transport.retry;
        let mut attempt = 0;

        loop {
            let result = self.send_once(method, path, body).await;
            let retryable = match &result {
                Ok(_) => false,
                Err(HandleError::Network(e)) => !e.is_builder(),
                Err(HandleError::Status { status, .. }) => RetryPolicy::is_retryable(*status),
                Err(_) => false,
            };

            if !retryable || attempt >= retry.max_retries {
                return result;
            }

            attempt += 1;
            let wait = retry.backoff(attempt);
            if let Err(e) = &result {
                tracing::debug!(
                    "{} {} failed ({}), retry {}/{} in {:?}",
                    method,
                    path,
                    e,
                    attempt,
                    retry.max_retries,
                    wait
                );
            }
            tokio::time::sleep(wait).await;
        }
    }

    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, HandleError> {
        let transport = &self.transport;
        let url = format!("{}/v1/{}", transport.address.as_str().trim_end_matches('/'), path);

        let mut request = transport
            .http
            .request(method.clone(), &url)
            .headers(transport.headers.clone());
        if let Some(token) = self.token.as_ref().filter(|t| !t.is_blank()) {
            request = request.header(TOKEN_HEADER, token.expose());
        }
        if let Some(namespace) = &self.namespace {
            request = request.header(NAMESPACE_HEADER, namespace.clone());
        }
        if let Some(index) = transport.last_index.lock().clone() {
            request = request.header(INDEX_HEADER, index);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(HandleError::Network)?;

        if let Some(index) = response.headers().get(INDEX_HEADER) {
            *transport.last_index.lock() = Some(index.clone());
        }

        let status = response.status();
        let bytes = response.bytes().await.map_err(HandleError::Network)?;

        if !status.is_success() {
            let errors = serde_json::from_slice::<ErrorBody>(&bytes)
                .map(|b| b.errors)
                .unwrap_or_default();
            return Err(HandleError::Status {
                method: method.clone(),
                path: path.to_string(),
                status,
                errors,
            });
        }

        if bytes.is_empty() || status == StatusCode::NO_CONTENT {
            return Ok(b"null".to_vec());
        }

        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use serde_json::json;
    use std::path::PathBuf;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CA_PEM: &str = include_str!("../testdata/ca.pem");
    const CLIENT_PEM: &str = include_str!("../testdata/client.pem");
    const CLIENT_KEY_PKCS8: &str = include_str!("../testdata/client-key.pem");
    const CLIENT_KEY_PKCS1: &str = include_str!("../testdata/client-key-rsa.pem");
    const CLIENT_EC_PEM: &str = include_str!("../testdata/client-ec.pem");
    const CLIENT_EC_KEY_SEC1: &str = include_str!("../testdata/client-ec-key.pem");

    fn testdata(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata").join(name)
    }

    fn build_with_tls(tls: TlsConfig) -> Result<ConnectionHandle, ConfigError> {
        ClientFactory::build(&SessionConfig::new("https://vault:8200").with_tls(tls))
    }

    fn handle_for(config: SessionConfig) -> ConnectionHandle {
        let mut handle = ClientFactory::build(&config.with_retry_wait_ms(1, 2)).unwrap();
        handle.set_token(Secret::new("s.test"));
        handle
    }

    #[test]
    fn test_build_uses_default_address() {
        let handle = ClientFactory::build(&SessionConfig::default()).unwrap();
        assert_eq!(handle.address().as_str(), "https://127.0.0.1:8200/");
        assert!(handle.token().is_none());
        assert!(handle.namespace().is_none());
        assert_eq!(handle.retry_policy().max_retries, 2);
    }

    #[test]
    fn test_build_rejects_bad_scheme() {
        let result = ClientFactory::build(&SessionConfig::new("ftp://vault:8200"));
        assert!(matches!(result, Err(ConfigError::InvalidAddress { .. })));

        let result = ClientFactory::build(&SessionConfig::new("not a url"));
        assert!(matches!(result, Err(ConfigError::InvalidAddress { .. })));
    }

    #[test]
    fn test_build_rejects_invalid_header() {
        let config = SessionConfig::new("https://vault:8200").with_header("bad header", "x");
        let result = ClientFactory::build(&config);
        assert!(matches!(result, Err(ConfigError::InvalidHeader { .. })));
    }

    #[test]
    fn test_build_rejects_mixed_tls_material() {
        let tls = TlsConfig {
            ca_cert_file: Some("/tmp/ca.pem".into()),
            client_cert_pem: Some("-----BEGIN CERTIFICATE-----".to_string()),
            ..TlsConfig::default()
        };
        let result = ClientFactory::build(&SessionConfig::new("https://vault:8200").with_tls(tls));
        assert!(matches!(result, Err(ConfigError::InvalidTls { .. })));
    }

    #[test]
    fn test_build_rejects_cert_without_key() {
        let tls = TlsConfig {
            client_cert_pem: Some("-----BEGIN CERTIFICATE-----".to_string()),
            ..TlsConfig::default()
        };
        let result = ClientFactory::build(&SessionConfig::new("https://vault:8200").with_tls(tls));
        assert!(matches!(result, Err(ConfigError::InvalidTls { .. })));
    }

    #[test]
    fn test_build_rejects_missing_ca_file() {
        let tls = TlsConfig {
            ca_cert_file: Some("/nonexistent/vaultline/ca.pem".into()),
            ..TlsConfig::default()
        };
        let result = ClientFactory::build(&SessionConfig::new("https://vault:8200").with_tls(tls));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_build_rejects_garbage_ca_pem() {
        let tls = TlsConfig {
            ca_cert_pem: Some("-----BEGIN CERTIFICATE-----\nnot base64!\n-----END CERTIFICATE-----\n".to_string()),
            ..TlsConfig::default()
        };
        let result = ClientFactory::build(&SessionConfig::new("https://vault:8200").with_tls(tls));
        assert!(matches!(result, Err(ConfigError::InvalidTls { .. })));
    }

    #[test]
    fn test_server_name_pins_ip_address() {
        let tls = TlsConfig {
            server_name: Some("vault.internal".to_string()),
            ..TlsConfig::default()
        };
        let handle =
            ClientFactory::build(&SessionConfig::new("https://10.0.0.5:8200").with_tls(tls)).unwrap();
        assert_eq!(handle.address().host_str(), Some("vault.internal"));
        assert_eq!(handle.address().port(), Some(8200));
    }

    #[test]
    fn test_clone_shares_transport_but_not_namespace() {
        let mut root = ClientFactory::build(&SessionConfig::new("https://vault:8200")).unwrap();
        root.set_token(Secret::new("s.root"));

        let mut clone = root.with_namespace("teamA").unwrap();
        clone.set_token(Secret::new("s.other"));

        assert!(clone.shares_transport_with(&root));
        assert_eq!(clone.namespace(), Some("teamA"));
        assert!(root.namespace().is_none());
        assert_eq!(root.token().unwrap().expose(), "s.root");

        clone.clear_namespace();
        assert!(clone.namespace().is_none());
    }

    #[test]
    fn test_invalid_namespace_rejected() {
        let root = ClientFactory::build(&SessionConfig::new("https://vault:8200")).unwrap();
        let result = root.with_namespace("team\nA");
        assert!(matches!(result, Err(HandleError::InvalidNamespace { .. })));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(RetryPolicy::is_retryable(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(RetryPolicy::is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(RetryPolicy::is_retryable(StatusCode::PRECONDITION_FAILED));
        assert!(!RetryPolicy::is_retryable(StatusCode::NOT_IMPLEMENTED));
        assert!(!RetryPolicy::is_retryable(StatusCode::FORBIDDEN));
        assert!(!RetryPolicy::is_retryable(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_backoff_is_linear_and_bounded() {
        let policy = RetryPolicy {
            max_retries: 3,
            min_wait: Duration::from_millis(100),
            max_wait: Duration::from_millis(150),
        };
        for attempt in 1..=3u64 {
            let wait = policy.backoff(attempt as u32);
            assert!(wait >= Duration::from_millis(100 * attempt));
            assert!(wait <= Duration::from_millis(150 * attempt));
        }
    }

    #[test]
    fn test_loads_ca_material() {
        build_with_tls(TlsConfig {
            ca_cert_file: Some(testdata("ca.pem")),
            ..TlsConfig::default()
        })
        .unwrap();

        build_with_tls(TlsConfig {
            ca_cert_dir: Some(testdata("ca-dir")),
            ..TlsConfig::default()
        })
        .unwrap();

        build_with_tls(TlsConfig {
            ca_cert_pem: Some(CA_PEM.to_string()),
            ..TlsConfig::default()
        })
        .unwrap();
    }

    #[test]
    fn test_client_identity_inline_key_formats() {
        for (cert, key) in [
            (CLIENT_PEM, CLIENT_KEY_PKCS8),
            (CLIENT_PEM, CLIENT_KEY_PKCS1),
            (CLIENT_EC_PEM, CLIENT_EC_KEY_SEC1),
        ] {
            let tls = TlsConfig {
                ca_cert_pem: Some(CA_PEM.to_string()),
                client_cert_pem: Some(cert.to_string()),
                client_key_pem: Some(Secret::new(key)),
                ..TlsConfig::default()
            };
            let result = build_with_tls(tls);
            assert!(result.is_ok(), "{}: {:?}", key.lines().next().unwrap(), result.err());
        }
    }

    #[test]
    fn test_client_identity_file_key_formats() {
        for (cert, key) in [
            ("client.pem", "client-key.pem"),
            ("client.pem", "client-key-rsa.pem"),
            ("client-ec.pem", "client-ec-key.pem"),
        ] {
            let tls = TlsConfig {
                ca_cert_file: Some(testdata("ca.pem")),
                client_cert_file: Some(testdata(cert)),
                client_key_file: Some(testdata(key)),
                ..TlsConfig::default()
            };
            let result = build_with_tls(tls);
            assert!(result.is_ok(), "{}: {:?}", key, result.err());
        }
    }

    #[test]
    fn test_client_identity_rejects_garbage_key() {
        let tls = TlsConfig {
            client_cert_pem: Some(CLIENT_PEM.to_string()),
            client_key_pem: Some(Secret::new("not a key")),
            ..TlsConfig::default()
        };
        assert!(build_with_tls(tls).is_err());
    }

    #[test]
    fn test_configured_address_is_kept() {
        let tls = TlsConfig {
            server_name: Some("vault.internal".to_string()),
            ..TlsConfig::default()
        };
        let handle =
            ClientFactory::build(&SessionConfig::new("https://10.0.0.5:8200").with_tls(tls)).unwrap();
        assert_eq!(handle.configured_address(), "https://10.0.0.5:8200");
        assert_eq!(handle.address().host_str(), Some("vault.internal"));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy {
            max_retries: 3,
            min_wait: Duration::from_millis(u64::MAX / 2),
            max_wait: Duration::from_millis(u64::MAX / 2),
        };
        assert_eq!(policy.backoff(3), Duration::from_millis(u64::MAX));
    }

    #[tokio::test]
    async fn test_sends_vault_and_custom_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sys/health"))
            .and(header("X-Vault-Request", "true"))
            .and(header("X-Vault-Token", "s.test"))
            .and(header("X-Vault-Namespace", "teamA"))
            .and(header("X-Request-Source", "vaultline"))
            .and(header("User-Agent", user_agent().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let config = SessionConfig::new(server.uri()).with_header("X-Request-Source", "vaultline");
        let handle = handle_for(config).with_namespace("teamA").unwrap();
        let body: serde_json::Value = handle.get("sys/health").await.unwrap();
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/db"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/db"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
            .expect(1)
            .mount(&server)
            .await;

        let handle = handle_for(SessionConfig::new(server.uri()).with_max_retries(2));
        let body: serde_json::Value = handle.get("secret/data/db").await.unwrap();
        assert!(body["data"].is_object());
    }

    #[tokio::test]
    async fn test_retries_precondition_failed_until_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/db"))
            .respond_with(
                ResponseTemplate::new(412).set_body_json(json!({ "errors": ["index not yet replicated"] })),
            )
            .expect(2)
            .mount(&server)
            .await;

        let handle = handle_for(SessionConfig::new(server.uri()).with_max_retries(1));
        let err = handle.get::<serde_json::Value>("secret/data/db").await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::PRECONDITION_FAILED));
        assert!(err.to_string().contains("index not yet replicated"));
    }

    #[tokio::test]
    async fn test_does_not_retry_not_implemented() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sys/unknown"))
            .respond_with(ResponseTemplate::new(501))
            .expect(1)
            .mount(&server)
            .await;

        let handle = handle_for(SessionConfig::new(server.uri()).with_max_retries(3));
        let err = handle.get::<serde_json::Value>("sys/unknown").await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::NOT_IMPLEMENTED));
    }

    #[tokio::test]
    async fn test_replays_index_across_handles() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/secret/data/db"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Vault-Index", "idx-1")
                    .set_body_json(json!({ "data": { "version": 1 } })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/db"))
            .and(header("X-Vault-Index", "idx-1"))
            .and(header("X-Vault-Namespace", "teamB"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "version": 1 } })))
            .expect(1)
            .mount(&server)
            .await;

        let writer = handle_for(SessionConfig::new(server.uri()).with_max_retries(0));
        let reader = writer.with_namespace("teamB").unwrap();

        let _: serde_json::Value = writer
            .post("secret/data/db", &json!({ "data": { "user": "app" } }))
            .await
            .unwrap();
        let body: serde_json::Value = reader.get("secret/data/db").await.unwrap();
        assert_eq!(body["data"]["version"], 1);
    }
}
