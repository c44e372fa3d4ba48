//! Session bootstrap and the handle downstream callers receive.
//!
//! A [`Session`] is built once, sequentially:
//!
//! 1. [`ClientFactory`] validates the configuration and builds the root handle
//! 2. [`AuthStrategy`] obtains the bootstrap credential
//! 3. [`TokenLifecycleManager`] looks it up and derives a bounded child token
//! 4. The root namespace is resolved and set on the root handle
//! 5. [`VersionProbe`] records the server capabilities
//!
//! Any failure in steps 1-3 aborts construction; no session is returned.
//! After construction the session is shared (typically in an `Arc`) and
//! hands out namespaced handles to concurrent callers.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), vaultline_core::SessionError> {
//! use vaultline_core::{Session, SessionConfig};
//!
//! let config = SessionConfig::new("https://vault.example:8200")
//!     .with_namespace("teamA")
//!     .with_token("s.abc");
//! let session = Session::connect(config).await?;
//!
//! let client = session.client(Some("payments"))?;
//! let secret: serde_json::Value = client.get("secret/data/db").await.unwrap();
//! # Ok(())
//! # }
//! ```

use semver::Version;
use std::sync::Arc;

use crate::auth::{AuthLogin, AuthStrategy, Credential, DefaultTokenHelper, TokenHelper};
use crate::cache::{CacheCloneError, NamespaceClientCache};
use crate::client::{ClientFactory, ConnectionHandle};
use crate::config::{ConfigError, SessionConfig};
use crate::error::SessionError;
use crate::lifecycle::TokenLifecycleManager;
use crate::namespace;
use crate::version::{Capabilities, VersionInfo, VersionProbe};

/// Builder for a [`Session`] with custom credential sources.
pub struct SessionBuilder {
    config: SessionConfig,
    token_helper: Arc<dyn TokenHelper>,
    login: Option<Box<dyn AuthLogin>>,
}

impl SessionBuilder {
    /// Start from a configuration with the default token helper.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            token_helper: Arc::new(DefaultTokenHelper::new()),
            login: None,
        }
    }

    /// Use a different token helper.
    pub fn with_token_helper(mut self, helper: Arc<dyn TokenHelper>) -> Self {
        self.token_helper = helper;
        self
    }

    /// Use a custom login method in place of the configured login block.
    pub fn with_login(mut self, login: Box<dyn AuthLogin>) -> Self {
        self.login = Some(login);
        self
    }

    /// Run the bootstrap sequence.
    pub async fn connect(self) -> Result<Session, SessionError> {
        let Self {
            config,
            token_helper,
            login,
        } = self;

        let mut root = ClientFactory::build(&config)?;
        let provider_namespace = namespace::normalize_opt(config.identity.namespace.as_deref());

        let strategy = AuthStrategy::select(&config.identity, login, token_helper);
        tracing::debug!("Selected credential source: {}", strategy.name());
        let bootstrap = strategy.resolve(&root, provider_namespace).await?;
        root.set_token(bootstrap.token.clone());

        let lifecycle = TokenLifecycleManager::new(&config.lifecycle);
        let credential = lifecycle.establish(&root, bootstrap).await?;
        root.set_token(credential.token.clone());

        let root_namespace = match provider_namespace {
            Some(ns) => Some(ns.to_string()),
            None => credential.namespace.clone().inspect(|token_ns| {
                tracing::warn!(
                    "The namespace should be set whenever using namespaced auth tokens. \
                     Falling back to the token's namespace {:?}; consider configuring it explicitly.",
                    token_ns
                );
            }),
        };
        match &root_namespace {
            Some(ns) => root.set_namespace(ns).map_err(|source| {
                SessionError::CacheClone(CacheCloneError::Clone {
                    namespace: ns.clone(),
                    source,
                })
            })?,
            None => root.clear_namespace(),
        }

        let capabilities = Capabilities::new(resolve_version(&config, &root).await?);
        let cache = NamespaceClientCache::new(root.clone(), root_namespace.as_deref());

        tracing::info!(
            "Session established for {} (namespace={:?}, version={})",
            root.address(),
            root_namespace,
            capabilities
                .version()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );

        Ok(Session {
            config: Arc::new(config),
            root: Arc::new(root),
            credential,
            capabilities,
            cache,
        })
    }
}

async fn resolve_version(
    config: &SessionConfig,
    root: &ConnectionHandle,
) -> Result<Option<VersionInfo>, SessionError> {
    let lifecycle = &config.lifecycle;

    if let Some(value) = lifecycle.version_override.as_deref().filter(|v| !v.trim().is_empty()) {
        let info = VersionInfo::parse(value).map_err(|e| ConfigError::InvalidVersionOverride {
            value: value.to_string(),
            message: e.to_string(),
        })?;
        return Ok(Some(info));
    }

    if lifecycle.skip_version_probe {
        tracing::debug!("Version probe disabled, server version unknown");
        return Ok(None);
    }

    match VersionProbe::probe(root).await {
        Ok(info) => Ok(Some(info)),
        Err(e) if lifecycle.strict_version_check => Err(e.into()),
        Err(e) => {
            tracing::warn!("{}; version-gated features will be reported as unsupported", e);
            Ok(None)
        }
    }
}

/// An authenticated session with the server.
///
/// This is the single object handed to code that talks to the server. It
/// resolves namespaced handles and answers capability queries.
pub struct Session {
    config: Arc<SessionConfig>,
    root: Arc<ConnectionHandle>,
    credential: Credential,
    capabilities: Capabilities,
    cache: NamespaceClientCache,
}

impl Session {
    /// Bootstrap a session with the default token helper.
    pub async fn connect(config: SessionConfig) -> Result<Self, SessionError> {
        SessionBuilder::new(config).connect().await
    }

    /// Start a builder for custom credential sources.
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    /// The configuration the session was built from.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The root handle, scoped to the session namespace.
    pub fn root(&self) -> Arc<ConnectionHandle> {
        Arc::clone(&self.root)
    }

    /// Handle for a per-call namespace.
    ///
    /// `None` or an empty namespace yields the root handle; anything else is
    /// resolved below the session namespace through the cache.
    pub fn client(&self, namespace: Option<&str>) -> Result<Arc<ConnectionHandle>, CacheCloneError> {
        match namespace::normalize_opt(namespace) {
            Some(ns) => self.cache.get_or_create(ns),
            None => Ok(self.root()),
        }
    }

    /// The namespace cache.
    pub fn cache(&self) -> &NamespaceClientCache {
        &self.cache
    }

    /// Session namespace all handles are rooted at.
    pub fn namespace(&self) -> Option<&str> {
        self.cache.root_namespace()
    }

    /// The credential in use.
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Server capabilities.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// The detected server version, if known.
    pub fn version(&self) -> Option<&VersionInfo> {
        self.capabilities.version()
    }

    /// Whether the server is at least `min`; `false` if the version is unknown.
    pub fn supports_version(&self, min: &Version) -> bool {
        self.capabilities.supports_version(min)
    }

    /// Whether the server is an enterprise build; `false` if unknown.
    pub fn is_enterprise(&self) -> bool {
        self.capabilities.is_enterprise()
    }

    /// Retry count for check-and-commit style operations.
    pub fn max_retries_ccc(&self) -> u32 {
        self.config.max_retries_ccc
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.root.address().as_str())
            .field("namespace", &self.namespace())
            .field("policies", &self.credential.policies)
            .field("version", &self.capabilities.version())
            .field("cache", &self.cache)
            .finish()
    }
}
