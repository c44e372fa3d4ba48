//! Credential acquisition.
//!
//! This module provides:
//! - [`Credential`] - A token with its policies, origin namespace and lease
//! - [`AuthLogin`] - Trait for login methods that exchange an identity for a token
//! - [`TokenHelper`] - Trait for local operator token sources
//! - [`AuthStrategy`] - The single credential source selected for a session
//!
//! # Selection
//!
//! Exactly one strategy is active per session, chosen by precedence:
//!
//! 1. An explicit static token
//! 2. A login method block
//! 3. The token helper
//!
//! Failure of the selected strategy is final; no other source is tried.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::client::{ConnectionHandle, HandleError};
use crate::config::IdentityConfig;
use crate::namespace;
use crate::secret::Secret;

mod login;
mod token_helper;

pub use login::MethodLogin;
pub use token_helper::{DefaultTokenHelper, NoTokenHelper};

/// Error type for credential acquisition.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No static token, login method or token helper credential is available.
    #[error("no vault token available: set a token, configure a login method or use a token helper")]
    NoCredential,

    /// The selected source produced an empty token.
    #[error("{source_name} returned an empty token")]
    EmptyToken { source_name: String },

    /// The login request failed.
    #[error("login with {method} failed: {source}")]
    LoginFailed {
        method: String,
        #[source]
        source: HandleError,
    },

    /// The login response carried no auth section.
    #[error("login with {method} returned no auth data")]
    MissingAuth { method: String },

    /// The login namespace is not usable.
    #[error("invalid login namespace: {0}")]
    InvalidNamespace(#[source] HandleError),

    /// Reading a credential file failed.
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external token helper failed.
    #[error("token helper failed: {message}")]
    Helper { message: String },
}

/// Lease attached to a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    /// Time-to-live granted at issue.
    pub ttl: Duration,
    /// Hard upper bound on the lifetime, if one was requested.
    pub explicit_max_ttl: Option<Duration>,
    /// Whether the token may be renewed.
    pub renewable: bool,
}

/// An authenticated token and what is known about it.
#[derive(Debug, Clone)]
pub struct Credential {
    /// The bearer token.
    pub token: Secret,

    /// Policies attached to the token.
    pub policies: Vec<String>,

    /// Namespace the token was issued in, if any.
    pub namespace: Option<String>,

    /// Lease information, when reported by the server.
    pub lease: Option<Lease>,

    /// When the token expires, if known.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// A credential known only by its token.
    pub fn from_token(token: impl Into<Secret>) -> Self {
        Self {
            token: token.into(),
            policies: Vec::new(),
            namespace: None,
            lease: None,
            expires_at: None,
        }
    }

    /// Set the policies.
    pub fn with_policies(mut self, policies: Vec<String>) -> Self {
        self.policies = policies;
        self
    }

    /// Set the origin namespace.
    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    /// Set the lease.
    pub fn with_lease(mut self, lease: Lease) -> Self {
        self.lease = Some(lease);
        self
    }
}

/// `auth` section of a login or token-create response.
#[derive(Debug, Deserialize)]
pub(crate) struct AuthBlock {
    #[serde(default)]
    pub client_token: Secret,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuthResponse {
    #[serde(default)]
    pub auth: Option<AuthBlock>,
}

impl AuthBlock {
    pub(crate) fn into_credential(self, namespace: Option<String>) -> Credential {
        let lease = (self.lease_duration > 0).then(|| Lease {
            ttl: Duration::from_secs(self.lease_duration),
            explicit_max_ttl: None,
            renewable: self.renewable,
        });
        Credential {
            token: self.client_token,
            policies: self.policies,
            namespace,
            lease,
            expires_at: None,
        }
    }
}

/// A login method that exchanges an identity for a token.
///
/// The handle passed to [`login`](AuthLogin::login) is already scoped to the
/// namespace the login should happen in.
#[async_trait]
pub trait AuthLogin: Send + Sync {
    /// Name used in logs and errors.
    fn method(&self) -> &str;

    /// Namespace this method wants to authenticate in, if any.
    fn namespace(&self) -> Option<&str>;

    /// Perform the login.
    async fn login(&self, handle: &ConnectionHandle) -> Result<Credential, AuthError>;
}

/// Source of a raw token from local operator state.
#[async_trait]
pub trait TokenHelper: Send + Sync {
    /// Return the stored token, or `None` if there is none.
    ///
    /// `address` is the server the token is for.
    async fn token(&self, address: &str) -> Result<Option<Secret>, AuthError>;
}

/// The credential source selected for a session.
pub enum AuthStrategy {
    /// A pre-supplied token.
    Static(Secret),
    /// A login method.
    Login(Box<dyn AuthLogin>),
    /// A local token helper.
    TokenHelper(Arc<dyn TokenHelper>),
}

impl std::fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(_) => f.write_str("AuthStrategy::Static"),
            Self::Login(login) => write!(f, "AuthStrategy::Login({})", login.method()),
            Self::TokenHelper(_) => f.write_str("AuthStrategy::TokenHelper"),
        }
    }
}

impl AuthStrategy {
    /// Select the strategy for an identity configuration.
    ///
    /// `custom_login` stands in for a configured login block and is only
    /// consulted when no static token is set.
    pub fn select(
        identity: &IdentityConfig,
        custom_login: Option<Box<dyn AuthLogin>>,
        helper: Arc<dyn TokenHelper>,
    ) -> Self {
        if let Some(token) = identity.token.as_ref().filter(|t| !t.is_blank()) {
            return Self::Static(token.clone());
        }
        if let Some(login) = custom_login {
            return Self::Login(login);
        }
        if let Some(config) = &identity.login {
            return Self::Login(Box::new(MethodLogin::new(config.clone())));
        }
        Self::TokenHelper(helper)
    }

    /// Short name used in logs and errors.
    pub fn name(&self) -> &str {
        match self {
            Self::Static(_) => "static token",
            Self::Login(login) => login.method(),
            Self::TokenHelper(_) => "token helper",
        }
    }

    /// The namespace a login would target, given the provider namespace.
    pub fn login_namespace<'a>(&'a self, provider_namespace: Option<&'a str>) -> Option<&'a str> {
        match self {
            Self::Login(login) => {
                namespace::normalize_opt(login.namespace()).or(namespace::normalize_opt(provider_namespace))
            }
            _ => None,
        }
    }

    /// Obtain the bootstrap credential.
    ///
    /// Login methods run against a clone of `root` scoped to the login
    /// namespace; `root` itself is never modified.
    pub async fn resolve(
        &self,
        root: &ConnectionHandle,
        provider_namespace: Option<&str>,
    ) -> Result<Credential, AuthError> {
        let credential = match self {
            Self::Static(token) => Credential::from_token(token.clone()),
            Self::Login(login) => {
                let mut clone = root.clone();
                if let Some(ns) = self.login_namespace(provider_namespace) {
                    tracing::debug!("Authenticating with {} in namespace {:?}", login.method(), ns);
                    clone.set_namespace(ns).map_err(AuthError::InvalidNamespace)?;
                }
                login.login(&clone).await?
            }
            Self::TokenHelper(helper) => helper
                .token(root.configured_address())
                .await?
                .map(Credential::from_token)
                .ok_or(AuthError::NoCredential)?,
        };

        if credential.token.is_blank() {
            return Err(match self {
                Self::TokenHelper(_) => AuthError::NoCredential,
                _ => AuthError::EmptyToken {
                    source_name: self.name().to_string(),
                },
            });
        }

        tracing::info!("Obtained bootstrap credential via {}", self.name());
        Ok(credential)
    }
}
