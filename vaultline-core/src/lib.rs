//! # Vaultline Core
//!
//! Session and credential management for namespaced Vault connections.
//!
//! This crate provides:
//! - Validated connection configuration and a shared HTTP transport
//! - Bootstrap credential acquisition (static token, login methods, token helper)
//! - Bounded child token derivation
//! - Server version and capability detection
//! - A concurrent cache of namespace-scoped handles
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vaultline_core::{Session, SessionConfig, VAULT_VERSION_112};
//!
//! async fn read_secret() -> Result<serde_json::Value, Box<dyn std::error::Error>> {
//!     let config = SessionConfig::new("https://vault.example:8200")
//!         .with_namespace("teamA")
//!         .with_token("s.abc");
//!     let session = Session::connect(config).await?;
//!
//!     if !session.supports_version(&VAULT_VERSION_112) {
//!         tracing::warn!("server is older than 1.12");
//!     }
//!
//!     let client = session.client(Some("payments"))?;
//!     Ok(client.get("secret/data/db").await?)
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod namespace;
pub mod secret;
pub mod session;
pub mod version;

// Re-export commonly used types at crate root
pub use auth::{
    AuthError,
    AuthLogin,
    AuthStrategy,
    Credential,
    DefaultTokenHelper,
    Lease,
    MethodLogin,
    NoTokenHelper,
    TokenHelper,
};

pub use cache::{
    CacheCloneError,
    NamespaceClientCache,
};

pub use client::{
    ClientFactory,
    ConnectionHandle,
    HandleError,
    RetryPolicy,
};

pub use config::{
    ConfigError,
    HeaderConfig,
    IdentityConfig,
    LifecycleConfig,
    LoginConfig,
    LoginMethod,
    SessionConfig,
    TlsConfig,
};

pub use error::SessionError;

pub use lifecycle::{
    ChildTokenRequest,
    TokenInfo,
    TokenLifecycleError,
    TokenLifecycleManager,
};

pub use secret::Secret;

pub use session::{
    Session,
    SessionBuilder,
};

pub use version::{
    Capabilities,
    VersionInfo,
    VersionProbe,
    Version,
    VersionProbeError,
    VAULT_VERSION_110,
    VAULT_VERSION_111,
    VAULT_VERSION_112,
    VAULT_VERSION_113,
    VAULT_VERSION_114,
    VAULT_VERSION_115,
    VAULT_VERSION_190,
};
