//! Top-level error types for Vaultline.

use thiserror::Error;

use crate::auth::AuthError;
use crate::cache::CacheCloneError;
use crate::config::ConfigError;
use crate::lifecycle::TokenLifecycleError;
use crate::version::VersionProbeError;

/// Top-level error type encompassing all session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Invalid address, TLS material, headers or version override.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No usable bootstrap credential.
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Token lookup or child token creation failed.
    #[error("token lifecycle error: {0}")]
    TokenLifecycle(#[from] TokenLifecycleError),

    /// Version probe failed while strict checking is enabled.
    #[error("version probe error: {0}")]
    VersionProbe(#[from] VersionProbeError),

    /// A namespaced handle could not be created.
    #[error("namespace client error: {0}")]
    CacheClone(#[from] CacheCloneError),
}
