//! Server version and capability detection.

pub use semver::Version;
use serde::Deserialize;
use std::borrow::Cow;
use std::cmp::Ordering;
use thiserror::Error;

use crate::client::{ConnectionHandle, HandleError};

/// Build metadata marker of enterprise builds, e.g. `1.15.2+ent`.
const ENTERPRISE_METADATA: &str = "ent";

pub const VAULT_VERSION_190: Version = Version::new(1, 9, 0);
pub const VAULT_VERSION_110: Version = Version::new(1, 10, 0);
pub const VAULT_VERSION_111: Version = Version::new(1, 11, 0);
pub const VAULT_VERSION_112: Version = Version::new(1, 12, 0);
pub const VAULT_VERSION_113: Version = Version::new(1, 13, 0);
pub const VAULT_VERSION_114: Version = Version::new(1, 14, 0);
pub const VAULT_VERSION_115: Version = Version::new(1, 15, 0);

/// Error type for version detection.
#[derive(Debug, Error)]
pub enum VersionProbeError {
    /// The status request failed.
    #[error("could not determine the server version: {0}")]
    Request(#[source] HandleError),

    /// The status response had no version.
    #[error("key \"version\" not found in response")]
    MissingVersion,

    /// The reported version is not a semantic version.
    #[error("unparseable server version {value:?}: {source}")]
    Unparseable {
        value: String,
        #[source]
        source: semver::Error,
    },
}

/// A server version and the edition it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: Version,
    pub enterprise: bool,
}

impl VersionInfo {
    /// Parse a version string such as `1.15.2+ent`, `v1.9.0` or `1.15`.
    ///
    /// Missing minor and patch components default to zero.
    pub fn parse(value: &str) -> Result<Self, semver::Error> {
        let version = Version::parse(&pad_components(value.trim().trim_start_matches('v')))?;
        let enterprise = version.build.as_str().contains(ENTERPRISE_METADATA);
        Ok(Self {
            version,
            enterprise,
        })
    }

    /// Whether this version is at least `min`.
    ///
    /// Build metadata is ignored; pre-releases sort before their release.
    pub fn is_at_least(&self, min: &Version) -> bool {
        self.version.cmp_precedence(min) != Ordering::Less
    }
}

fn pad_components(value: &str) -> Cow<'_, str> {
    let end = value.find(|c| c == '-' || c == '+').unwrap_or(value.len());
    let (core, rest) = value.split_at(end);
    match core.split('.').count() {
        1 => Cow::Owned(format!("{}.0.0{}", core, rest)),
        2 => Cow::Owned(format!("{}.0{}", core, rest)),
        _ => Cow::Borrowed(value),
    }
}

impl std::fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.version)
    }
}

/// Capability queries over an optionally known server version.
///
/// An unknown version reports every version-gated capability as
/// unsupported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    version: Option<VersionInfo>,
}

impl Capabilities {
    pub fn new(version: Option<VersionInfo>) -> Self {
        Self { version }
    }

    /// The detected version, if known.
    pub fn version(&self) -> Option<&VersionInfo> {
        self.version.as_ref()
    }

    /// Whether the server is at least `min`.
    pub fn supports_version(&self, min: &Version) -> bool {
        self.version.as_ref().is_some_and(|v| v.is_at_least(min))
    }

    /// Whether the server is an enterprise build.
    pub fn is_enterprise(&self) -> bool {
        self.version.as_ref().is_some_and(|v| v.enterprise)
    }
}

#[derive(Debug, Deserialize)]
struct SealStatus {
    #[serde(default)]
    version: String,
}

/// Queries the server version.
pub struct VersionProbe;

impl VersionProbe {
    /// Read the version from `sys/seal-status`.
    ///
    /// The request is made on a clone of `root` without a namespace, since
    /// the status endpoint only exists at the top level.
    pub async fn probe(root: &ConnectionHandle) -> Result<VersionInfo, VersionProbeError> {
        let mut clone = root.clone();
        clone.clear_namespace();

        let status: SealStatus = clone
            .get("sys/seal-status")
            .await
            .map_err(VersionProbeError::Request)?;

        if status.version.trim().is_empty() {
            return Err(VersionProbeError::MissingVersion);
        }

        let info = VersionInfo::parse(&status.version).map_err(|source| {
            VersionProbeError::Unparseable {
                value: status.version.clone(),
                source,
            }
        })?;
        tracing::debug!("Server version {} (enterprise={})", info, info.enterprise);
        Ok(info)
    }
}
