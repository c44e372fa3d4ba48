//! Token helpers backed by local operator state.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::{AuthError, TokenHelper};
use crate::secret::Secret;

/// Operator config file that may name an external helper.
const CONFIG_FILE: &str = ".vault";

/// Token file written by `vault login`.
const TOKEN_FILE: &str = ".vault-token";

/// Environment variable passed to the helper process.
const ADDRESS_ENV: &str = "VAULT_ADDR";

/// The token helper used by operator tooling.
///
/// Reads `~/.vault` for a `token_helper = "<path>"` setting. When one is
/// present the helper is run as `<path> get`; otherwise `~/.vault-token` is
/// read. The server address is passed to the helper through `VAULT_ADDR` on
/// the child process only.
#[derive(Debug, Clone)]
pub struct DefaultTokenHelper {
    home: Option<PathBuf>,
}

impl DefaultTokenHelper {
    /// Use the current user's home directory.
    pub fn new() -> Self {
        Self {
            home: directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf()),
        }
    }

    /// Use a specific directory in place of the home directory.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: Some(home.into()),
        }
    }

    async fn configured_helper(&self, home: &Path) -> Result<Option<PathBuf>, AuthError> {
        let path = home.join(CONFIG_FILE);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(AuthError::Io { path, source }),
        };

        let table: toml::Table = toml::from_str(&contents).map_err(|e| AuthError::Helper {
            message: format!("failed to parse {:?}: {}", path, e),
        })?;

        let helper = table
            .get("token_helper")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty());

        Ok(helper.map(|h| {
            let helper = PathBuf::from(h);
            if helper.is_absolute() {
                helper
            } else {
                std::path::absolute(&helper).unwrap_or(helper)
            }
        }))
    }

    async fn run_helper(&self, helper: &Path, address: &str) -> Result<Option<Secret>, AuthError> {
        tracing::debug!("Reading token from helper {:?}", helper);

        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(format!("{} get", helper.display()))
            .env(ADDRESS_ENV, address)
            .output()
            .await
            .map_err(|e| AuthError::Helper {
                message: format!("failed to run {:?}: {}", helper, e),
            })?;

        if !output.status.success() {
            return Err(AuthError::Helper {
                message: format!(
                    "{:?} exited with {}: {}",
                    helper,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!token.is_empty()).then(|| Secret::new(token)))
    }
}

impl Default for DefaultTokenHelper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenHelper for DefaultTokenHelper {
    async fn token(&self, address: &str) -> Result<Option<Secret>, AuthError> {
        let Some(home) = &self.home else {
            tracing::debug!("No home directory, token helper has nothing to read");
            return Ok(None);
        };

        if let Some(helper) = self.configured_helper(home).await? {
            return self.run_helper(&helper, address).await;
        }

        let path = home.join(TOKEN_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| Secret::new(token)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(AuthError::Io { path, source }),
        }
    }
}

/// A token helper that never has a token.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTokenHelper;

#[async_trait]
impl TokenHelper for NoTokenHelper {
    async fn token(&self, _address: &str) -> Result<Option<Secret>, AuthError> {
        Ok(None)
    }
}
