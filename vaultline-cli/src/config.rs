//! CLI configuration handling.
//!
//! The session configuration is read from `--config`, or from
//! `vaultline.toml` in the platform config directory when present. Standard
//! `VAULT_*` environment variables are applied on top.

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use vaultline_core::{Secret, SessionConfig};

/// Variable supplying the per-call namespace when a command gives none.
pub const NAMESPACE_IMPORT_ENV: &str = "VAULTLINE_NAMESPACE_IMPORT";

/// A loaded configuration and where it came from.
#[derive(Debug)]
pub struct CliConfig {
    pub session: SessionConfig,

    /// Path of the file that was loaded, if any.
    pub config_path: Option<PathBuf>,
}

/// Load the configuration and apply environment overrides.
pub fn load_config(explicit: Option<&Path>) -> Result<CliConfig> {
    let (session, config_path) = match explicit {
        Some(path) => (read_config(path)?, Some(path.to_path_buf())),
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => (read_config(&path)?, Some(path)),
            None => (SessionConfig::default(), None),
        },
    };

    let session = apply_env(session, |key| std::env::var(key).ok())?;
    Ok(CliConfig {
        session,
        config_path,
    })
}

fn read_config(path: &Path) -> Result<SessionConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {:?}", path))?;
    SessionConfig::from_toml(&contents)
        .with_context(|| format!("Failed to parse config from {:?}", path))
}

/// Apply `VAULT_*` overrides using `lookup` to read variables.
///
/// Empty values are ignored.
pub fn apply_env<F>(mut config: SessionConfig, lookup: F) -> Result<SessionConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(address) = var("VAULT_ADDR") {
        config.address = address;
    }
    if let Some(token) = var("VAULT_TOKEN") {
        config.identity.token = Some(Secret::new(token));
    }
    if let Some(namespace) = var("VAULT_NAMESPACE") {
        config.identity.namespace = Some(namespace);
    }
    if let Some(path) = var("VAULT_CACERT") {
        config.tls.ca_cert_file = Some(PathBuf::from(path));
    }
    if let Some(path) = var("VAULT_CAPATH") {
        config.tls.ca_cert_dir = Some(PathBuf::from(path));
    }
    if let Some(path) = var("VAULT_CLIENT_CERT") {
        config.tls.client_cert_file = Some(PathBuf::from(path));
    }
    if let Some(path) = var("VAULT_CLIENT_KEY") {
        config.tls.client_key_file = Some(PathBuf::from(path));
    }
    if let Some(name) = var("VAULT_TLS_SERVER_NAME") {
        config.tls.server_name = Some(name);
    }
    if let Some(value) = var("VAULT_SKIP_VERIFY") {
        config.tls.skip_verify = parse_bool(&value)
            .with_context(|| format!("Invalid VAULT_SKIP_VERIFY value {:?}", value))?;
    }
    if let Some(value) = var("VAULT_MAX_RETRIES") {
        config.max_retries = value
            .trim()
            .parse()
            .with_context(|| format!("Invalid VAULT_MAX_RETRIES value {:?}", value))?;
    }

    Ok(config)
}

/// The namespace a command should use: the flag, else the import variable.
pub fn command_namespace(flag: Option<String>) -> Option<String> {
    flag.or_else(|| std::env::var(NAMESPACE_IMPORT_ENV).ok())
        .filter(|ns| !ns.trim().is_empty())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" => Ok(true),
        "0" | "f" | "false" | "no" => Ok(false),
        other => bail!("expected a boolean, got {:?}", other),
    }
}

fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().join("vaultline.toml"))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "raibid-labs", "vaultline")
}
