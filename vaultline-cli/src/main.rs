//! Vaultline CLI
//!
//! Command-line interface for bootstrapping and inspecting Vault sessions.
//!
//! # Usage
//!
//! ```bash
//! # Show the session namespace, server version and token policies
//! vaultline status
//!
//! # Look up the session token in a child namespace
//! vaultline lookup --namespace payments
//!
//! # Read a secret
//! vaultline read secret/data/db --namespace payments
//!
//! # Check whether the server is at least a given version
//! vaultline supports 1.12.0
//! ```

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};
use vaultline_core::{Session, TokenInfo};

#[derive(Parser)]
#[command(name = "vaultline")]
#[command(about = "Namespaced Vault sessions with bounded child tokens")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to vaultline.toml in the config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show session namespace, server version and token details
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Look up the session token
    Lookup {
        /// Namespace relative to the session namespace
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Read a secret and print it as JSON
    Read {
        /// API path, e.g. secret/data/db
        path: String,

        /// Namespace relative to the session namespace
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Check whether the server is at least the given version
    Supports {
        /// Minimum version, e.g. 1.12.0
        version: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let loaded = config::load_config(cli.config.as_deref())?;
    match &loaded.config_path {
        Some(path) => info!("Loaded configuration from {:?}", path),
        None => info!("No configuration file found, using environment only"),
    }

    let session = Session::connect(loaded.session)
        .await
        .context("Failed to establish session")?;

    match cli.command {
        Commands::Status { format } => status(&session, &format),
        Commands::Lookup { namespace } => {
            lookup(&session, config::command_namespace(namespace)).await
        }
        Commands::Read { path, namespace } => {
            read(&session, &path, config::command_namespace(namespace)).await
        }
        Commands::Supports { version } => supports(&session, &version),
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "warn" })
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn status(session: &Session, format: &str) -> Result<()> {
    let credential = session.credential();
    let version = session.version().map(|v| v.to_string());
    let expires_at = credential.expires_at.map(|t| t.to_rfc3339());

    match format {
        "json" => {
            let body = serde_json::json!({
                "address": session.root().address().as_str(),
                "namespace": session.namespace(),
                "version": version,
                "enterprise": session.is_enterprise(),
                "policies": credential.policies,
                "token_namespace": credential.namespace,
                "expires_at": expires_at,
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        _ => {
            println!("Address:     {}", session.root().address());
            println!("Namespace:   {}", session.namespace().unwrap_or("(root)"));
            println!("Version:     {}", version.as_deref().unwrap_or("unknown"));
            println!("Enterprise:  {}", session.is_enterprise());
            println!("Policies:    {}", credential.policies.join(", "));
            if let Some(ns) = &credential.namespace {
                println!("Token ns:    {}", ns);
            }
            if let Some(expires_at) = expires_at {
                println!("Expires at:  {}", expires_at);
            }
        }
    }
    Ok(())
}

#[derive(serde::Deserialize)]
struct LookupData {
    data: TokenInfo,
}

async fn lookup(session: &Session, namespace: Option<String>) -> Result<()> {
    let client = session.client(namespace.as_deref())?;
    let response: LookupData = client
        .get("auth/token/lookup-self")
        .await
        .context("Token lookup failed")?;

    let info = response.data;
    println!("Namespace:   {}", client.namespace().unwrap_or("(root)"));
    println!("Policies:    {}", info.policies.join(", "));
    println!("TTL:         {}s", info.ttl);
    if let Some(name) = &info.display_name {
        println!("Name:        {}", name);
    }
    if let Some(ns) = info.namespace() {
        println!("Token ns:    {}", ns);
    }
    Ok(())
}

async fn read(session: &Session, path: &str, namespace: Option<String>) -> Result<()> {
    let client = session.client(namespace.as_deref())?;
    let body: serde_json::Value = client
        .get(path)
        .await
        .with_context(|| format!("Failed to read {}", path))?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

fn supports(session: &Session, version: &str) -> Result<()> {
    let min = semver_version(version)?;
    let supported = session.supports_version(&min);
    match session.version() {
        Some(current) => println!("{} >= {}: {}", current, min, supported),
        None => println!("Server version unknown, {} treated as unsupported", min),
    }
    if !supported {
        std::process::exit(1);
    }
    Ok(())
}

fn semver_version(value: &str) -> Result<vaultline_core::Version> {
    vaultline_core::VersionInfo::parse(value)
        .map(|info| info.version)
        .with_context(|| format!("Invalid version {:?}", value))
}
