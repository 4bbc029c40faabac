use anyhow::{Context, Result};
use clap::Parser;
use std::env;

use crate::services::image_store::{DEFAULT_DEDUP_CAPACITY, DEFAULT_MAX_UPLOAD_BYTES, StorePolicy};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub max_upload_bytes: usize,
    pub dedup_capacity: usize,
    pub cross_owner_lookup: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Content-addressed image store API")]
pub struct Args {
    /// Host to bind to (overrides IMAGE_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides IMAGE_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides IMAGE_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Maximum accepted payload in bytes (overrides IMAGE_STORE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Entry bound for the in-process dedup index (overrides IMAGE_STORE_DEDUP_CAPACITY)
    #[arg(long)]
    pub dedup_capacity: Option<usize>,

    /// Allow lookups to fall back to the cross-owner index scan
    /// (overrides IMAGE_STORE_CROSS_OWNER_LOOKUP)
    #[arg(long)]
    pub cross_owner_lookup: Option<bool>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("IMAGE_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("IMAGE_STORE_PORT", 3000u16)?;
        let env_storage =
            env::var("IMAGE_STORE_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_max_upload = parse_env("IMAGE_STORE_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;
        let env_capacity = parse_env("IMAGE_STORE_DEDUP_CAPACITY", DEFAULT_DEDUP_CAPACITY)?;
        let env_cross_owner = parse_env("IMAGE_STORE_CROSS_OWNER_LOOKUP", true)?;

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            dedup_capacity: args.dedup_capacity.unwrap_or(env_capacity),
            cross_owner_lookup: args.cross_owner_lookup.unwrap_or(env_cross_owner),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Store behavior derived from this configuration.
    pub fn store_policy(&self) -> StorePolicy {
        StorePolicy {
            max_upload_bytes: self.max_upload_bytes,
            dedup_capacity: self.dedup_capacity,
            cross_owner_lookup: self.cross_owner_lookup,
        }
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).context(format!("reading {}", name)),
    }
}
