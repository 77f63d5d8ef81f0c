//! Agent and collector configuration
//!
//! Values are layered: built-in defaults, then the JSON config file, then
//! command-line flags, then environment variables. Each layer only
//! overrides what it actually sets.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::agent::Schedule;
use crate::storage::StorageConfig;

/// Environment lookup, injectable for tests
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Reads the real process environment
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Collector HTTP address (`host:port`)
    pub address: String,

    /// HMAC secret for the `HashSHA256` header
    #[serde(rename = "secret_key")]
    pub key: Option<String>,

    /// PEM public key used to encrypt payloads
    pub crypto_key: Option<PathBuf>,

    /// Collector gRPC address; when set, gRPC replaces HTTP
    pub grpc_address: Option<String>,

    /// Seconds between samples
    pub poll_interval: u64,

    /// Seconds between reports
    pub report_interval: u64,

    /// Concurrent deliveries (workers and queue size)
    pub rate_limit: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            key: None,
            crypto_key: None,
            grpc_address: None,
            poll_interval: 2,
            report_interval: 10,
            rate_limit: 3,
        }
    }
}

impl AgentConfig {
    pub fn schedule(&self) -> Schedule {
        Schedule {
            poll_interval: Duration::from_secs(self.poll_interval.max(1)),
            report_interval: Duration::from_secs(self.report_interval.max(1)),
            rate_limit: self.rate_limit.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// HTTP bind address (`host:port`)
    pub address: String,

    pub log_level: String,

    /// Database connection string; selects the database backend
    pub database_dsn: Option<String>,

    /// Snapshot file; selects the file backend when no DSN is set
    pub file_storage_path: Option<PathBuf>,

    /// HMAC secret; when set, encoded requests must be signed
    #[serde(rename = "secret_key")]
    pub key: Option<String>,

    /// PEM private key used to decrypt payloads
    pub crypto_key: Option<PathBuf>,

    /// gRPC bind address; the gRPC server only starts when set
    pub grpc_address: Option<String>,

    /// CIDR block agents must report themselves in via `X-Real-IP`
    pub trusted_subnet: Option<String>,

    /// Seconds between file snapshots, `0` for write-through
    pub store_interval: u64,

    /// Load the snapshot file on startup
    pub restore: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            log_level: "info".to_string(),
            database_dsn: None,
            file_storage_path: None,
            key: None,
            crypto_key: None,
            grpc_address: None,
            trusted_subnet: None,
            store_interval: 300,
            restore: true,
        }
    }
}

impl CollectorConfig {
    pub fn storage(&self) -> StorageConfig {
        StorageConfig {
            dsn: self.database_dsn.clone(),
            file_path: self.file_storage_path.clone(),
            store_interval: self.store_interval,
            restore: self.restore,
        }
    }
}

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "relay-agent", about = "Samples host metrics and ships them to a collector")]
pub struct AgentArgs {
    /// Collector address
    #[arg(short = 'a', long)]
    pub address: Option<String>,

    /// Signing secret
    #[arg(short = 'k', long)]
    pub key: Option<String>,

    /// Path to the collector's public key
    #[arg(long = "crypto-key")]
    pub crypto_key: Option<PathBuf>,

    /// Path to a JSON config file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Collector gRPC address
    #[arg(long = "grpc-addr")]
    pub grpc_address: Option<String>,

    /// Poll interval in seconds
    #[arg(short = 'p', long)]
    pub poll_interval: Option<u64>,

    /// Report interval in seconds
    #[arg(short = 'r', long)]
    pub report_interval: Option<u64>,

    /// Concurrent deliveries
    #[arg(short = 'l', long)]
    pub rate_limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "relay-collector", about = "Receives and stores metrics")]
pub struct CollectorArgs {
    /// Bind address
    #[arg(short = 'a', long)]
    pub address: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Database connection string
    #[arg(short = 'd', long)]
    pub database_dsn: Option<String>,

    /// Snapshot file path
    #[arg(short = 'f', long)]
    pub file_storage_path: Option<PathBuf>,

    /// Signing secret
    #[arg(short = 'k', long)]
    pub key: Option<String>,

    /// Path to the private key
    #[arg(long = "crypto-key")]
    pub crypto_key: Option<PathBuf>,

    /// Path to a JSON config file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// gRPC bind address
    #[arg(long = "grpc-addr")]
    pub grpc_address: Option<String>,

    /// Trusted agent subnet in CIDR notation
    #[arg(short = 't', long)]
    pub trusted_subnet: Option<String>,

    /// Snapshot interval in seconds, 0 writes on every save
    #[arg(short = 'i', long)]
    pub store_interval: Option<u64>,

    /// Restore the snapshot on startup
    #[arg(short = 'r', long)]
    pub restore: Option<bool>,
}

pub fn read_config_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    serde_json::from_str(&file_content)
        .with_context(|| format!("invalid configuration file {}", path.display()))
        .inspect(|_| trace!("loaded config from {}", path.display()))
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn set_some<T>(target: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *target = value;
    }
}

/// Parse an environment variable if present
fn from_env<T>(env: EnvLookup<'_>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid value for {name} ({raw}): {e}")),
        None => Ok(None),
    }
}

fn config_path(env: EnvLookup<'_>, flag: Option<&PathBuf>) -> Option<PathBuf> {
    env("CONFIG")
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .or_else(|| flag.cloned())
}

impl AgentConfig {
    /// Layer defaults, config file, flags and environment
    pub fn load(args: AgentArgs, env: EnvLookup<'_>) -> Result<Self> {
        let mut config = match config_path(env, args.config.as_ref()) {
            Some(path) => read_config_file(&path)?,
            None => Self::default(),
        };

        set(&mut config.address, args.address);
        set_some(&mut config.key, args.key);
        set_some(&mut config.crypto_key, args.crypto_key);
        set_some(&mut config.grpc_address, args.grpc_address);
        set(&mut config.poll_interval, args.poll_interval);
        set(&mut config.report_interval, args.report_interval);
        set(&mut config.rate_limit, args.rate_limit);

        set(&mut config.address, from_env(env, "ADDRESS")?);
        set_some(&mut config.key, from_env(env, "KEY")?);
        set_some(&mut config.crypto_key, from_env(env, "CRYPTO_KEY")?);
        set_some(&mut config.grpc_address, from_env(env, "GRPC_ADDRESS")?);
        set(&mut config.poll_interval, from_env(env, "POLL_INTERVAL")?);
        set(&mut config.report_interval, from_env(env, "REPORT_INTERVAL")?);
        set(&mut config.rate_limit, from_env(env, "RATE_LIMIT")?);

        Ok(config)
    }
}

impl CollectorConfig {
    /// Layer defaults, config file, flags and environment
    pub fn load(args: CollectorArgs, env: EnvLookup<'_>) -> Result<Self> {
        let mut config = match config_path(env, args.config.as_ref()) {
            Some(path) => read_config_file(&path)?,
            None => Self::default(),
        };

        set(&mut config.address, args.address);
        set(&mut config.log_level, args.log_level);
        set_some(&mut config.database_dsn, args.database_dsn);
        set_some(&mut config.file_storage_path, args.file_storage_path);
        set_some(&mut config.key, args.key);
        set_some(&mut config.crypto_key, args.crypto_key);
        set_some(&mut config.grpc_address, args.grpc_address);
        set_some(&mut config.trusted_subnet, args.trusted_subnet);
        set(&mut config.store_interval, args.store_interval);
        set(&mut config.restore, args.restore);

        set(&mut config.address, from_env(env, "ADDRESS")?);
        set(&mut config.log_level, from_env(env, "LOG_LEVEL")?);
        set_some(&mut config.database_dsn, from_env(env, "DATABASE_DSN")?);
        set_some(&mut config.file_storage_path, from_env(env, "FILE_STORAGE_PATH")?);
        set_some(&mut config.key, from_env(env, "KEY")?);
        set_some(&mut config.crypto_key, from_env(env, "CRYPTO_KEY")?);
        set_some(&mut config.grpc_address, from_env(env, "GRPC_ADDRESS")?);
        set_some(&mut config.trusted_subnet, from_env(env, "TRUSTED_SUBNET")?);
        set(&mut config.store_interval, from_env(env, "STORE_INTERVAL")?);
        set(&mut config.restore, from_env(env, "RESTORE")?);

        Ok(config)
    }
}
