//! Collector side of the pipeline
//!
//! Builds the configured storage backend, serves the HTTP API (and the gRPC
//! service with the `grpc` feature) until cancelled, then closes the backend
//! so the file backend writes its final snapshot.

pub mod api;

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::codec;
use crate::config::CollectorConfig;
use crate::net::TrustedSubnet;
use crate::storage::{self, StorageBackend};

use api::{ApiState, DecodeKeys};

/// Resolve `host:port` (e.g. `localhost:8080`) to a bindable address
pub fn resolve_addr(address: &str) -> Result<SocketAddr> {
    address
        .to_socket_addrs()
        .with_context(|| format!("invalid address {address}"))?
        .next()
        .with_context(|| format!("address {address} did not resolve"))
}

fn decode_keys(config: &CollectorConfig) -> Result<DecodeKeys> {
    let private_key = config
        .crypto_key
        .as_deref()
        .map(codec::load_private_key)
        .transpose()
        .context("failed to load private key")?;

    Ok(DecodeKeys::new(config.key.clone(), private_key))
}

fn trusted_subnet(config: &CollectorConfig) -> Result<Option<TrustedSubnet>> {
    config
        .trusted_subnet
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<TrustedSubnet>)
        .transpose()
        .context("failed to parse trusted subnet")
}

/// Run the collector until `cancel` fires
#[instrument(skip_all)]
pub async fn run_collector(config: CollectorConfig, cancel: CancellationToken) -> Result<()> {
    let storage = storage::open_backend(&config.storage())
        .await
        .context("failed to open storage backend")?;

    let keys = decode_keys(&config)?;
    let subnet = trusted_subnet(&config)?;
    if let Some(subnet) = subnet {
        info!("only accepting agents from {subnet}");
    }
    let bind_addr = resolve_addr(&config.address)?;

    let state = ApiState::new(storage.clone()).with_trusted_subnet(subnet);
    let (addr, api_handle) =
        api::spawn_api_server(bind_addr, state, keys, cancel.clone()).await?;
    info!("collector accepting metrics on {addr}");

    let grpc_handle = spawn_grpc(&config, storage.clone(), cancel.clone()).await?;

    cancel.cancelled().await;
    info!("shutting down collector");

    if let Err(e) = api_handle.await {
        warn!("API server task ended abnormally: {e}");
    }
    if let Some(handle) = grpc_handle
        && let Err(e) = handle.await
    {
        warn!("gRPC server task ended abnormally: {e}");
    }

    close_storage(storage).await;
    Ok(())
}

async fn close_storage(storage: Arc<dyn StorageBackend>) {
    match storage.close().await {
        Ok(()) => info!("{} storage closed", storage.describe()),
        Err(e) => error!("failed to close {} storage: {e}", storage.describe()),
    }
}

#[cfg(feature = "grpc")]
async fn spawn_grpc(
    config: &CollectorConfig,
    storage: Arc<dyn StorageBackend>,
    cancel: CancellationToken,
) -> Result<Option<tokio::task::JoinHandle<()>>> {
    let Some(address) = config.grpc_address.as_deref().filter(|a| !a.is_empty()) else {
        return Ok(None);
    };

    let (_, handle) = crate::grpc::spawn_grpc_server(resolve_addr(address)?, storage, cancel).await?;
    Ok(Some(handle))
}

#[cfg(not(feature = "grpc"))]
async fn spawn_grpc(
    config: &CollectorConfig,
    _storage: Arc<dyn StorageBackend>,
    _cancel: CancellationToken,
) -> Result<Option<tokio::task::JoinHandle<()>>> {
    if config.grpc_address.as_deref().is_some_and(|a| !a.is_empty()) {
        warn!("GRPC_ADDRESS is set but this build has no `grpc` feature, ignoring");
    }
    Ok(None)
}
