use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use metrics_relay::{
    agent::{Agent, HttpSender, Sender},
    codec,
    config::{AgentArgs, AgentConfig, process_env},
    util::{cancel_on_shutdown_signal, init_tracing},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};

fn init() {
    dotenv::dotenv().ok();
    init_tracing("relay_agent", LevelFilter::INFO);
}

fn build_sender(config: &AgentConfig) -> anyhow::Result<Arc<dyn Sender>> {
    #[cfg(feature = "grpc")]
    if let Some(address) = config.grpc_address.as_deref().filter(|a| !a.is_empty()) {
        info!("delivering over gRPC to {address}");
        return Ok(Arc::new(metrics_relay::agent::GrpcSender::new(address)?));
    }

    let public_key = config
        .crypto_key
        .as_deref()
        .map(codec::load_public_key)
        .transpose()
        .context("failed to load public key")?;

    let sender = HttpSender::new(&config.address, config.key.clone(), public_key)?;
    info!("delivering over HTTP to {}", sender.url());
    Ok(Arc::new(sender))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = AgentArgs::parse();

    let config = AgentConfig::load(args, &process_env)?;
    let sender = build_sender(&config)?;

    let cancel = CancellationToken::new();
    cancel_on_shutdown_signal(cancel.clone());

    Agent::new(sender, config.schedule(), cancel.clone())
        .run(cancel)
        .await
}
