use clap::Parser;
use metrics_relay::{
    collector::run_collector,
    config::{CollectorArgs, CollectorConfig, process_env},
    util::{cancel_on_shutdown_signal, init_tracing, parse_level},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = CollectorArgs::parse();

    let config = CollectorConfig::load(args, &process_env)?;
    init_tracing("relay_collector", parse_level(&config.log_level));
    debug!(
        "collector on {} (dsn set: {}, file: {:?})",
        config.address,
        config.database_dsn.is_some(),
        config.file_storage_path
    );

    let cancel = CancellationToken::new();
    cancel_on_shutdown_signal(cancel.clone());

    run_collector(config, cancel).await
}
