use anyhow::{Context, Result};
use clap::Parser;
use probelink_broker::server::listener;
use probelink_broker::server::params::Params;
use probelink_broker::BrokerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let params = Params::parse();

    tracing_subscriber::fmt()
        .with_max_level(params.log_level)
        .with_target(false)
        .with_thread_ids(true)
        .compact()
        .init();

    let config = BrokerConfig::load_or_default(params.config.as_ref())
        .context("loading broker config")?;

    tokio::select! {
        result = listener::start(params.port, config) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
    }
}
