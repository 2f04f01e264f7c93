use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "probelink-broker")]
pub struct Params {
    #[arg(long, env = "PROBELINK_PORT", default_value_t = 5672)]
    pub port: u16,

    /// Optional TOML file overriding credentials, heartbeat and frame size.
    #[arg(long, env = "PROBELINK_BROKER_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "PROBELINK_LOG", default_value = "debug")]
    pub log_level: tracing::Level,
}
