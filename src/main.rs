use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use probelink::{Envelope, LinkConfig, Publisher, Subscriber, Topology};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::info;

// cargo run -- publish --plugin TEST --app app1 --message '{"info":"Testing !!!"}'
// cargo run -- subscribe --plugin TEST

#[derive(Parser, Debug)]
#[command(name = "probelink")]
struct Params {
    /// TOML file with broker connection settings.
    #[arg(long, env = "PROBELINK_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[arg(long, env = "PROBELINK_LOG", default_value = "info", global = true)]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish a JSON message to `<plugin>.<app>`.
    Publish {
        #[arg(long)]
        plugin: String,
        #[arg(long)]
        app: String,
        #[arg(long)]
        message: String,
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Print every envelope delivered for `<plugin>.*` until ctrl-c.
    Subscribe {
        #[arg(long)]
        plugin: String,
        #[arg(long = "app")]
        apps: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let params = Params::parse();

    tracing_subscriber::fmt()
        .with_max_level(params.log_level)
        .with_target(false)
        .with_thread_ids(true)
        .compact()
        .init();

    let config = LinkConfig::load_or_default(params.config.as_ref())
        .context("loading link config")?;

    match params.command {
        Command::Publish {
            plugin,
            app,
            message,
            count,
        } => publish(config, &plugin, &app, &message, count).await,
        Command::Subscribe { plugin, apps } => subscribe(config, &plugin, &apps).await,
    }
}

async fn publish(config: LinkConfig, plugin: &str, app: &str, message: &str, count: usize) -> Result<()> {
    let body: serde_json::Value =
        serde_json::from_str(message).context("--message must be valid JSON")?;
    let topology = Topology::for_publisher(plugin, app)?;
    let publisher = Publisher::setup(config, topology)?;
    let producer = publisher.producer();

    for _ in 0..count {
        producer.publish(&body).await?;
    }

    let handle = publisher.start();
    let ledger = handle.ledger().clone();

    tokio::select! {
        _ = async {
            while ledger.ack_count() + ledger.nack_count() < count as u64 {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        } => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    let snap = ledger.snapshot();
    info!(acked = snap.acked, nacked = snap.nacked, pending = snap.pending, "publish finished");
    handle.stop().await;
    Ok(())
}

async fn subscribe(config: LinkConfig, plugin: &str, apps: &[String]) -> Result<()> {
    let mut topology = Topology::for_subscriber(plugin)?;
    for app in apps {
        topology = topology.with_app(app)?;
    }

    let (tx, mut rx) = mpsc::channel::<Envelope>(config.queue_capacity);
    let subscriber = Subscriber::setup(config, topology, tx)?;
    let handle = subscriber.start();

    loop {
        tokio::select! {
            envelope = rx.recv() => match envelope {
                Some(envelope) => println!("{}", envelope.to_json()),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    handle.stop().await;
    let stats = handle.ledger().consumer();
    info!(acked = stats.acked(), forwarded = stats.forwarded(), dropped = stats.dropped(), "subscriber finished");
    Ok(())
}
