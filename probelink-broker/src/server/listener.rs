use crate::config::BrokerConfig;
use crate::core::broker::Broker;
use crate::server::session::Session;
use crate::types::SharedBroker;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub async fn start(port: u16, config: BrokerConfig) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .context("Failed to bind TCP listener")?;
    info!(%addr, "broker listening");
    serve(listener, Arc::new(Mutex::new(Broker::new())), Arc::new(config)).await
}

/// Accepts connections forever on an already bound listener.
pub async fn serve(listener: TcpListener, broker: SharedBroker, config: Arc<BrokerConfig>) -> Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        if let Err(e) = socket.set_nodelay(true) {
            debug!(error = %e, "nodelay not set");
        }
        let id = broker.lock().await.register_session();
        debug!(session = id, %peer, "new incoming connection");

        let session = Session::new(id, socket, Arc::clone(&broker), Arc::clone(&config));
        tokio::spawn(async move {
            if let Err(e) = session.run().await {
                warn!(session = id, error = %e, "session ended with error");
            }
        });
    }
}

/// Binds an ephemeral loopback port and serves in the background.
pub async fn spawn_local(config: BrokerConfig) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("Failed to bind TCP listener")?;
    let addr = listener.local_addr()?;
    let broker = Arc::new(Mutex::new(Broker::new()));
    let handle = tokio::spawn(async move {
        if let Err(e) = serve(listener, broker, Arc::new(config)).await {
            warn!(error = %e, "broker stopped accepting");
        }
    });
    Ok((addr, handle))
}
