use probelink_broker::{spawn_local, BrokerConfig};
use probelink_client::{BrokerLink, Incoming, LinkTarget};
use probelink_protocol::Method;
use std::net::SocketAddr;
use std::time::Duration;

pub const CHANNEL: u16 = 1;

pub async fn start_broker() -> SocketAddr {
    let (addr, _task) = spawn_local(BrokerConfig::default())
        .await
        .expect("broker should bind");
    addr
}

pub fn target(addr: SocketAddr) -> LinkTarget {
    LinkTarget {
        host: addr.ip().to_string(),
        port: addr.port(),
        attempt_delay: Duration::from_millis(10),
        ..LinkTarget::default()
    }
}

pub async fn connect(addr: SocketAddr) -> BrokerLink {
    let mut link = BrokerLink::connect(&target(addr)).await.expect("connect");
    assert_eq!(call(&mut link, Method::ChannelOpen).await, Method::ChannelOpenOk);
    link
}

/// Next method from the broker, skipping heartbeats.
pub async fn next_method(link: &mut BrokerLink) -> Method {
    loop {
        let incoming = tokio::time::timeout(Duration::from_secs(5), link.recv())
            .await
            .expect("broker answered in time")
            .expect("link stays open");
        if let Incoming::Method { method, .. } = incoming {
            return method;
        }
    }
}

pub async fn call(link: &mut BrokerLink, method: Method) -> Method {
    link.send(CHANNEL, &method).await.expect("send");
    next_method(link).await
}
