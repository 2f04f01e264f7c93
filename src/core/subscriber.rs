use crate::config::LinkConfig;
use crate::core::connection::{stop_signalled, ConnectionManager, LinkStatus};
use crate::core::constants::CHANNEL;
use crate::core::endpoint::{Endpoint, Role};
use crate::core::envelope::Envelope;
use crate::core::error::EngineError;
use crate::core::ledger::DeliveryLedger;
use crate::core::topology::Topology;
use crate::core::url::{format_url, parse_target, redacted, UrlFlavor};
use crate::runtime::{LinkHandle, Stopper};
use async_trait::async_trait;
use probelink_client::{BrokerLink, LinkTarget};
use probelink_protocol::{Acknowledgement, BasicConsume, BasicDeliver, ConsumerTag, Method};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Subscriber half of a link: registers a consumer, acks each delivery and
/// forwards it downstream as an [`Envelope`].
pub struct SubscriberEngine {
    topology: Topology,
    downstream: mpsc::Sender<Envelope>,
    ledger: Arc<DeliveryLedger>,
    consumer_tag: Option<String>,
    shutdown: watch::Receiver<bool>,
}

impl SubscriberEngine {
    async fn deliver(&mut self, delivery: BasicDeliver, link: &mut BrokerLink) -> Result<(), EngineError> {
        let tag = delivery.delivery_tag;
        link.send(CHANNEL, &Method::BasicAck(Acknowledgement::single(tag)))
            .await?;
        self.ledger.consumer().record_ack();

        let envelope = Envelope::from_delivery(&delivery);
        debug!(
            delivery_tag = tag,
            routing_key = %delivery.routing_key,
            id = %envelope.id,
            redelivered = delivery.redelivered,
            "delivery acked"
        );

        let mut stop = self.shutdown.clone();
        tokio::select! {
            biased;
            sent = self.downstream.send(envelope) => match sent {
                Ok(()) => self.ledger.consumer().record_forwarded(),
                Err(lost) => {
                    error!(id = %lost.0.id, delivery_tag = tag, "downstream receiver is gone, envelope dropped");
                    self.ledger.consumer().record_dropped();
                }
            },
            _ = stop_signalled(&mut stop) => {
                warn!(delivery_tag = tag, "stopping while downstream is full, envelope dropped");
                self.ledger.consumer().record_dropped();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Endpoint for SubscriberEngine {
    fn role(&self) -> Role {
        Role::Subscriber
    }

    fn topology(&self) -> &Topology {
        &self.topology
    }

    fn activation(&self) -> Method {
        // empty tag lets the broker pick one
        Method::BasicConsume(BasicConsume {
            queue: self.topology.queue().to_string(),
            consumer_tag: String::new(),
        })
    }

    fn on_activated(&mut self, reply: &Method) -> bool {
        match reply {
            Method::BasicConsumeOk(ok) => {
                info!(consumer_tag = %ok.consumer_tag, queue = %self.topology.queue(), "consuming");
                self.consumer_tag = Some(ok.consumer_tag.clone());
                true
            }
            _ => false,
        }
    }

    fn deactivation(&self) -> Option<Method> {
        self.consumer_tag
            .as_ref()
            .map(|tag| Method::BasicCancel(ConsumerTag::new(tag.clone())))
    }

    fn begin_generation(&mut self, generation: u64) {
        self.consumer_tag = None;
        self.ledger.reset(generation);
    }

    async fn on_method(&mut self, method: Method, link: &mut BrokerLink) -> Result<(), EngineError> {
        match method {
            Method::BasicDeliver(delivery) => self.deliver(delivery, link).await,
            Method::BasicCancelOk(tag) => {
                debug!(consumer_tag = %tag.consumer_tag, "consumer cancelled");
                Ok(())
            }
            other => {
                debug!(op = ?other.op_code(), "subscriber ignores method");
                Ok(())
            }
        }
    }
}

/// A configured, not yet running subscriber.
pub struct Subscriber {
    config: LinkConfig,
    target: LinkTarget,
    display_url: String,
    topology: Topology,
    ledger: Arc<DeliveryLedger>,
    downstream: mpsc::Sender<Envelope>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Subscriber {
    /// `downstream` receives one envelope per delivery, in arrival order.
    pub fn setup(
        config: LinkConfig,
        topology: Topology,
        downstream: mpsc::Sender<Envelope>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let url = format_url(&config.connection, UrlFlavor::Subscriber)?;
        let target = parse_target(&url, &config)?;
        let (shutdown, _) = watch::channel(false);

        Ok(Subscriber {
            display_url: redacted(&url),
            config,
            target,
            topology,
            ledger: Arc::new(DeliveryLedger::new()),
            downstream,
            shutdown: Arc::new(shutdown),
        })
    }

    pub fn ledger(&self) -> Arc<DeliveryLedger> {
        Arc::clone(&self.ledger)
    }

    pub fn stopper(&self) -> Stopper {
        Stopper::new(Arc::clone(&self.shutdown))
    }

    pub fn url(&self) -> &str {
        &self.display_url
    }

    fn into_manager(self) -> (ConnectionManager<SubscriberEngine>, watch::Receiver<LinkStatus>) {
        let (status_tx, status_rx) = watch::channel(LinkStatus::default());
        let engine = SubscriberEngine {
            topology: self.topology,
            downstream: self.downstream,
            ledger: self.ledger,
            consumer_tag: None,
            shutdown: self.shutdown.subscribe(),
        };
        let manager = ConnectionManager::new(
            self.target,
            self.display_url,
            engine,
            &self.config,
            self.shutdown.subscribe(),
            status_tx,
        );
        (manager, status_rx)
    }

    pub fn start(self) -> LinkHandle {
        let stopper = self.stopper();
        let ledger = self.ledger();
        let (manager, status) = self.into_manager();
        info!("subscriber spawned");
        LinkHandle::spawn(manager, stopper, status, ledger)
    }

    /// Drives the reactor on the current task until a `Stopper` fires.
    pub async fn run(self) {
        let shutdown = Arc::clone(&self.shutdown);
        let (manager, _status) = self.into_manager();
        manager.run().await;
        drop(shutdown);
    }
}
