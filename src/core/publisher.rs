use crate::config::LinkConfig;
use crate::core::connection::{ConnectionManager, LinkStatus};
use crate::core::constants::{CHANNEL, CONTENT_TYPE_JSON, PUBLISHER_APP_SUFFIX};
use crate::core::endpoint::{Endpoint, Role};
use crate::core::error::EngineError;
use crate::core::ledger::{Confirmation, DeliveryLedger};
use crate::core::topology::Topology;
use crate::core::url::{format_url, parse_target, redacted, UrlFlavor};
use crate::runtime::{LinkHandle, Stopper};
use async_trait::async_trait;
use bytes::Bytes;
use probelink_client::{BrokerLink, LinkTarget};
use probelink_protocol::{Acknowledgement, BasicProperties, BasicPublish, Method};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// An application message waiting for the publisher to pick it up.
#[derive(Debug)]
pub(crate) struct QueuedMessage {
    body: Bytes,
    headers: Vec<(String, String)>,
    enqueued_at: Instant,
}

/// Top-level fields of a JSON object, as message headers. Strings go out
/// unquoted, everything else as compact JSON.
fn headers_of(value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let rendered = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), rendered)
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Enqueues messages for a publisher. Cheap to clone, usable from any task.
#[derive(Debug, Clone)]
pub struct Producer {
    tx: mpsc::Sender<QueuedMessage>,
    shutdown: watch::Receiver<bool>,
}

impl Producer {
    fn ensure_running(&self) -> Result<(), EngineError> {
        if *self.shutdown.borrow() || self.shutdown.has_changed().is_err() {
            return Err(EngineError::Stopped);
        }
        Ok(())
    }

    fn encode<T: Serialize + ?Sized>(message: &T) -> Result<QueuedMessage, EngineError> {
        let value = serde_json::to_value(message)?;
        Ok(QueuedMessage {
            body: Bytes::from(serde_json::to_vec(&value)?),
            headers: headers_of(&value),
            enqueued_at: Instant::now(),
        })
    }

    /// Serializes `message` as JSON and enqueues it, waiting while the queue is full.
    pub async fn publish<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), EngineError> {
        self.ensure_running()?;
        let queued = Self::encode(message)?;
        self.tx.send(queued).await.map_err(|_| EngineError::Stopped)
    }

    pub fn try_publish<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), EngineError> {
        self.ensure_running()?;
        let queued = Self::encode(message)?;
        self.tx.try_send(queued).map_err(|e| match e {
            TrySendError::Full(_) => EngineError::QueueFull,
            TrySendError::Closed(_) => EngineError::Stopped,
        })
    }

    /// Messages enqueued but not yet picked up by the publisher.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Publisher half of a link: confirm mode, sequence numbers, ledger upkeep.
pub struct PublisherEngine {
    topology: Topology,
    routing_key: String,
    properties: BasicProperties,
    outbound: mpsc::Receiver<QueuedMessage>,
    /// Taken off the queue but never written; goes out first on the next pump.
    unsent: Option<QueuedMessage>,
    ledger: Arc<DeliveryLedger>,
    batch: usize,
}

impl PublisherEngine {
    fn next_message(&mut self) -> Option<QueuedMessage> {
        self.unsent.take().or_else(|| self.outbound.try_recv().ok())
    }

    fn confirm(&self, ack: Acknowledgement, outcome: Confirmation) {
        if ack.multiple {
            let resolved = self.ledger.resolve_through(ack.delivery_tag, outcome);
            debug!(through = ack.delivery_tag, resolved, ?outcome, "confirmed multiple");
        } else {
            match self.ledger.resolve(ack.delivery_tag, outcome) {
                Ok(waited) => debug!(sequence = ack.delivery_tag, ?outcome, ?waited, "confirmed"),
                Err(e) => warn!(error = %e, "confirmation does not match a pending message"),
            }
        }
        if outcome == Confirmation::Nack {
            warn!(sequence = ack.delivery_tag, multiple = ack.multiple, "broker rejected message");
        }
    }
}

#[async_trait]
impl Endpoint for PublisherEngine {
    fn role(&self) -> Role {
        Role::Publisher
    }

    fn topology(&self) -> &Topology {
        &self.topology
    }

    fn activation(&self) -> Method {
        Method::ConfirmSelect
    }

    fn on_activated(&mut self, reply: &Method) -> bool {
        matches!(reply, Method::ConfirmSelectOk)
    }

    fn begin_generation(&mut self, generation: u64) {
        let abandoned = self.ledger.reset(generation);
        if abandoned > 0 {
            warn!(abandoned, generation, "unconfirmed messages from the previous connection discarded");
        }
    }

    fn pumps(&self) -> bool {
        true
    }

    async fn pump(&mut self, link: &mut BrokerLink) -> Result<usize, EngineError> {
        let mut sent = 0;
        while sent < self.batch {
            let Some(queued) = self.next_message() else {
                break;
            };
            let sequence = self.ledger.next_sequence();

            let publish = BasicPublish {
                exchange: self.topology.exchange().to_string(),
                routing_key: self.routing_key.clone(),
                properties: BasicProperties {
                    headers: queued.headers.clone(),
                    ..self.properties.clone()
                },
                body: queued.body.clone(),
            };
            if let Err(e) = link.send(CHANNEL, &Method::BasicPublish(publish)).await {
                warn!(sequence, error = %e, "publish write failed, message kept for the next connection");
                self.unsent = Some(queued);
                return Err(e.into());
            }
            self.ledger.record_pending(sequence)?;
            debug!(sequence, waited = ?queued.enqueued_at.elapsed(), "published");
            sent += 1;
        }

        if sent > 0 {
            let snap = self.ledger.snapshot();
            debug!(
                sent,
                pending = snap.pending,
                acked = snap.acked,
                nacked = snap.nacked,
                "publish batch done"
            );
        }
        Ok(sent)
    }

    async fn on_method(&mut self, method: Method, _link: &mut BrokerLink) -> Result<(), EngineError> {
        match method {
            Method::BasicAck(ack) => self.confirm(ack, Confirmation::Ack),
            Method::BasicNack(nack) => self.confirm(nack, Confirmation::Nack),
            other => debug!(op = ?other.op_code(), "publisher ignores method"),
        }
        Ok(())
    }
}

/// A configured, not yet running publisher.
pub struct Publisher {
    config: LinkConfig,
    target: LinkTarget,
    display_url: String,
    topology: Topology,
    ledger: Arc<DeliveryLedger>,
    outbound_tx: mpsc::Sender<QueuedMessage>,
    outbound_rx: mpsc::Receiver<QueuedMessage>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Publisher {
    /// Validates config and topology, formats the broker URL and creates the
    /// outbound queue. Nothing touches the network yet.
    pub fn setup(config: LinkConfig, topology: Topology) -> Result<Self, EngineError> {
        config.validate()?;
        if topology.routing_key().is_none() {
            return Err(EngineError::InvalidTopology(
                "publisher topology needs a routing key".into(),
            ));
        }

        let url = format_url(&config.connection, UrlFlavor::Publisher)?;
        let target = parse_target(&url, &config)?;
        let (outbound_tx, outbound_rx) = mpsc::channel(config.queue_capacity);
        let (shutdown, _) = watch::channel(false);

        Ok(Publisher {
            display_url: redacted(&url),
            config,
            target,
            topology,
            ledger: Arc::new(DeliveryLedger::new()),
            outbound_tx,
            outbound_rx,
            shutdown: Arc::new(shutdown),
        })
    }

    pub fn producer(&self) -> Producer {
        Producer {
            tx: self.outbound_tx.clone(),
            shutdown: self.shutdown.subscribe(),
        }
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

    fn into_manager(self) -> (ConnectionManager<PublisherEngine>, watch::Receiver<LinkStatus>) {
        let (status_tx, status_rx) = watch::channel(LinkStatus::default());
        let app_id = format!("{}{}", self.topology.plugin(), PUBLISHER_APP_SUFFIX);
        let routing_key = self.topology.routing_key().unwrap_or_default().to_string();

        let engine = PublisherEngine {
            topology: self.topology,
            routing_key,
            properties: BasicProperties {
                app_id: Some(app_id),
                content_type: Some(CONTENT_TYPE_JSON.to_string()),
                headers: Vec::new(),
            },
            outbound: self.outbound_rx,
            unsent: None,
            ledger: self.ledger,
            batch: self.config.publish_batch,
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

    /// Spawns the reactor onto the current tokio runtime.
    pub fn start(self) -> LinkHandle {
        let stopper = self.stopper();
        let ledger = self.ledger();
        let (manager, status) = self.into_manager();
        info!("publisher spawned");
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
