/*
In-memory exchanges and queues.

Publishing copies a message into every queue with a matching binding (once per
queue). Queues hand messages to their consumers round-robin through each
consumer's session outlet; the session owns a message from then on until it is
acked, or gives it back with `requeue_front`.
*/

use crate::core::error::BrokerError;
use crate::core::routing;
use bytes::Bytes;
use probelink_protocol::{BasicProperties, ExchangeKind};
use std::collections::{BTreeSet, HashMap, VecDeque};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

pub type SessionId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub exchange: String,
    pub routing_key: String,
    pub properties: BasicProperties,
    pub body: Bytes,
    pub redelivered: bool,
}

/// A message on its way from a queue to one consumer's session.
#[derive(Debug)]
pub struct Dispatch {
    pub channel: u16,
    pub consumer_tag: String,
    pub queue: String,
    pub message: StoredMessage,
}

#[derive(Debug)]
pub struct Consumer {
    pub session: SessionId,
    pub channel: u16,
    pub tag: String,
    pub outlet: UnboundedSender<Dispatch>,
}

#[derive(Debug)]
struct Binding {
    queue: String,
    pattern: String,
}

#[derive(Debug)]
struct Exchange {
    kind: ExchangeKind,
    bindings: Vec<Binding>,
}

#[derive(Debug, Default)]
struct Queue {
    messages: VecDeque<StoredMessage>,
    consumers: Vec<Consumer>,
    cursor: usize,
}

#[derive(Debug, Default)]
pub struct Broker {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    next_session: SessionId,
    next_consumer: u64,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_session(&mut self) -> SessionId {
        self.next_session += 1;
        self.next_session
    }

    /// Idempotent for the same kind; a different kind is a precondition failure.
    pub fn declare_exchange(&mut self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
        if name.is_empty() {
            return Err(BrokerError::EmptyName("exchange"));
        }
        match self.exchanges.get(name) {
            Some(existing) if existing.kind != kind => Err(BrokerError::KindMismatch {
                name: name.to_string(),
                existing: existing.kind,
                requested: kind,
            }),
            Some(_) => Ok(()),
            None => {
                debug!(exchange = name, %kind, "exchange created");
                self.exchanges.insert(
                    name.to_string(),
                    Exchange {
                        kind,
                        bindings: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    /// Returns how many messages the queue currently holds.
    pub fn declare_queue(&mut self, name: &str) -> Result<u32, BrokerError> {
        if name.is_empty() {
            return Err(BrokerError::EmptyName("queue"));
        }
        let queue = self.queues.entry(name.to_string()).or_default();
        Ok(queue.messages.len() as u32)
    }

    pub fn bind(&mut self, queue: &str, exchange: &str, pattern: &str) -> Result<(), BrokerError> {
        if !self.queues.contains_key(queue) {
            return Err(BrokerError::NoQueue(queue.to_string()));
        }
        let ex = self
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::NoExchange(exchange.to_string()))?;
        let exists = ex
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.pattern == pattern);
        if !exists {
            ex.bindings.push(Binding {
                queue: queue.to_string(),
                pattern: pattern.to_string(),
            });
        }
        Ok(())
    }

    /// Routes a message and returns how many queues received it.
    pub fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        properties: BasicProperties,
        body: Bytes,
    ) -> Result<usize, BrokerError> {
        let ex = self
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::NoExchange(exchange.to_string()))?;

        let targets: BTreeSet<String> = ex
            .bindings
            .iter()
            .filter(|b| routing::matches(ex.kind, &b.pattern, routing_key))
            .map(|b| b.queue.clone())
            .collect();

        for name in &targets {
            if let Some(queue) = self.queues.get_mut(name) {
                queue.messages.push_back(StoredMessage {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    properties: properties.clone(),
                    body: body.clone(),
                    redelivered: false,
                });
            }
            self.dispatch(name);
        }
        debug!(exchange, routing_key, queues = targets.len(), "message routed");
        Ok(targets.len())
    }

    pub fn next_consumer_tag(&mut self, session: SessionId) -> String {
        self.next_consumer += 1;
        format!("ctag-{}.{}", session, self.next_consumer)
    }

    pub fn consume(&mut self, queue: &str, consumer: Consumer) -> Result<(), BrokerError> {
        let q = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::NoQueue(queue.to_string()))?;
        debug!(queue, tag = %consumer.tag, "consumer registered");
        q.consumers.push(consumer);
        self.dispatch(queue);
        Ok(())
    }

    pub fn cancel(&mut self, session: SessionId, tag: &str) -> Result<(), BrokerError> {
        let mut found = false;
        for queue in self.queues.values_mut() {
            let before = queue.consumers.len();
            queue
                .consumers
                .retain(|c| !(c.session == session && c.tag == tag));
            found |= queue.consumers.len() != before;
        }
        if found {
            Ok(())
        } else {
            Err(BrokerError::NoConsumer(tag.to_string()))
        }
    }

    /// Drops every consumer the session registered on `channel`, or on any
    /// channel when `channel` is `None`.
    pub fn release_consumers(&mut self, session: SessionId, channel: Option<u16>) {
        for queue in self.queues.values_mut() {
            queue.consumers.retain(|c| {
                c.session != session || channel.is_some_and(|ch| ch != c.channel)
            });
        }
    }

    /// Puts a message back at the head of its queue without dispatching.
    pub fn requeue_front(&mut self, queue: &str, mut message: StoredMessage, redelivered: bool) {
        if let Some(q) = self.queues.get_mut(queue) {
            message.redelivered |= redelivered;
            q.messages.push_front(message);
        }
    }

    /// Hands queued messages to consumers until one side runs out.
    pub fn dispatch(&mut self, name: &str) {
        let Some(queue) = self.queues.get_mut(name) else {
            return;
        };
        while !queue.consumers.is_empty() {
            let Some(message) = queue.messages.pop_front() else {
                break;
            };
            let idx = queue.cursor % queue.consumers.len();
            let consumer = &queue.consumers[idx];
            let dispatch = Dispatch {
                channel: consumer.channel,
                consumer_tag: consumer.tag.clone(),
                queue: name.to_string(),
                message,
            };
            match consumer.outlet.send(dispatch) {
                Ok(()) => queue.cursor = idx + 1,
                Err(lost) => {
                    // session went away without cleaning up
                    queue.consumers.remove(idx);
                    queue.messages.push_front(lost.0.message);
                }
            }
        }
    }

    pub fn queue_depth(&self, name: &str) -> Option<usize> {
        self.queues.get(name).map(|q| q.messages.len())
    }

    pub fn consumer_count(&self, name: &str) -> Option<usize> {
        self.queues.get(name).map(|q| q.consumers.len())
    }
}
