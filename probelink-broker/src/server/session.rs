use crate::config::BrokerConfig;
use crate::core::broker::{Consumer, Dispatch, SessionId, StoredMessage};
use crate::core::error::BrokerError;
use crate::types::SharedBroker;
use anyhow::Result;
use bytes::BytesMut;
use probelink_protocol::reply_code::{ACCESS_REFUSED, COMMAND_INVALID, FRAME_ERROR};
use probelink_protocol::{
    Acknowledgement, BasicDeliver, BasicPublish, CloseReason, ConnectionOpen, ConnectionOpenOk,
    ConsumerTag, Frame, Method, QueueDeclareOk,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval_at, Instant, Interval};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct ChannelState {
    /// Publish counter once confirm mode is on.
    confirm_seq: Option<u64>,
    /// Broker sent ChannelClose and waits for ChannelCloseOk.
    closing: bool,
}

#[derive(Debug)]
struct Unacked {
    channel: u16,
    queue: String,
    message: StoredMessage,
}

enum Flow {
    Continue,
    Close,
}

async fn tick_opt(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// One client connection.
pub(crate) struct Session {
    id: SessionId,
    stream: TcpStream,
    read_buf: BytesMut,
    broker: SharedBroker,
    config: Arc<BrokerConfig>,
    outlet_tx: UnboundedSender<Dispatch>,
    outlet_rx: UnboundedReceiver<Dispatch>,
    opened: bool,
    channels: HashMap<u16, ChannelState>,
    next_delivery_tag: u64,
    unacked: BTreeMap<u64, Unacked>,
    heartbeat: Option<Interval>,
}

impl Session {
    pub(crate) fn new(id: SessionId, stream: TcpStream, broker: SharedBroker, config: Arc<BrokerConfig>) -> Self {
        let (outlet_tx, outlet_rx) = mpsc::unbounded_channel();
        Session {
            id,
            stream,
            read_buf: BytesMut::with_capacity(4096),
            broker,
            config,
            outlet_tx,
            outlet_rx,
            opened: false,
            channels: HashMap::new(),
            next_delivery_tag: 0,
            unacked: BTreeMap::new(),
            heartbeat: None,
        }
    }

    pub(crate) async fn run(mut self) -> Result<()> {
        let result = self.serve().await;
        self.teardown().await;
        debug!(session = self.id, "session closed");
        result
    }

    async fn serve(&mut self) -> Result<()> {
        loop {
            loop {
                let frame = match Frame::decode(&mut self.read_buf, self.config.max_frame_size) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        let _ = self.connection_error(FRAME_ERROR, e.to_string()).await;
                        return Err(e.into());
                    }
                };
                let channel = frame.channel;
                let Some(method) = Method::from_frame(frame)? else {
                    continue;
                };
                if let Flow::Close = self.handle(channel, method).await? {
                    return Ok(());
                }
            }

            tokio::select! {
                read = self.stream.read_buf(&mut self.read_buf) => {
                    if read? == 0 {
                        return Ok(());
                    }
                }
                Some(dispatch) = self.outlet_rx.recv() => self.deliver(dispatch).await?,
                _ = tick_opt(&mut self.heartbeat) => self.write_frame(Frame::heartbeat()).await?,
            }
        }
    }

    async fn write_frame(&mut self, frame: Frame) -> Result<()> {
        let mut out = BytesMut::new();
        frame.encode(&mut out);
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn write(&mut self, channel: u16, method: Method) -> Result<Flow> {
        self.write_frame(method.to_frame(channel)).await?;
        Ok(Flow::Continue)
    }

    async fn connection_error(&mut self, code: u16, text: impl Into<String>) -> Result<Flow> {
        let reason = CloseReason::new(code, text);
        warn!(session = self.id, %reason, "closing connection");
        self.write(0, Method::ConnectionClose(reason)).await?;
        Ok(Flow::Close)
    }

    async fn channel_error(&mut self, channel: u16, err: BrokerError) -> Result<Flow> {
        warn!(session = self.id, channel, error = %err, "closing channel");
        self.release_channel(channel).await;
        self.channels.entry(channel).or_default().closing = true;
        self.write(channel, Method::ChannelClose(CloseReason::new(err.reply_code(), err.to_string())))
            .await
    }

    async fn handle(&mut self, channel: u16, method: Method) -> Result<Flow> {
        if !self.opened {
            return match method {
                Method::ConnectionOpen(open) => self.open(open).await,
                other => {
                    self.connection_error(
                        COMMAND_INVALID,
                        format!("expected ConnectionOpen, got {:?}", other.op_code()),
                    )
                    .await
                }
            };
        }

        match method {
            Method::ConnectionClose(reason) => {
                debug!(session = self.id, %reason, "client closing connection");
                self.write(0, Method::ConnectionCloseOk).await?;
                Ok(Flow::Close)
            }
            Method::ConnectionCloseOk => Ok(Flow::Close),
            Method::ChannelOpen => {
                self.channels.insert(channel, ChannelState::default());
                self.write(channel, Method::ChannelOpenOk).await
            }
            Method::ChannelClose(reason) => {
                debug!(session = self.id, channel, %reason, "client closing channel");
                self.release_channel(channel).await;
                self.channels.remove(&channel);
                self.write(channel, Method::ChannelCloseOk).await
            }
            Method::ChannelCloseOk => {
                self.channels.remove(&channel);
                Ok(Flow::Continue)
            }
            other => match self.channels.get(&channel).map(|state| state.closing) {
                None => {
                    self.connection_error(
                        COMMAND_INVALID,
                        format!("{:?} on unopened channel {}", other.op_code(), channel),
                    )
                    .await
                }
                Some(true) => {
                    debug!(session = self.id, channel, op = ?other.op_code(), "dropped on closing channel");
                    Ok(Flow::Continue)
                }
                Some(false) => self.channel_method(channel, other).await,
            },
        }
    }

    async fn open(&mut self, open: ConnectionOpen) -> Result<Flow> {
        if open.user != self.config.user || open.password != self.config.password {
            warn!(session = self.id, user = %open.user, "login refused");
            return self
                .connection_error(ACCESS_REFUSED, "ACCESS_REFUSED - login refused")
                .await;
        }

        let heartbeat = self.config.negotiate_heartbeat(open.heartbeat);
        if heartbeat > 0 {
            let period = Duration::from_secs(u64::from(heartbeat)) / 2;
            self.heartbeat = Some(interval_at(Instant::now() + period, period));
        }
        self.opened = true;
        info!(session = self.id, user = %open.user, vhost = %open.vhost, heartbeat, "connection opened");
        self.write(0, Method::ConnectionOpenOk(ConnectionOpenOk { heartbeat }))
            .await
    }

    async fn channel_method(&mut self, channel: u16, method: Method) -> Result<Flow> {
        let outcome = match method {
            Method::ExchangeDeclare(d) => self
                .broker
                .lock()
                .await
                .declare_exchange(&d.exchange, d.kind)
                .map(|_| Method::ExchangeDeclareOk),
            Method::QueueDeclare(d) => {
                let declared = self.broker.lock().await.declare_queue(&d.queue);
                declared.map(|message_count| {
                    Method::QueueDeclareOk(QueueDeclareOk {
                        queue: d.queue,
                        message_count,
                    })
                })
            }
            Method::QueueBind(b) => self
                .broker
                .lock()
                .await
                .bind(&b.queue, &b.exchange, &b.routing_key)
                .map(|_| Method::QueueBindOk),
            Method::ConfirmSelect => {
                self.channels.entry(channel).or_default().confirm_seq.get_or_insert(0);
                Ok(Method::ConfirmSelectOk)
            }
            Method::BasicPublish(publish) => return self.publish(channel, publish).await,
            Method::BasicConsume(c) => {
                let mut broker = self.broker.lock().await;
                let tag = if c.consumer_tag.is_empty() {
                    broker.next_consumer_tag(self.id)
                } else {
                    c.consumer_tag
                };
                let consumer = Consumer {
                    session: self.id,
                    channel,
                    tag: tag.clone(),
                    outlet: self.outlet_tx.clone(),
                };
                broker
                    .consume(&c.queue, consumer)
                    .map(|_| Method::BasicConsumeOk(ConsumerTag::new(tag)))
            }
            Method::BasicCancel(tag) => {
                let cancelled = self.broker.lock().await.cancel(self.id, &tag.consumer_tag);
                cancelled.map(|_| Method::BasicCancelOk(tag))
            }
            Method::BasicAck(ack) => {
                self.settle(ack, false).await;
                return Ok(Flow::Continue);
            }
            Method::BasicNack(nack) => {
                self.settle(nack, true).await;
                return Ok(Flow::Continue);
            }
            other => {
                return self
                    .connection_error(
                        COMMAND_INVALID,
                        format!("{:?} is not accepted from clients", other.op_code()),
                    )
                    .await
            }
        };

        match outcome {
            Ok(reply) => self.write(channel, reply).await,
            Err(e) => self.channel_error(channel, e).await,
        }
    }

    async fn publish(&mut self, channel: u16, publish: BasicPublish) -> Result<Flow> {
        let routed = self.broker.lock().await.publish(
            &publish.exchange,
            &publish.routing_key,
            publish.properties,
            publish.body,
        );
        if let Err(e) = routed {
            return self.channel_error(channel, e).await;
        }

        let confirm = self
            .channels
            .get_mut(&channel)
            .and_then(|state| state.confirm_seq.as_mut())
            .map(|seq| {
                *seq += 1;
                *seq
            });
        match confirm {
            Some(seq) => {
                self.write(channel, Method::BasicAck(Acknowledgement::single(seq)))
                    .await
            }
            None => Ok(Flow::Continue),
        }
    }

    async fn deliver(&mut self, dispatch: Dispatch) -> Result<()> {
        let usable = self
            .channels
            .get(&dispatch.channel)
            .is_some_and(|state| !state.closing);
        if !usable {
            let mut broker = self.broker.lock().await;
            broker.requeue_front(&dispatch.queue, dispatch.message, false);
            broker.dispatch(&dispatch.queue);
            return Ok(());
        }

        self.next_delivery_tag += 1;
        let delivery_tag = self.next_delivery_tag;
        let message = dispatch.message;
        let deliver = BasicDeliver {
            consumer_tag: dispatch.consumer_tag,
            delivery_tag,
            redelivered: message.redelivered,
            exchange: message.exchange.clone(),
            routing_key: message.routing_key.clone(),
            properties: message.properties.clone(),
            body: message.body.clone(),
        };
        self.unacked.insert(
            delivery_tag,
            Unacked {
                channel: dispatch.channel,
                queue: dispatch.queue,
                message,
            },
        );
        self.write_frame(Method::BasicDeliver(deliver).to_frame(dispatch.channel))
            .await
    }

    /// Ack drops the messages, nack puts them back.
    async fn settle(&mut self, ack: Acknowledgement, requeue: bool) {
        let tags: Vec<u64> = if ack.multiple {
            self.unacked.range(..=ack.delivery_tag).map(|(tag, _)| *tag).collect()
        } else {
            vec![ack.delivery_tag]
        };

        let mut settled = Vec::with_capacity(tags.len());
        for tag in tags {
            match self.unacked.remove(&tag) {
                Some(entry) => settled.push(entry),
                None => debug!(session = self.id, delivery_tag = tag, "ack for unknown delivery"),
            }
        }
        if requeue && !settled.is_empty() {
            self.requeue(settled).await;
        }
    }

    async fn requeue(&mut self, entries: Vec<Unacked>) {
        let mut broker = self.broker.lock().await;
        let mut queues = Vec::new();
        for entry in entries.into_iter().rev() {
            if !queues.contains(&entry.queue) {
                queues.push(entry.queue.clone());
            }
            broker.requeue_front(&entry.queue, entry.message, true);
        }
        for queue in &queues {
            broker.dispatch(queue);
        }
    }

    /// Cancels the channel's consumers and gives its unacked deliveries back.
    async fn release_channel(&mut self, channel: u16) {
        self.broker
            .lock()
            .await
            .release_consumers(self.id, Some(channel));

        let tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| u.channel == channel)
            .map(|(tag, _)| *tag)
            .collect();
        let entries: Vec<Unacked> = tags
            .into_iter()
            .filter_map(|tag| self.unacked.remove(&tag))
            .collect();
        if !entries.is_empty() {
            self.requeue(entries).await;
        }
    }

    async fn teardown(&mut self) {
        let mut broker = self.broker.lock().await;
        broker.release_consumers(self.id, None);

        // dispatched to us but never written out; these go behind the unacked ones
        let mut pending = Vec::new();
        while let Ok(dispatch) = self.outlet_rx.try_recv() {
            pending.push(dispatch);
        }
        let unacked: Vec<Unacked> = std::mem::take(&mut self.unacked).into_values().collect();

        let mut queues: Vec<String> = Vec::new();
        for dispatch in pending.into_iter().rev() {
            if !queues.contains(&dispatch.queue) {
                queues.push(dispatch.queue.clone());
            }
            broker.requeue_front(&dispatch.queue, dispatch.message, false);
        }
        let returned = unacked.len();
        for entry in unacked.into_iter().rev() {
            if !queues.contains(&entry.queue) {
                queues.push(entry.queue.clone());
            }
            broker.requeue_front(&entry.queue, entry.message, true);
        }
        for queue in &queues {
            broker.dispatch(queue);
        }
        if returned > 0 {
            info!(session = self.id, requeued = returned, "unacked deliveries returned to their queues");
        }
    }
}
