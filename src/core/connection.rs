use crate::config::LinkConfig;
use crate::core::constants::CHANNEL;
use crate::core::endpoint::Endpoint;
use crate::core::error::EngineError;
use crate::core::state::{Action, ChannelPhase, Event, Lifecycle, LinkState};
use probelink_client::{BrokerLink, Incoming, LinkError, LinkTarget};
use probelink_protocol::reply_code::REPLY_SUCCESS;
use probelink_protocol::{CloseReason, Method};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// What observers see of a running link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: LinkState,
    pub generation: u64,
}

impl Default for LinkStatus {
    fn default() -> Self {
        LinkStatus {
            state: LinkState::Disconnected,
            generation: 0,
        }
    }
}

enum Wake {
    Stop,
    Frame(Result<Incoming, LinkError>),
    Heartbeat,
    Pump,
}

pub(crate) async fn stop_signalled(shutdown: &mut watch::Receiver<bool>) {
    // a dropped sender counts as a stop
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn tick_opt(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn ticker(period: Duration) -> Interval {
    let mut t = interval_at(Instant::now() + period, period);
    t.set_missed_tick_behavior(MissedTickBehavior::Delay);
    t
}

/// Reads until `done` matches. Answers broker-initiated closes along the way.
async fn await_reply(link: &mut BrokerLink, done: fn(&Method) -> bool) -> Result<(), LinkError> {
    loop {
        let (channel, method) = match link.recv().await? {
            Incoming::Heartbeat => continue,
            Incoming::Method { channel, method } => (channel, method),
        };
        if done(&method) {
            return Ok(());
        }
        match method {
            Method::ConnectionClose(reason) => {
                debug!(%reason, "broker closed the connection during close");
                link.send(0, &Method::ConnectionCloseOk).await?;
                return Ok(());
            }
            Method::ChannelClose(reason) => {
                debug!(%reason, "broker closed the channel during close");
                link.send(channel, &Method::ChannelCloseOk).await?;
                if done(&Method::ChannelCloseOk) {
                    return Ok(());
                }
            }
            other => debug!(op = ?other.op_code(), "ignored while closing"),
        }
    }
}

async fn close_connection(link: &mut BrokerLink, reason: CloseReason) -> Result<(), LinkError> {
    link.send(0, &Method::ConnectionClose(reason)).await?;
    await_reply(link, |m| matches!(m, Method::ConnectionCloseOk)).await
}

async fn close_gracefully(
    link: &mut BrokerLink,
    cancel: Option<Method>,
    channel_open: bool,
) -> Result<(), LinkError> {
    if let Some(cancel) = cancel {
        link.send(CHANNEL, &cancel).await?;
        await_reply(link, |m| matches!(m, Method::BasicCancelOk(_))).await?;
    }
    if channel_open {
        let reason = CloseReason::new(REPLY_SUCCESS, "Normal shutdown");
        link.send(CHANNEL, &Method::ChannelClose(reason)).await?;
        await_reply(link, |m| matches!(m, Method::ChannelCloseOk)).await?;
    }
    close_connection(link, CloseReason::new(REPLY_SUCCESS, "Normal shutdown")).await
}

/// Drives one endpoint through connect, negotiate, flow and recovery until stopped.
pub struct ConnectionManager<E: Endpoint> {
    target: LinkTarget,
    display_url: String,
    lifecycle: Lifecycle,
    endpoint: E,
    link: Option<BrokerLink>,
    heartbeat: Option<Interval>,
    pump: Interval,
    close_timeout: Duration,
    shutdown: watch::Receiver<bool>,
    status: watch::Sender<LinkStatus>,
}

impl<E: Endpoint> ConnectionManager<E> {
    pub fn new(
        target: LinkTarget,
        display_url: String,
        endpoint: E,
        config: &LinkConfig,
        shutdown: watch::Receiver<bool>,
        status: watch::Sender<LinkStatus>,
    ) -> Self {
        let lifecycle = Lifecycle::new(endpoint.topology().binding_count(), config.reconnect_delay());
        ConnectionManager {
            target,
            display_url,
            lifecycle,
            endpoint,
            link: None,
            heartbeat: None,
            pump: ticker(config.publish_interval()),
            close_timeout: config.close_timeout(),
            shutdown,
            status,
        }
    }

    pub async fn run(mut self) {
        let role = self.endpoint.role();
        info!(%role, url = %self.display_url, exchange = %self.endpoint.topology().exchange(), "link starting");

        let mut action = self.step(Event::Start);
        loop {
            let event = match action {
                Action::Finish => break,
                Action::None => self.next_event().await,
                other => match self.execute(other).await {
                    Some(event) => event,
                    None => self.next_event().await,
                },
            };
            action = self.step(event);
        }
        info!(%role, "link closed");
    }

    fn step(&mut self, event: Event) -> Action {
        let action = self.lifecycle.apply(event);
        self.status.send_replace(LinkStatus {
            state: self.lifecycle.state(),
            generation: self.lifecycle.generation(),
        });
        action
    }

    async fn execute(&mut self, action: Action) -> Option<Event> {
        match action {
            Action::Connect => Some(self.connect().await),
            Action::OpenChannel { generation } => {
                self.endpoint.begin_generation(generation);
                self.send(Method::ChannelOpen).await
            }
            Action::DeclareExchange => {
                let method = self.endpoint.topology().declare_exchange();
                self.send(method).await
            }
            Action::DeclareQueue => {
                let method = self.endpoint.topology().declare_queue();
                self.send(method).await
            }
            Action::Bind(index) => match self.endpoint.topology().bind(index) {
                Some(method) => self.send(method).await,
                None => Some(Event::ChannelClosed),
            },
            Action::Activate => {
                let method = self.endpoint.activation();
                self.send(method).await
            }
            Action::BeginFlow { generation } => {
                info!(role = %self.endpoint.role(), generation, queue = %self.endpoint.topology().queue(), "link ready");
                self.pump.reset();
                None
            }
            Action::Backoff(delay) => Some(self.backoff(delay).await),
            Action::AbandonConnection => {
                warn!("channel abandoned, closing connection");
                if let Some(mut link) = self.link.take() {
                    let reason = CloseReason::new(REPLY_SUCCESS, "channel abandoned");
                    match tokio::time::timeout(self.close_timeout, close_connection(&mut link, reason)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => debug!(error = %e, "connection close failed"),
                        Err(_) => debug!("connection close timed out"),
                    }
                    link.shutdown().await;
                }
                Some(Event::TransportLost)
            }
            Action::CloseGracefully {
                channel_open,
                consuming,
            } => {
                self.heartbeat = None;
                let Some(mut link) = self.link.take() else {
                    return Some(Event::CloseCompleted);
                };
                let cancel = if consuming {
                    self.endpoint.deactivation()
                } else {
                    None
                };
                match tokio::time::timeout(
                    self.close_timeout,
                    close_gracefully(&mut link, cancel, channel_open),
                )
                .await
                {
                    Ok(Ok(())) => debug!("graceful close completed"),
                    Ok(Err(e)) => warn!(error = %e, "graceful close interrupted"),
                    Err(_) => warn!(timeout = ?self.close_timeout, "graceful close timed out"),
                }
                link.shutdown().await;
                Some(Event::CloseCompleted)
            }
            Action::Finish | Action::None => None,
        }
    }

    async fn connect(&mut self) -> Event {
        debug!(url = %self.display_url, "connecting");
        tokio::select! {
            biased;
            _ = stop_signalled(&mut self.shutdown) => Event::StopRequested,
            result = BrokerLink::connect(&self.target) => match result {
                Ok(link) => {
                    info!(url = %self.display_url, heartbeat = ?link.heartbeat(), "connection opened");
                    self.heartbeat = link.heartbeat().map(|period| ticker(period / 2));
                    self.link = Some(link);
                    Event::TransportOpened
                }
                Err(e) => {
                    warn!(url = %self.display_url, error = %e, "connection failed");
                    Event::TransportLost
                }
            }
        }
    }

    async fn backoff(&mut self, delay: Duration) -> Event {
        self.heartbeat = None;
        if let Some(link) = self.link.take() {
            link.shutdown().await;
        }
        warn!(?delay, "connection lost, reconnecting after delay");
        tokio::select! {
            biased;
            _ = stop_signalled(&mut self.shutdown) => Event::StopRequested,
            _ = tokio::time::sleep(delay) => Event::BackoffElapsed,
        }
    }

    async fn send(&mut self, method: Method) -> Option<Event> {
        let Some(link) = self.link.as_mut() else {
            return Some(Event::TransportLost);
        };
        debug!(op = ?method.op_code(), "sending");
        match link.send(CHANNEL, &method).await {
            Ok(()) => None,
            Err(e) => {
                warn!(error = %e, "send failed");
                Some(Event::TransportLost)
            }
        }
    }

    async fn next_event(&mut self) -> Event {
        loop {
            let pumping = self.lifecycle.is_ready() && self.endpoint.pumps();
            let Some(link) = self.link.as_mut() else {
                stop_signalled(&mut self.shutdown).await;
                return Event::StopRequested;
            };

            let wake = tokio::select! {
                biased;
                _ = stop_signalled(&mut self.shutdown) => Wake::Stop,
                incoming = link.recv() => Wake::Frame(incoming),
                _ = tick_opt(&mut self.heartbeat) => Wake::Heartbeat,
                _ = self.pump.tick(), if pumping => Wake::Pump,
            };

            if let Some(event) = self.handle_wake(wake).await {
                return event;
            }
        }
    }

    async fn handle_wake(&mut self, wake: Wake) -> Option<Event> {
        match wake {
            Wake::Stop => Some(Event::StopRequested),
            Wake::Frame(Err(LinkError::Closed)) => {
                warn!("broker closed the socket");
                Some(Event::TransportLost)
            }
            Wake::Frame(Err(e)) => {
                warn!(error = %e, "link read failed");
                Some(Event::TransportLost)
            }
            Wake::Frame(Ok(Incoming::Heartbeat)) => None,
            Wake::Frame(Ok(Incoming::Method { channel, method })) => {
                self.dispatch(channel, method).await
            }
            Wake::Heartbeat => {
                let link = self.link.as_mut()?;
                if let Some(period) = link.heartbeat() {
                    if link.idle_for() > period * 2 {
                        warn!(idle = ?link.idle_for(), "broker missed heartbeats");
                        return Some(Event::TransportLost);
                    }
                }
                match link.send_heartbeat().await {
                    Ok(()) => None,
                    Err(e) => {
                        warn!(error = %e, "heartbeat send failed");
                        Some(Event::TransportLost)
                    }
                }
            }
            Wake::Pump => {
                let link = self.link.as_mut()?;
                match self.endpoint.pump(link).await {
                    Ok(_) => None,
                    Err(e) => Self::flow_error(e),
                }
            }
        }
    }

    async fn dispatch(&mut self, channel: u16, method: Method) -> Option<Event> {
        match method {
            Method::ConnectionClose(reason) => {
                warn!(%reason, "broker closed the connection");
                if let Some(link) = self.link.as_mut() {
                    let _ = link.send(0, &Method::ConnectionCloseOk).await;
                }
                Some(Event::TransportLost)
            }
            Method::ChannelClose(reason) => {
                warn!(%reason, channel, "broker closed the channel");
                if let Some(link) = self.link.as_mut() {
                    if let Err(e) = link.send(channel, &Method::ChannelCloseOk).await {
                        debug!(error = %e, "channel close-ok not sent");
                    }
                }
                Some(Event::ChannelClosed)
            }
            Method::ChannelOpenOk => Some(Event::ChannelOpened),
            Method::ExchangeDeclareOk => Some(Event::ExchangeDeclared),
            Method::QueueDeclareOk(ok) => {
                debug!(queue = %ok.queue, messages = ok.message_count, "queue declared");
                Some(Event::QueueDeclared)
            }
            Method::QueueBindOk => Some(Event::QueueBound),
            Method::BasicCancel(tag) => {
                warn!(consumer_tag = %tag.consumer_tag, "broker cancelled the consumer");
                Some(Event::ChannelClosed)
            }
            method
                if self.lifecycle.state() == LinkState::Connected(ChannelPhase::Activating)
                    && self.endpoint.on_activated(&method) =>
            {
                Some(Event::Activated)
            }
            method if self.lifecycle.is_ready() => {
                let link = self.link.as_mut()?;
                match self.endpoint.on_method(method, link).await {
                    Ok(()) => None,
                    Err(e) => Self::flow_error(e),
                }
            }
            method => {
                warn!(op = ?method.op_code(), state = ?self.lifecycle.state(), "unexpected method");
                Some(Event::ChannelClosed)
            }
        }
    }

    fn flow_error(e: EngineError) -> Option<Event> {
        match e {
            EngineError::Link(e) => {
                warn!(error = %e, "link failed while moving messages");
                Some(Event::TransportLost)
            }
            other => {
                warn!(error = %other, "message flow error");
                None
            }
        }
    }
}
