use crate::error::LinkError;
use bytes::BytesMut;
use probelink_protocol::{ConnectionOpen, Frame, FrameType, Method, DEFAULT_MAX_FRAME_SIZE};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Where and how to reach a broker. Built from a parsed broker URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    /// TCP connect attempts per `connect` call before giving up.
    pub connection_attempts: u32,
    /// Requested heartbeat interval in seconds, 0 disables heartbeats.
    pub heartbeat: u16,
    pub attempt_delay: Duration,
    pub handshake_timeout: Duration,
    pub max_frame_size: usize,
}

impl LinkTarget {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// What a single `recv` produced.
#[derive(Debug)]
pub enum Incoming {
    Heartbeat,
    Method { channel: u16, method: Method },
}

/// One framed transport connection to the broker, after a successful
/// `ConnectionOpen` / `ConnectionOpenOk` exchange.
pub struct BrokerLink {
    stream: TcpStream,
    read_buf: BytesMut,
    max_frame_size: usize,
    heartbeat: Option<Duration>,
    last_seen: Instant,
}

impl BrokerLink {
    pub async fn connect(target: &LinkTarget) -> Result<Self, LinkError> {
        let stream = Self::dial(target).await?;
        let mut link = BrokerLink {
            stream,
            read_buf: BytesMut::with_capacity(4096),
            max_frame_size: target.max_frame_size,
            heartbeat: None,
            last_seen: Instant::now(),
        };

        match tokio::time::timeout(target.handshake_timeout, link.handshake(target)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(LinkError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "broker did not answer ConnectionOpen",
                )))
            }
        }
        Ok(link)
    }

    async fn dial(target: &LinkTarget) -> Result<TcpStream, LinkError> {
        let addr = target.addr();
        let attempts = target.connection_attempts.max(1);
        let mut attempt = 1;
        loop {
            match TcpStream::connect(&addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!(%addr, attempt, "tcp connection established");
                    return Ok(stream);
                }
                Err(source) if attempt >= attempts => {
                    return Err(LinkError::Connect {
                        addr,
                        attempts,
                        source,
                    });
                }
                Err(e) => {
                    warn!(%addr, attempt, attempts, error = %e, "connect attempt failed");
                    attempt += 1;
                    tokio::time::sleep(target.attempt_delay).await;
                }
            }
        }
    }

    async fn handshake(&mut self, target: &LinkTarget) -> Result<(), LinkError> {
        let open = Method::ConnectionOpen(ConnectionOpen {
            user: target.user.clone(),
            password: target.password.clone(),
            vhost: target.vhost.clone(),
            heartbeat: target.heartbeat,
        });
        self.send(0, &open).await?;

        loop {
            match self.recv().await? {
                Incoming::Heartbeat => continue,
                Incoming::Method {
                    method: Method::ConnectionOpenOk(ok),
                    ..
                } => {
                    if ok.heartbeat > 0 {
                        self.heartbeat = Some(Duration::from_secs(u64::from(ok.heartbeat)));
                    }
                    return Ok(());
                }
                Incoming::Method {
                    method: Method::ConnectionClose(reason),
                    ..
                } => {
                    let _ = self.send(0, &Method::ConnectionCloseOk).await;
                    return Err(LinkError::Refused(reason));
                }
                Incoming::Method { method, .. } => {
                    return Err(LinkError::UnexpectedHandshake(method.op_code()))
                }
            }
        }
    }

    pub async fn send(&mut self, channel: u16, method: &Method) -> Result<(), LinkError> {
        let mut buf = BytesMut::new();
        method.to_frame(channel).encode(&mut buf);
        self.stream.write_all(&buf).await?;
        Ok(())
    }

    pub async fn send_heartbeat(&mut self) -> Result<(), LinkError> {
        let mut buf = BytesMut::new();
        Frame::heartbeat().encode(&mut buf);
        self.stream.write_all(&buf).await?;
        Ok(())
    }

    /// Waits for the next frame. Cancel-safe: partially read bytes stay buffered.
    pub async fn recv(&mut self) -> Result<Incoming, LinkError> {
        loop {
            if let Some(frame) = Frame::decode(&mut self.read_buf, self.max_frame_size)? {
                self.last_seen = Instant::now();
                if frame.frame_type == FrameType::Heartbeat {
                    return Ok(Incoming::Heartbeat);
                }
                let channel = frame.channel;
                return match Method::from_frame(frame)? {
                    Some(method) => Ok(Incoming::Method { channel, method }),
                    None => Ok(Incoming::Heartbeat),
                };
            }

            self.read_buf.reserve(4096);
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(LinkError::Closed);
            }
        }
    }

    /// Heartbeat interval agreed with the broker, if any.
    pub fn heartbeat(&self) -> Option<Duration> {
        self.heartbeat
    }

    /// Time since the last frame of any kind arrived.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }

    pub async fn shutdown(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!(error = %e, "socket shutdown failed");
        }
    }
}

impl Default for LinkTarget {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            user: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            connection_attempts: 1,
            heartbeat: 0,
            attempt_delay: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(10),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl std::fmt::Debug for BrokerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerLink")
            .field("peer", &self.stream.peer_addr().ok())
            .field("heartbeat", &self.heartbeat)
            .finish()
    }
}
