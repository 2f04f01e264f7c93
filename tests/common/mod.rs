//! A broker stand-in that answers exactly what each test scripts, so protocol
//! order and timing can be asserted frame by frame.

#![allow(dead_code)]

use bytes::BytesMut;
use probelink::{ConnectionParams, LinkConfig};
use probelink_protocol::{
    ConnectionOpen, ConnectionOpenOk, ConsumerTag, Frame, Method, QueueDeclareOk,
    DEFAULT_MAX_FRAME_SIZE,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const CHANNEL: u16 = 1;
pub const CONSUMER_TAG: &str = "ctag-test";
const WAIT: Duration = Duration::from_secs(5);

pub fn test_config(port: u16) -> LinkConfig {
    LinkConfig {
        connection: ConnectionParams {
            user: "guest".into(),
            password: "Z3Vlc3Q=".into(),
            server: "127.0.0.1".into(),
            port,
            connection_attempts: 1,
            heartbeat_interval: 0,
        },
        reconnect_delay_ms: 50,
        publish_interval_ms: 5,
        publish_batch: 16,
        queue_capacity: 64,
        close_timeout_ms: 500,
        attempt_delay_ms: 10,
    }
}

/// Polls `check` until it holds or five seconds pass.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub struct ScriptedBroker {
    listener: TcpListener,
    pub port: u16,
}

impl ScriptedBroker {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        ScriptedBroker { listener, port }
    }

    pub async fn accept(&self) -> Session {
        let (stream, _) = tokio::time::timeout(WAIT, self.listener.accept())
            .await
            .expect("client connected in time")
            .unwrap();
        Session {
            stream,
            buf: BytesMut::new(),
        }
    }
}

pub struct Session {
    stream: TcpStream,
    buf: BytesMut,
}

impl Session {
    /// Next method, or `None` once the client closed the socket.
    pub async fn recv_or_eof(&mut self) -> Option<Method> {
        loop {
            if let Some(frame) = Frame::decode(&mut self.buf, DEFAULT_MAX_FRAME_SIZE).unwrap() {
                match Method::from_frame(frame).unwrap() {
                    Some(method) => return Some(method),
                    None => continue,
                }
            }
            let n = tokio::time::timeout(WAIT, self.stream.read_buf(&mut self.buf))
                .await
                .expect("client sent something in time")
                .unwrap_or(0);
            if n == 0 {
                return None;
            }
        }
    }

    pub async fn recv(&mut self) -> Method {
        self.recv_or_eof()
            .await
            .expect("client closed the connection unexpectedly")
    }

    pub async fn send(&mut self, channel: u16, method: Method) {
        let mut out = BytesMut::new();
        method.to_frame(channel).encode(&mut out);
        self.stream.write_all(&out).await.unwrap();
    }

    pub async fn handshake(&mut self) -> ConnectionOpen {
        match self.recv().await {
            Method::ConnectionOpen(open) => {
                self.send(0, Method::ConnectionOpenOk(ConnectionOpenOk { heartbeat: 0 }))
                    .await;
                open
            }
            other => panic!("expected ConnectionOpen, got {:?}", other),
        }
    }

    /// Answers every setup step up to and including activation.
    /// Returns the client's requests in the order they arrived.
    pub async fn negotiate(&mut self) -> Vec<Method> {
        let mut seen = Vec::new();
        loop {
            let request = self.recv().await;
            let (reply, done) = match &request {
                Method::ChannelOpen => (Method::ChannelOpenOk, false),
                Method::ExchangeDeclare(_) => (Method::ExchangeDeclareOk, false),
                Method::QueueDeclare(d) => (
                    Method::QueueDeclareOk(QueueDeclareOk {
                        queue: d.queue.clone(),
                        message_count: 0,
                    }),
                    false,
                ),
                Method::QueueBind(_) => (Method::QueueBindOk, false),
                Method::ConfirmSelect => (Method::ConfirmSelectOk, true),
                Method::BasicConsume(_) => (Method::BasicConsumeOk(ConsumerTag::new(CONSUMER_TAG)), true),
                other => panic!("unexpected during negotiation: {:?}", other),
            };
            seen.push(request);
            self.send(CHANNEL, reply).await;
            if done {
                return seen;
            }
        }
    }

    /// Plays along with a graceful close until the client hangs up.
    /// Returns the close-related requests seen.
    pub async fn answer_close(mut self) -> Vec<Method> {
        let mut seen = Vec::new();
        while let Some(method) = self.recv_or_eof().await {
            let reply = match &method {
                Method::BasicCancel(tag) => Some((CHANNEL, Method::BasicCancelOk(tag.clone()))),
                Method::ChannelClose(_) => Some((CHANNEL, Method::ChannelCloseOk)),
                Method::ConnectionClose(_) => Some((0, Method::ConnectionCloseOk)),
                _ => None,
            };
            if let Some((channel, reply)) = reply {
                seen.push(method);
                let mut out = BytesMut::new();
                reply.to_frame(channel).encode(&mut out);
                // the client may hang up right after the last reply
                let _ = self.stream.write_all(&out).await;
            }
        }
        seen
    }
}
