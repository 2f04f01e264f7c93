use bytes::{BufMut, Bytes, BytesMut};
use crate::errors::DeserializeError;
use crate::utils::{get_str, get_u16, put_str};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOpen {
    pub user: String,
    pub password: String,
    pub vhost: String,
    pub heartbeat: u16, // seconds, 0 = disabled
}

impl ConnectionOpen {
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_str(&mut buf, &self.user);
        put_str(&mut buf, &self.password);
        put_str(&mut buf, &self.vhost);
        buf.put_u16(self.heartbeat);
        buf.freeze()
    }

    pub fn deserialize(mut buf: Bytes) -> Result<Self, DeserializeError> {
        let user = get_str(&mut buf, "connection user")?;
        let password = get_str(&mut buf, "connection password")?;
        let vhost = get_str(&mut buf, "connection vhost")?;
        let heartbeat = get_u16(&mut buf, "connection heartbeat")?;
        Ok(ConnectionOpen {
            user,
            password,
            vhost,
            heartbeat,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOpenOk {
    /// Heartbeat interval the broker agreed to, in seconds.
    pub heartbeat: u16,
}

impl ConnectionOpenOk {
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2);
        buf.put_u16(self.heartbeat);
        buf.freeze()
    }

    pub fn deserialize(mut buf: Bytes) -> Result<Self, DeserializeError> {
        let heartbeat = get_u16(&mut buf, "negotiated heartbeat")?;
        Ok(ConnectionOpenOk { heartbeat })
    }
}

/// Reason attached to a connection or channel close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub reply_code: u16,
    pub reply_text: String,
}

impl CloseReason {
    pub fn new(reply_code: u16, reply_text: impl Into<String>) -> Self {
        Self {
            reply_code,
            reply_text: reply_text.into(),
        }
    }

    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u16(self.reply_code);
        put_str(&mut buf, &self.reply_text);
        buf.freeze()
    }

    pub fn deserialize(mut buf: Bytes) -> Result<Self, DeserializeError> {
        let reply_code = get_u16(&mut buf, "reply code")?;
        let reply_text = get_str(&mut buf, "reply text")?;
        Ok(CloseReason {
            reply_code,
            reply_text,
        })
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}) {}", self.reply_code, self.reply_text)
    }
}
