use bytes::{BufMut, Bytes, BytesMut};
use crate::errors::DeserializeError;
use crate::utils::{get_str, get_u32, put_str};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclare {
    pub queue: String,
}

impl QueueDeclare {
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_str(&mut buf, &self.queue);
        buf.freeze()
    }

    pub fn deserialize(mut buf: Bytes) -> Result<Self, DeserializeError> {
        let queue = get_str(&mut buf, "queue name")?;
        Ok(QueueDeclare { queue })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclareOk {
    pub queue: String,
    pub message_count: u32,
}

impl QueueDeclareOk {
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_str(&mut buf, &self.queue);
        buf.put_u32(self.message_count);
        buf.freeze()
    }

    pub fn deserialize(mut buf: Bytes) -> Result<Self, DeserializeError> {
        let queue = get_str(&mut buf, "queue name")?;
        let message_count = get_u32(&mut buf, "queue message count")?;
        Ok(QueueDeclareOk {
            queue,
            message_count,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBind {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

impl QueueBind {
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_str(&mut buf, &self.queue);
        put_str(&mut buf, &self.exchange);
        put_str(&mut buf, &self.routing_key);
        buf.freeze()
    }

    pub fn deserialize(mut buf: Bytes) -> Result<Self, DeserializeError> {
        let queue = get_str(&mut buf, "bind queue")?;
        let exchange = get_str(&mut buf, "bind exchange")?;
        let routing_key = get_str(&mut buf, "bind routing key")?;
        Ok(QueueBind {
            queue,
            exchange,
            routing_key,
        })
    }
}
