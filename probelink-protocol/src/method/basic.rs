/*
properties: [ app_id ][ content_type ][ header_count: u32 ]{ [ key ][ value ] }
publish: [ exchange ][ routing_key ][ properties ][ body ]
deliver: [ consumer_tag ][ delivery_tag: u64 ][ redelivered: u8 ][ exchange ][ routing_key ][ properties ][ body ]
ack / nack: [ delivery_tag: u64 ][ multiple: u8 ]
*/

use bytes::{BufMut, Bytes, BytesMut};
use crate::errors::DeserializeError;
use crate::utils::{ensure, get_bool, get_bytes, get_opt_str, get_str, get_u32, get_u64, put_bytes, put_opt_str, put_str};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicProperties {
    pub app_id: Option<String>,
    pub content_type: Option<String>,
    /// Application headers, in the order the publisher set them.
    pub headers: Vec<(String, String)>,
}

impl BasicProperties {
    fn write(&self, buf: &mut BytesMut) {
        put_opt_str(buf, self.app_id.as_deref());
        put_opt_str(buf, self.content_type.as_deref());
        buf.put_u32(self.headers.len() as u32);
        for (key, value) in &self.headers {
            put_str(buf, key);
            put_str(buf, value);
        }
    }

    fn read(buf: &mut Bytes) -> Result<Self, DeserializeError> {
        let app_id = get_opt_str(buf, "app id")?;
        let content_type = get_opt_str(buf, "content type")?;
        let count = get_u32(buf, "header count")?;
        // each header needs at least two length prefixes
        ensure(buf, (count as usize).saturating_mul(8), "headers")?;
        let mut headers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let key = get_str(buf, "header key")?;
            let value = get_str(buf, "header value")?;
            headers.push((key, value));
        }
        Ok(BasicProperties {
            app_id,
            content_type,
            headers,
        })
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicPublish {
    pub exchange: String,
    pub routing_key: String,
    pub properties: BasicProperties,
    pub body: Bytes,
}

impl BasicPublish {
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.body.len() + 64);
        put_str(&mut buf, &self.exchange);
        put_str(&mut buf, &self.routing_key);
        self.properties.write(&mut buf);
        put_bytes(&mut buf, &self.body);
        buf.freeze()
    }

    pub fn deserialize(mut buf: Bytes) -> Result<Self, DeserializeError> {
        let exchange = get_str(&mut buf, "publish exchange")?;
        let routing_key = get_str(&mut buf, "publish routing key")?;
        let properties = BasicProperties::read(&mut buf)?;
        let body = get_bytes(&mut buf, "publish body")?;
        Ok(BasicPublish {
            exchange,
            routing_key,
            properties,
            body,
        })
    }
}

/// Body of both `BasicAck` and `BasicNack`, in either direction: broker
/// confirmations of publishes and consumer acknowledgments of deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgement {
    pub delivery_tag: u64,
    /// When set, covers every outstanding tag up to and including `delivery_tag`.
    pub multiple: bool,
}

impl Acknowledgement {
    pub fn single(delivery_tag: u64) -> Self {
        Self {
            delivery_tag,
            multiple: false,
        }
    }

    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(9);
        buf.put_u64(self.delivery_tag);
        buf.put_u8(self.multiple as u8);
        buf.freeze()
    }

    pub fn deserialize(mut buf: Bytes) -> Result<Self, DeserializeError> {
        let delivery_tag = get_u64(&mut buf, "delivery tag")?;
        let multiple = get_bool(&mut buf, "multiple flag")?;
        Ok(Acknowledgement {
            delivery_tag,
            multiple,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicConsume {
    pub queue: String,
    /// Empty asks the broker to generate a tag.
    pub consumer_tag: String,
}

impl BasicConsume {
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_str(&mut buf, &self.queue);
        put_str(&mut buf, &self.consumer_tag);
        buf.freeze()
    }

    pub fn deserialize(mut buf: Bytes) -> Result<Self, DeserializeError> {
        let queue = get_str(&mut buf, "consume queue")?;
        let consumer_tag = get_str(&mut buf, "consumer tag")?;
        Ok(BasicConsume {
            queue,
            consumer_tag,
        })
    }
}

/// Carried by `BasicConsumeOk`, `BasicCancel` and `BasicCancelOk`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerTag {
    pub consumer_tag: String,
}

impl ConsumerTag {
    pub fn new(consumer_tag: impl Into<String>) -> Self {
        Self {
            consumer_tag: consumer_tag.into(),
        }
    }

    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_str(&mut buf, &self.consumer_tag);
        buf.freeze()
    }

    pub fn deserialize(mut buf: Bytes) -> Result<Self, DeserializeError> {
        let consumer_tag = get_str(&mut buf, "consumer tag")?;
        Ok(ConsumerTag { consumer_tag })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicDeliver {
    pub consumer_tag: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub properties: BasicProperties,
    pub body: Bytes,
}

impl BasicDeliver {
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.body.len() + 64);
        put_str(&mut buf, &self.consumer_tag);
        buf.put_u64(self.delivery_tag);
        buf.put_u8(self.redelivered as u8);
        put_str(&mut buf, &self.exchange);
        put_str(&mut buf, &self.routing_key);
        self.properties.write(&mut buf);
        put_bytes(&mut buf, &self.body);
        buf.freeze()
    }

    pub fn deserialize(mut buf: Bytes) -> Result<Self, DeserializeError> {
        let consumer_tag = get_str(&mut buf, "consumer tag")?;
        let delivery_tag = get_u64(&mut buf, "delivery tag")?;
        let redelivered = get_bool(&mut buf, "redelivered flag")?;
        let exchange = get_str(&mut buf, "deliver exchange")?;
        let routing_key = get_str(&mut buf, "deliver routing key")?;
        let properties = BasicProperties::read(&mut buf)?;
        let body = get_bytes(&mut buf, "deliver body")?;
        Ok(BasicDeliver {
            consumer_tag,
            delivery_tag,
            redelivered,
            exchange,
            routing_key,
            properties,
            body,
        })
    }
}
