use bytes::{BufMut, Bytes, BytesMut};
use crate::errors::ProtocolError;
use crate::utils::{get_str, get_u8, put_str};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    Direct = 1,
    Topic = 2,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Topic => "topic",
        }
    }
}

impl TryFrom<u8> for ExchangeKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ExchangeKind::Direct),
            2 => Ok(ExchangeKind::Topic),
            _ => Err(ProtocolError::UnknownExchangeKind(value)),
        }
    }
}

impl std::fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDeclare {
    pub exchange: String,
    pub kind: ExchangeKind,
}

impl ExchangeDeclare {
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_str(&mut buf, &self.exchange);
        buf.put_u8(self.kind as u8);
        buf.freeze()
    }

    pub fn deserialize(mut buf: Bytes) -> Result<Self, ProtocolError> {
        let exchange = get_str(&mut buf, "exchange name")?;
        let kind = ExchangeKind::try_from(get_u8(&mut buf, "exchange kind")?)?;
        Ok(ExchangeDeclare { exchange, kind })
    }
}
