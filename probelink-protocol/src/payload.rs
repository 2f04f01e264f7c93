use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::errors::{DeserializeError, ProtocolError};
use crate::op_code::OpCode;

#[derive(Debug)]
pub struct MethodPayload {
    pub op_code: OpCode,
    pub data: Bytes,
}

impl MethodPayload {
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.data.len());
        buf.put_u8(self.op_code as u8);
        buf.extend_from_slice(&self.data);
        buf.freeze()
    }

    pub fn deserialize(mut buf: Bytes) -> Result<Self, ProtocolError> {
        if buf.remaining() < 1 {
            return Err(DeserializeError::UnexpectedEOF("method op-code").into());
        }

        let op_code = OpCode::try_from(buf.get_u8())?;
        let data = buf; // Remaining bytes are the method arguments

        Ok(MethodPayload { op_code, data })
    }
}
