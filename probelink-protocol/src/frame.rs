/*
[ version: u8 ]
[ frame_type: u8 ]
[ channel: u16 ]
[ payload_len: u32 ]
[ checksum : u32 ]
[ payload bytes... ]
*/

use bytes::{Buf, BufMut, Bytes, BytesMut};
use xxhash_rust::xxh32::xxh32;
use crate::ProtocolError;

pub const PROTOCOL_VERSION: u8 = 1;
pub const FRAME_HEADER_LEN: usize = 12;
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FrameType {
    Method = 1,
    Heartbeat = 2,
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(FrameType::Method),
            2 => Ok(FrameType::Heartbeat),
            _ => Err(ProtocolError::UnknownFrameType(value)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub version: u8,
    pub frame_type: FrameType,
    pub channel: u16, // 0 = connection-level traffic
    pub payload: Bytes,
}

impl Frame {
    pub fn method(channel: u16, payload: Bytes) -> Frame {
        Frame {
            version: PROTOCOL_VERSION,
            frame_type: FrameType::Method,
            channel,
            payload,
        }
    }

    pub fn heartbeat() -> Frame {
        Frame {
            version: PROTOCOL_VERSION,
            frame_type: FrameType::Heartbeat,
            channel: 0,
            payload: Bytes::new(),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(FRAME_HEADER_LEN + self.payload.len());
        buf.put_u8(self.version);
        buf.put_u8(self.frame_type as u8);
        buf.put_u16(self.channel);
        buf.put_u32(self.payload.len() as u32);
        buf.put_u32(xxh32(&self.payload, 0));
        buf.extend_from_slice(&self.payload);
    }

    /// Pulls one complete frame off the front of `buf`.
    ///
    /// Returns `Ok(None)` while the buffer holds less than a full frame; the
    /// bytes are left in place so the caller can read more and retry.
    pub fn decode(buf: &mut BytesMut, max_frame_size: usize) -> Result<Option<Frame>, ProtocolError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let mut cursor = &buf[..];

        let version = cursor.get_u8();
        let frame_type_raw = cursor.get_u8();
        let channel = cursor.get_u16();
        let payload_len = cursor.get_u32() as usize;
        let checksum_expected = cursor.get_u32();

        if payload_len > max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                limit: max_frame_size,
            });
        }

        if cursor.remaining() < payload_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_LEN);
        let payload = buf.split_to(payload_len).freeze();
        let checksum_actual = xxh32(&payload, 0);

        if checksum_actual != checksum_expected {
            return Err(ProtocolError::ChecksumMismatch {
                expected: checksum_expected,
                found: checksum_actual,
            });
        }

        Ok(Some(Frame {
            version,
            frame_type: FrameType::try_from(frame_type_raw)?,
            channel,
            payload,
        }))
    }
}
