use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unknown opcode: {0}")]
    UnknownOpCode(u8),

    #[error("Unknown frame type: {0}")]
    UnknownFrameType(u8),

    #[error("Unknown exchange kind: {0}")]
    UnknownExchangeKind(u8),

    #[error("Frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Checksum Mismatch expected: {expected} found: {found} ")]
    ChecksumMismatch { expected: u32, found: u32 },

    #[error("Payload decode error: {0}")]
    PayloadError(#[from] DeserializeError),
}

#[derive(Debug, Error)]
pub enum DeserializeError {
    #[error("Unexpected end of input while reading {0}")]
    UnexpectedEOF(&'static str),

    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
}
