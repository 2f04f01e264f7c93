use probelink_protocol::{CloseReason, OpCode, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Failed to connect to {addr} after {attempts} attempt(s): {source}")]
    Connect {
        addr: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Broker refused the connection: {0}")]
    Refused(CloseReason),

    #[error("Unexpected {0:?} during handshake")]
    UnexpectedHandshake(OpCode),

    #[error("Connection closed by peer")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
