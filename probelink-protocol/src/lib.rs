pub mod errors;
pub mod frame;
pub mod method;
pub mod payload;
pub mod reply_code;
mod op_code;
mod utils;

// Public re-exports for easy access
pub use errors::{DeserializeError, ProtocolError};
pub use frame::{Frame, FrameType, DEFAULT_MAX_FRAME_SIZE, PROTOCOL_VERSION};
pub use payload::MethodPayload;
pub use op_code::OpCode;

// Re-export the method bodies
pub use method::{
    Acknowledgement, BasicConsume, BasicDeliver, BasicProperties, BasicPublish, CloseReason,
    ConnectionOpen, ConnectionOpenOk, ConsumerTag, ExchangeDeclare, ExchangeKind, Method,
    QueueBind, QueueDeclare, QueueDeclareOk,
};
