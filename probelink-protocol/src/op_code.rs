use crate::ProtocolError;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum OpCode {
    ConnectionOpen = 1,
    ConnectionOpenOk = 2,
    ConnectionClose = 3,
    ConnectionCloseOk = 4,
    ChannelOpen = 10,
    ChannelOpenOk = 11,
    ChannelClose = 12,
    ChannelCloseOk = 13,
    ExchangeDeclare = 20,
    ExchangeDeclareOk = 21,
    QueueDeclare = 30,
    QueueDeclareOk = 31,
    QueueBind = 32,
    QueueBindOk = 33,
    ConfirmSelect = 40,
    ConfirmSelectOk = 41,
    BasicPublish = 50,
    BasicAck = 51,
    BasicNack = 52,
    BasicConsume = 53,
    BasicConsumeOk = 54,
    BasicDeliver = 55,
    BasicCancel = 56,
    BasicCancelOk = 57,
}

impl TryFrom<u8> for OpCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(OpCode::ConnectionOpen),
            2 => Ok(OpCode::ConnectionOpenOk),
            3 => Ok(OpCode::ConnectionClose),
            4 => Ok(OpCode::ConnectionCloseOk),
            10 => Ok(OpCode::ChannelOpen),
            11 => Ok(OpCode::ChannelOpenOk),
            12 => Ok(OpCode::ChannelClose),
            13 => Ok(OpCode::ChannelCloseOk),
            20 => Ok(OpCode::ExchangeDeclare),
            21 => Ok(OpCode::ExchangeDeclareOk),
            30 => Ok(OpCode::QueueDeclare),
            31 => Ok(OpCode::QueueDeclareOk),
            32 => Ok(OpCode::QueueBind),
            33 => Ok(OpCode::QueueBindOk),
            40 => Ok(OpCode::ConfirmSelect),
            41 => Ok(OpCode::ConfirmSelectOk),
            50 => Ok(OpCode::BasicPublish),
            51 => Ok(OpCode::BasicAck),
            52 => Ok(OpCode::BasicNack),
            53 => Ok(OpCode::BasicConsume),
            54 => Ok(OpCode::BasicConsumeOk),
            55 => Ok(OpCode::BasicDeliver),
            56 => Ok(OpCode::BasicCancel),
            57 => Ok(OpCode::BasicCancelOk),
            _ => Err(ProtocolError::UnknownOpCode(value)),
        }
    }
}
