mod basic;
mod connection;
mod exchange;
mod queue;

pub use basic::{Acknowledgement, BasicConsume, BasicDeliver, BasicProperties, BasicPublish, ConsumerTag};
pub use connection::{CloseReason, ConnectionOpen, ConnectionOpenOk};
pub use exchange::{ExchangeDeclare, ExchangeKind};
pub use queue::{QueueBind, QueueDeclare, QueueDeclareOk};

use bytes::Bytes;
use crate::errors::ProtocolError;
use crate::frame::{Frame, FrameType};
use crate::op_code::OpCode;
use crate::payload::MethodPayload;

/// Every method the client and broker exchange, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    ConnectionOpen(ConnectionOpen),
    ConnectionOpenOk(ConnectionOpenOk),
    ConnectionClose(CloseReason),
    ConnectionCloseOk,
    ChannelOpen,
    ChannelOpenOk,
    ChannelClose(CloseReason),
    ChannelCloseOk,
    ExchangeDeclare(ExchangeDeclare),
    ExchangeDeclareOk,
    QueueDeclare(QueueDeclare),
    QueueDeclareOk(QueueDeclareOk),
    QueueBind(QueueBind),
    QueueBindOk,
    ConfirmSelect,
    ConfirmSelectOk,
    BasicPublish(BasicPublish),
    BasicAck(Acknowledgement),
    BasicNack(Acknowledgement),
    BasicConsume(BasicConsume),
    BasicConsumeOk(ConsumerTag),
    BasicDeliver(BasicDeliver),
    BasicCancel(ConsumerTag),
    BasicCancelOk(ConsumerTag),
}

impl Method {
    pub fn op_code(&self) -> OpCode {
        match self {
            Method::ConnectionOpen(_) => OpCode::ConnectionOpen,
            Method::ConnectionOpenOk(_) => OpCode::ConnectionOpenOk,
            Method::ConnectionClose(_) => OpCode::ConnectionClose,
            Method::ConnectionCloseOk => OpCode::ConnectionCloseOk,
            Method::ChannelOpen => OpCode::ChannelOpen,
            Method::ChannelOpenOk => OpCode::ChannelOpenOk,
            Method::ChannelClose(_) => OpCode::ChannelClose,
            Method::ChannelCloseOk => OpCode::ChannelCloseOk,
            Method::ExchangeDeclare(_) => OpCode::ExchangeDeclare,
            Method::ExchangeDeclareOk => OpCode::ExchangeDeclareOk,
            Method::QueueDeclare(_) => OpCode::QueueDeclare,
            Method::QueueDeclareOk(_) => OpCode::QueueDeclareOk,
            Method::QueueBind(_) => OpCode::QueueBind,
            Method::QueueBindOk => OpCode::QueueBindOk,
            Method::ConfirmSelect => OpCode::ConfirmSelect,
            Method::ConfirmSelectOk => OpCode::ConfirmSelectOk,
            Method::BasicPublish(_) => OpCode::BasicPublish,
            Method::BasicAck(_) => OpCode::BasicAck,
            Method::BasicNack(_) => OpCode::BasicNack,
            Method::BasicConsume(_) => OpCode::BasicConsume,
            Method::BasicConsumeOk(_) => OpCode::BasicConsumeOk,
            Method::BasicDeliver(_) => OpCode::BasicDeliver,
            Method::BasicCancel(_) => OpCode::BasicCancel,
            Method::BasicCancelOk(_) => OpCode::BasicCancelOk,
        }
    }

    pub fn to_payload(&self) -> MethodPayload {
        let data = match self {
            Method::ConnectionOpen(m) => m.serialize(),
            Method::ConnectionOpenOk(m) => m.serialize(),
            Method::ConnectionClose(m) | Method::ChannelClose(m) => m.serialize(),
            Method::ExchangeDeclare(m) => m.serialize(),
            Method::QueueDeclare(m) => m.serialize(),
            Method::QueueDeclareOk(m) => m.serialize(),
            Method::QueueBind(m) => m.serialize(),
            Method::BasicPublish(m) => m.serialize(),
            Method::BasicAck(m) | Method::BasicNack(m) => m.serialize(),
            Method::BasicConsume(m) => m.serialize(),
            Method::BasicConsumeOk(m) | Method::BasicCancel(m) | Method::BasicCancelOk(m) => {
                m.serialize()
            }
            Method::BasicDeliver(m) => m.serialize(),
            Method::ConnectionCloseOk
            | Method::ChannelOpen
            | Method::ChannelOpenOk
            | Method::ChannelCloseOk
            | Method::ExchangeDeclareOk
            | Method::QueueBindOk
            | Method::ConfirmSelect
            | Method::ConfirmSelectOk => Bytes::new(),
        };
        MethodPayload {
            op_code: self.op_code(),
            data,
        }
    }

    pub fn from_payload(payload: MethodPayload) -> Result<Method, ProtocolError> {
        let data = payload.data;
        let method = match payload.op_code {
            OpCode::ConnectionOpen => Method::ConnectionOpen(ConnectionOpen::deserialize(data)?),
            OpCode::ConnectionOpenOk => Method::ConnectionOpenOk(ConnectionOpenOk::deserialize(data)?),
            OpCode::ConnectionClose => Method::ConnectionClose(CloseReason::deserialize(data)?),
            OpCode::ConnectionCloseOk => Method::ConnectionCloseOk,
            OpCode::ChannelOpen => Method::ChannelOpen,
            OpCode::ChannelOpenOk => Method::ChannelOpenOk,
            OpCode::ChannelClose => Method::ChannelClose(CloseReason::deserialize(data)?),
            OpCode::ChannelCloseOk => Method::ChannelCloseOk,
            OpCode::ExchangeDeclare => Method::ExchangeDeclare(ExchangeDeclare::deserialize(data)?),
            OpCode::ExchangeDeclareOk => Method::ExchangeDeclareOk,
            OpCode::QueueDeclare => Method::QueueDeclare(QueueDeclare::deserialize(data)?),
            OpCode::QueueDeclareOk => Method::QueueDeclareOk(QueueDeclareOk::deserialize(data)?),
            OpCode::QueueBind => Method::QueueBind(QueueBind::deserialize(data)?),
            OpCode::QueueBindOk => Method::QueueBindOk,
            OpCode::ConfirmSelect => Method::ConfirmSelect,
            OpCode::ConfirmSelectOk => Method::ConfirmSelectOk,
            OpCode::BasicPublish => Method::BasicPublish(BasicPublish::deserialize(data)?),
            OpCode::BasicAck => Method::BasicAck(Acknowledgement::deserialize(data)?),
            OpCode::BasicNack => Method::BasicNack(Acknowledgement::deserialize(data)?),
            OpCode::BasicConsume => Method::BasicConsume(BasicConsume::deserialize(data)?),
            OpCode::BasicConsumeOk => Method::BasicConsumeOk(ConsumerTag::deserialize(data)?),
            OpCode::BasicDeliver => Method::BasicDeliver(BasicDeliver::deserialize(data)?),
            OpCode::BasicCancel => Method::BasicCancel(ConsumerTag::deserialize(data)?),
            OpCode::BasicCancelOk => Method::BasicCancelOk(ConsumerTag::deserialize(data)?),
        };
        Ok(method)
    }

    pub fn to_frame(&self, channel: u16) -> Frame {
        Frame::method(channel, self.to_payload().serialize())
    }

    /// Decodes a method frame. Heartbeat frames carry no method and yield `None`.
    pub fn from_frame(frame: Frame) -> Result<Option<Method>, ProtocolError> {
        if frame.frame_type == FrameType::Heartbeat {
            return Ok(None);
        }
        let payload = MethodPayload::deserialize(frame.payload)?;
        Method::from_payload(payload).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use crate::frame::DEFAULT_MAX_FRAME_SIZE;

    fn through_the_wire(method: Method, channel: u16) -> (u16, Method) {
        let mut buf = BytesMut::new();
        method.to_frame(channel).encode(&mut buf);
        let frame = Frame::decode(&mut buf, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .expect("full frame");
        let channel = frame.channel;
        (channel, Method::from_frame(frame).unwrap().expect("method frame"))
    }

    #[test]
    fn publish_keeps_body_and_properties() {
        let publish = Method::BasicPublish(BasicPublish {
            exchange: "TEST".into(),
            routing_key: "TEST.app1".into(),
            properties: BasicProperties {
                app_id: Some("TEST-publisher".into()),
                content_type: Some("application/json".into()),
                headers: vec![("info".into(), "Testing !!!".into())],
            },
            body: Bytes::from_static(br#"{"info":"Testing !!!"}"#),
        });

        let (channel, decoded) = through_the_wire(publish.clone(), 1);
        assert_eq!(channel, 1);
        assert_eq!(decoded, publish);
    }

    #[test]
    fn absent_properties_stay_absent() {
        let deliver = Method::BasicDeliver(BasicDeliver {
            consumer_tag: "ctag-1".into(),
            delivery_tag: 7,
            redelivered: true,
            exchange: "TEST".into(),
            routing_key: "TEST.app1".into(),
            properties: BasicProperties::default(),
            body: Bytes::new(),
        });

        let (_, decoded) = through_the_wire(deliver, 1);
        match decoded {
            Method::BasicDeliver(d) => {
                assert_eq!(d.properties.app_id, None);
                assert_eq!(d.properties.content_type, None);
                assert!(d.properties.headers.is_empty());
                assert!(d.redelivered);
                assert_eq!(d.delivery_tag, 7);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn ack_and_nack_share_a_body_but_not_an_opcode() {
        let ack = Method::BasicAck(Acknowledgement { delivery_tag: 5, multiple: true });
        let nack = Method::BasicNack(Acknowledgement::single(5));
        assert_ne!(ack.op_code(), nack.op_code());

        let (_, decoded) = through_the_wire(nack, 1);
        assert_eq!(decoded, Method::BasicNack(Acknowledgement { delivery_tag: 5, multiple: false }));
    }

    #[test]
    fn truncated_arguments_are_reported() {
        let payload = MethodPayload {
            op_code: OpCode::QueueBind,
            data: Bytes::from_static(&[0, 0, 0, 9, b'q']),
        };
        let err = Method::from_payload(payload).unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadError(_)));
    }

    #[test]
    fn unknown_exchange_kind_is_rejected() {
        let mut data = BytesMut::new();
        crate::utils::put_str(&mut data, "TEST");
        data.extend_from_slice(&[9]);
        let payload = MethodPayload {
            op_code: OpCode::ExchangeDeclare,
            data: data.freeze(),
        };
        let err = Method::from_payload(payload).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownExchangeKind(9)));
    }

    #[test]
    fn heartbeat_frame_has_no_method() {
        assert!(Method::from_frame(Frame::heartbeat()).unwrap().is_none());
    }
}
