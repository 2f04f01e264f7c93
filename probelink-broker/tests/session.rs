mod common;

use bytes::Bytes;
use common::*;
use probelink_client::LinkError;
use probelink_protocol::reply_code::{ACCESS_REFUSED, NOT_FOUND, PRECONDITION_FAILED};
use probelink_protocol::{
    Acknowledgement, BasicConsume, BasicProperties, BasicPublish, ExchangeDeclare, ExchangeKind,
    Method, QueueBind, QueueDeclare,
};

async fn declare(link: &mut probelink_client::BrokerLink, exchange: &str, queue: &str, pattern: &str) {
    let reply = call(
        link,
        Method::ExchangeDeclare(ExchangeDeclare {
            exchange: exchange.into(),
            kind: ExchangeKind::Topic,
        }),
    )
    .await;
    assert_eq!(reply, Method::ExchangeDeclareOk);

    let reply = call(link, Method::QueueDeclare(QueueDeclare { queue: queue.into() })).await;
    assert!(matches!(reply, Method::QueueDeclareOk(_)));

    let reply = call(
        link,
        Method::QueueBind(QueueBind {
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: pattern.into(),
        }),
    )
    .await;
    assert_eq!(reply, Method::QueueBindOk);
}

fn publish(exchange: &str, key: &str, body: &'static str) -> Method {
    Method::BasicPublish(BasicPublish {
        exchange: exchange.into(),
        routing_key: key.into(),
        properties: BasicProperties {
            app_id: Some("TEST-publisher".into()),
            content_type: Some("application/json".into()),
            headers: Vec::new(),
        },
        body: Bytes::from_static(body.as_bytes()),
    })
}

/// ✅ Verifies wrong credentials are refused during the handshake
#[tokio::test]
async fn wrong_password_is_refused() {
    let addr = start_broker().await;
    let mut target = target(addr);
    target.password = "wrong".into();

    match probelink_client::BrokerLink::connect(&target).await {
        Err(LinkError::Refused(reason)) => assert_eq!(reason.reply_code, ACCESS_REFUSED),
        other => panic!("expected refusal, got {:?}", other),
    }
}

/// ✅ Verifies confirm mode acks each publish with the channel's publish count
#[tokio::test]
async fn confirm_mode_acks_in_publish_order() {
    let addr = start_broker().await;
    let mut link = connect(addr).await;
    declare(&mut link, "TEST", "TEST.app1", "TEST.app1").await;
    assert_eq!(call(&mut link, Method::ConfirmSelect).await, Method::ConfirmSelectOk);

    for expected in 1..=3u64 {
        let reply = call(&mut link, publish("TEST", "TEST.app1", "{}")).await;
        assert_eq!(reply, Method::BasicAck(Acknowledgement::single(expected)));
    }
}

/// ✅ Verifies a topic consumer receives matching messages and unacked ones are redelivered
#[tokio::test]
async fn unacked_delivery_is_redelivered_to_next_consumer() {
    let addr = start_broker().await;

    let mut publisher = connect(addr).await;
    declare(&mut publisher, "TEST", "TEST.*", "TEST.*").await;

    let mut first = connect(addr).await;
    let reply = call(
        &mut first,
        Method::BasicConsume(BasicConsume {
            queue: "TEST.*".into(),
            consumer_tag: String::new(),
        }),
    )
    .await;
    assert!(matches!(reply, Method::BasicConsumeOk(_)));

    publisher
        .send(CHANNEL, &publish("TEST", "TEST.app1", r#"{"info":"Testing !!!"}"#))
        .await
        .unwrap();
    publisher
        .send(CHANNEL, &publish("TEST", "OTHER.app1", "{}"))
        .await
        .unwrap();

    match next_method(&mut first).await {
        Method::BasicDeliver(d) => {
            assert_eq!(d.delivery_tag, 1);
            assert_eq!(d.routing_key, "TEST.app1");
            assert!(!d.redelivered);
            assert_eq!(d.properties.app_id.as_deref(), Some("TEST-publisher"));
        }
        other => panic!("expected delivery, got {:?}", other),
    }

    // drop without acking
    first.shutdown().await;

    let mut second = connect(addr).await;
    let reply = call(
        &mut second,
        Method::BasicConsume(BasicConsume {
            queue: "TEST.*".into(),
            consumer_tag: "second".into(),
        }),
    )
    .await;
    assert!(matches!(reply, Method::BasicConsumeOk(ref t) if t.consumer_tag == "second"));

    match next_method(&mut second).await {
        Method::BasicDeliver(d) => {
            assert!(d.redelivered);
            assert_eq!(d.body, Bytes::from_static(br#"{"info":"Testing !!!"}"#));
            second
                .send(CHANNEL, &Method::BasicAck(Acknowledgement::single(d.delivery_tag)))
                .await
                .unwrap();
        }
        other => panic!("expected redelivery, got {:?}", other),
    }
}

/// ✅ Verifies redeclaring an exchange with another kind closes the channel with 406
#[tokio::test]
async fn incompatible_redeclare_closes_channel() {
    let addr = start_broker().await;
    let mut link = connect(addr).await;
    declare(&mut link, "TEST", "TEST.app1", "TEST.app1").await;

    let reply = call(
        &mut link,
        Method::ExchangeDeclare(ExchangeDeclare {
            exchange: "TEST".into(),
            kind: ExchangeKind::Direct,
        }),
    )
    .await;
    match reply {
        Method::ChannelClose(reason) => assert_eq!(reason.reply_code, PRECONDITION_FAILED),
        other => panic!("expected channel close, got {:?}", other),
    }
    link.send(CHANNEL, &Method::ChannelCloseOk).await.unwrap();

    // the connection survives and a fresh channel works
    assert_eq!(call(&mut link, Method::ChannelOpen).await, Method::ChannelOpenOk);
}

/// ✅ Verifies publishing to an unknown exchange closes the channel with 404
#[tokio::test]
async fn publish_to_missing_exchange_is_not_found() {
    let addr = start_broker().await;
    let mut link = connect(addr).await;

    match call(&mut link, publish("NOPE", "NOPE.x", "{}")).await {
        Method::ChannelClose(reason) => assert_eq!(reason.reply_code, NOT_FOUND),
        other => panic!("expected channel close, got {:?}", other),
    }
}

/// ✅ Verifies a graceful close is answered
#[tokio::test]
async fn connection_close_is_acknowledged() {
    let addr = start_broker().await;
    let mut link = connect(addr).await;

    let reply = call(
        &mut link,
        Method::ConnectionClose(probelink_protocol::CloseReason::new(200, "Normal shutdown")),
    )
    .await;
    assert_eq!(reply, Method::ConnectionCloseOk);
}
