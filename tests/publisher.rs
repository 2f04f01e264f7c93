mod common;

use common::*;
use probelink::{LinkState, Publisher, Topology};
use probelink_protocol::reply_code::PRECONDITION_FAILED;
use probelink_protocol::{
    Acknowledgement, CloseReason, ExchangeDeclare, ExchangeKind, Method, QueueBind, QueueDeclare,
};
use serde_json::{json, Value};
use std::time::Duration;

fn publisher(port: u16) -> Publisher {
    Publisher::setup(
        test_config(port),
        Topology::for_publisher("TEST", "app1").unwrap(),
    )
    .unwrap()
}

async fn recv_published(session: &mut Session, n: usize) -> Vec<Value> {
    let mut bodies = Vec::new();
    for _ in 0..n {
        match session.recv().await {
            Method::BasicPublish(p) => {
                assert_eq!(p.exchange, "TEST");
                assert_eq!(p.routing_key, "TEST.app1");
                assert_eq!(p.properties.app_id.as_deref(), Some("TEST-publisher"));
                assert_eq!(p.properties.content_type.as_deref(), Some("application/json"));
                bodies.push(serde_json::from_slice(&p.body).unwrap());
            }
            other => panic!("expected a publish, got {:?}", other),
        }
    }
    bodies
}

/// ✅ Verifies messages queued before the link is up drain in order, and out-of-order acks settle the ledger
#[tokio::test]
async fn queued_messages_drain_in_order_after_connect() {
    let broker = ScriptedBroker::bind().await;
    let publisher = publisher(broker.port);
    let producer = publisher.producer();

    for n in 1..=3 {
        producer.publish(&json!({ "n": n })).await.unwrap();
    }
    assert_eq!(producer.queued(), 3);

    let handle = publisher.start();
    let mut session = broker.accept().await;
    let open = session.handshake().await;
    assert_eq!(open.user, "guest");
    assert_eq!(open.password, "guest");
    assert_eq!(open.vhost, "/");

    let setup = session.negotiate().await;
    assert_eq!(
        setup,
        vec![
            Method::ChannelOpen,
            Method::ExchangeDeclare(ExchangeDeclare {
                exchange: "TEST".into(),
                kind: ExchangeKind::Topic,
            }),
            Method::QueueDeclare(QueueDeclare {
                queue: "TEST.app1".into(),
            }),
            Method::QueueBind(QueueBind {
                queue: "TEST.app1".into(),
                exchange: "TEST".into(),
                routing_key: "TEST.app1".into(),
            }),
            Method::ConfirmSelect,
        ]
    );

    let bodies = recv_published(&mut session, 3).await;
    assert_eq!(bodies, vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]);
    assert_eq!(handle.ledger().pending_sequences(), vec![1, 2, 3]);
    assert_eq!(producer.queued(), 0);

    for tag in [2, 1, 3] {
        session
            .send(CHANNEL, Method::BasicAck(Acknowledgement::single(tag)))
            .await;
    }
    eventually("all confirmations", || handle.ledger().pending_count() == 0).await;

    let snap = handle.ledger().snapshot();
    assert_eq!((snap.pending, snap.acked, snap.nacked), (0, 3, 0));
    assert_eq!(snap.next_sequence, 4);

    let closer = tokio::spawn(session.answer_close());
    handle.stop().await;
    let closing = closer.await.unwrap();
    assert!(matches!(closing[0], Method::ChannelClose(_)));
    assert!(matches!(closing[1], Method::ConnectionClose(_)));
    assert_eq!(handle.status().state, LinkState::Closed);

    // second stop is a no-op
    handle.stop().await;
}

/// ✅ Verifies nacks are counted and multiple-acks settle a prefix
#[tokio::test]
async fn nacks_and_multiple_acks_resolve_the_ledger() {
    let broker = ScriptedBroker::bind().await;
    let publisher = publisher(broker.port);
    let producer = publisher.producer();
    let handle = publisher.start();

    let mut session = broker.accept().await;
    session.handshake().await;
    session.negotiate().await;
    handle.wait_ready().await;

    for n in 0..4 {
        producer.publish(&json!({ "n": n })).await.unwrap();
    }
    recv_published(&mut session, 4).await;

    session
        .send(CHANNEL, Method::BasicNack(Acknowledgement::single(2)))
        .await;
    session
        .send(
            CHANNEL,
            Method::BasicAck(Acknowledgement {
                delivery_tag: 3,
                multiple: true,
            }),
        )
        .await;
    eventually("prefix settled", || handle.ledger().pending_sequences() == vec![4]).await;

    let snap = handle.ledger().snapshot();
    assert_eq!(snap.acked, 2);
    assert_eq!(snap.nacked, 1);
    // ledger soundness: every dequeued message is accounted for
    assert_eq!(snap.pending as u64 + snap.acked + snap.nacked, 4);

    // give the pump a few ticks; a rejected message must not go out again
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.stopper().stop();
    match session.recv().await {
        Method::ChannelClose(_) => session.send(CHANNEL, Method::ChannelCloseOk).await,
        other => panic!("expected the close sequence, got {:?}", other),
    }
    let closer = tokio::spawn(session.answer_close());
    handle.stop().await;
    let closing = closer.await.unwrap();
    assert!(matches!(closing[..], [Method::ConnectionClose(_)]));
    assert_eq!(handle.ledger().nack_count(), 1);
}

/// ✅ Verifies a lost connection restarts numbering at 1 and re-declares topology before publishing
#[tokio::test]
async fn reconnect_redeclares_and_restarts_sequence() {
    let broker = ScriptedBroker::bind().await;
    let publisher = publisher(broker.port);
    let producer = publisher.producer();
    let handle = publisher.start();

    let mut first = broker.accept().await;
    first.handshake().await;
    first.negotiate().await;
    handle.wait_ready().await;

    producer.publish(&json!("a")).await.unwrap();
    producer.publish(&json!("b")).await.unwrap();
    recv_published(&mut first, 2).await;
    assert_eq!(handle.ledger().pending_sequences(), vec![1, 2]);
    assert_eq!(handle.status().generation, 1);

    drop(first);

    let mut second = broker.accept().await;
    second.handshake().await;
    let setup = second.negotiate().await;
    assert_eq!(setup.len(), 5);
    assert!(matches!(setup[1], Method::ExchangeDeclare(_)));
    handle
        .wait_for(|s| s.generation == 2 && s.state.is_ready())
        .await;

    let snap = handle.ledger().snapshot();
    assert_eq!(snap.generation, 2);
    assert_eq!(snap.next_sequence, 1);
    assert_eq!(snap.pending, 0);

    producer.publish(&json!("c")).await.unwrap();
    let bodies = recv_published(&mut second, 1).await;
    assert_eq!(bodies, vec![json!("c")]);
    assert_eq!(handle.ledger().pending_sequences(), vec![1]);

    let closer = tokio::spawn(second.answer_close());
    handle.stop().await;
    closer.await.unwrap();
}

/// ✅ Verifies a broker channel close tears down the connection and the next one negotiates again
#[tokio::test]
async fn channel_close_cascades_into_reconnect() {
    let broker = ScriptedBroker::bind().await;
    let handle = publisher(broker.port).start();

    let mut first = broker.accept().await;
    first.handshake().await;
    assert_eq!(first.recv().await, Method::ChannelOpen);
    first.send(CHANNEL, Method::ChannelOpenOk).await;
    assert!(matches!(first.recv().await, Method::ExchangeDeclare(_)));
    first
        .send(
            CHANNEL,
            Method::ChannelClose(CloseReason::new(
                PRECONDITION_FAILED,
                "PRECONDITION_FAILED - inequivalent arg 'type'",
            )),
        )
        .await;

    assert_eq!(first.recv().await, Method::ChannelCloseOk);
    assert!(matches!(first.recv().await, Method::ConnectionClose(_)));
    first.send(0, Method::ConnectionCloseOk).await;
    assert_eq!(first.recv_or_eof().await, None);

    let mut second = broker.accept().await;
    second.handshake().await;
    second.negotiate().await;
    let status = handle.wait_ready().await;
    assert_eq!(status.generation, 2);

    let closer = tokio::spawn(second.answer_close());
    handle.stop().await;
    closer.await.unwrap();
}

/// ✅ Verifies a reply that does not match the current negotiation step abandons the connection
#[tokio::test]
async fn out_of_order_reply_abandons_connection() {
    let broker = ScriptedBroker::bind().await;
    let handle = publisher(broker.port).start();

    let mut first = broker.accept().await;
    first.handshake().await;
    assert_eq!(first.recv().await, Method::ChannelOpen);
    first.send(CHANNEL, Method::QueueBindOk).await;
    assert!(matches!(first.recv().await, Method::ConnectionClose(_)));
    first.send(0, Method::ConnectionCloseOk).await;

    let mut second = broker.accept().await;
    second.handshake().await;
    second.negotiate().await;
    assert_eq!(handle.wait_ready().await.generation, 2);

    let closer = tokio::spawn(second.answer_close());
    handle.stop().await;
    closer.await.unwrap();
}
