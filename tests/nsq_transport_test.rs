mod common;

use common::{
    collecting_handler, gated_handler, init_tracing, ordered_handler, recv_within, wait_for, FaultyNsqClient,
    PublishFault,
};
use service_bus_transport::amqp::AmqpQueue;
use service_bus_transport::nsq::{
    InMemoryNsqBroker, NsqChannel, NsqClient, NsqConnectionConfiguration, NsqConsumerOptions, NsqTransport,
    NsqTransportLevelDestination,
};
use service_bus_transport::redis::RedisTransportLevelDestination;
use service_bus_transport::{
    ConnectionState, HeaderValue, Headers, OutboundPackage, Queue, Topic, Transport, TransportError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(2);

fn config() -> NsqConnectionConfiguration {
    NsqConnectionConfiguration::parse("tcp://localhost:4150?timeout=1").unwrap()
}

fn transport(broker: &InMemoryNsqBroker) -> NsqTransport {
    NsqTransport::new(Arc::new(broker.clone()), config())
}

fn package(topic: &str, payload: &str) -> OutboundPackage {
    OutboundPackage::new(payload, Headers::new(), NsqTransportLevelDestination::new(topic).unwrap())
}

fn queue(topic: &str) -> Queue {
    Queue::Nsq(NsqChannel::new(topic).unwrap())
}

/// Test publish then consume through the default NSQ channel
#[tokio::test]
async fn test_publish_and_consume() {
    init_tracing();

    let broker = InMemoryNsqBroker::new();
    let transport = transport(&broker);

    let (handler, mut received) = collecting_handler();
    transport.consume(handler, &[queue("orders")]).await.unwrap();
    assert_eq!(transport.state(), ConnectionState::Connected);

    let mut headers = Headers::new();
    headers.insert("key".to_string(), HeaderValue::from("value"));
    let outbound = OutboundPackage::new("p", headers, NsqTransportLevelDestination::new("orders").unwrap())
        .with_message_id("abc")
        .with_trace_id("trace-1");

    transport.send(vec![outbound]).await.unwrap();

    let incoming = recv_within(&mut received, RECEIVE_TIMEOUT).await.unwrap();
    assert_eq!(incoming.payload_str(), "p");
    assert_eq!(incoming.id(), "abc");
    assert_eq!(incoming.trace_id(), "trace-1");
    assert_eq!(incoming.headers().get("key"), Some(&HeaderValue::from("value")));
    assert_eq!(incoming.origin().to_string(), "orders");

    incoming.ack().await.unwrap();
    assert_eq!(broker.finished_ids().len(), 1);
    assert_eq!(broker.in_flight_count(), 0);
}

/// Test messages published before a subscription are kept for it
#[tokio::test]
async fn test_messages_wait_for_first_subscriber() {
    init_tracing();

    let broker = InMemoryNsqBroker::new();
    let transport = transport(&broker);

    transport.send(vec![package("orders", "early")]).await.unwrap();
    assert_eq!(broker.depth("orders", "service-bus"), 1);

    let (handler, mut received) = collecting_handler();
    transport.consume(handler, &[queue("orders")]).await.unwrap();

    let incoming = recv_within(&mut received, RECEIVE_TIMEOUT).await.unwrap();
    assert_eq!(incoming.payload_str(), "early");
    assert!(!incoming.id().is_empty());
}

/// Test nack with requeue redelivers after the requeue delay
#[tokio::test]
async fn test_nack_requeues() {
    init_tracing();

    let broker = InMemoryNsqBroker::new();
    let transport = NsqTransport::with_options(
        Arc::new(broker.clone()),
        config(),
        NsqConsumerOptions {
            consumer_channel: "workers".to_string(),
            requeue_delay: Duration::from_millis(20),
        },
    );

    let (handler, mut received) = collecting_handler();
    transport.consume(handler, &[queue("jobs")]).await.unwrap();
    transport.send(vec![package("jobs", "retry")]).await.unwrap();

    let first = recv_within(&mut received, RECEIVE_TIMEOUT).await.unwrap();
    first.nack(true, Some("busy")).await.unwrap();
    assert_eq!(broker.requeued_ids().len(), 1);

    let second = recv_within(&mut received, RECEIVE_TIMEOUT).await.unwrap();
    assert_eq!(second.payload_str(), "retry");

    // reject without requeue finishes the message
    second.reject(false, None).await.unwrap();
    assert_eq!(broker.finished_ids().len(), 1);
    assert_eq!(broker.depth("jobs", "workers"), 0);
}

/// Test a failed bulk send still delivers the other packages
#[tokio::test]
async fn test_bulk_send_is_not_atomic() {
    init_tracing();

    let broker = InMemoryNsqBroker::new();
    let transport = NsqTransport::new(
        Arc::new(FaultyNsqClient {
            broker: broker.clone(),
            fault: PublishFault::fail_on(2),
        }),
        config(),
    );

    assert!(!transport.capabilities().atomic_bulk_send);

    let result = transport
        .send(vec![package("orders", "first"), package("orders", "second")])
        .await;

    assert!(matches!(result, Err(TransportError::SendMessageFailed { .. })));
    assert_eq!(broker.published_count("orders"), 1);
}

/// Test a bulk send stops publishing after the first failure
#[tokio::test]
async fn test_bulk_send_stops_at_first_failure() {
    init_tracing();

    let broker = InMemoryNsqBroker::new();
    let fault = PublishFault::fail_on(2);
    let transport = NsqTransport::new(
        Arc::new(FaultyNsqClient {
            broker: broker.clone(),
            fault: fault.clone(),
        }),
        config(),
    );

    let result = transport
        .send(vec![
            package("orders", "first"),
            package("orders", "second"),
            package("orders", "third"),
        ])
        .await;

    assert!(matches!(result, Err(TransportError::SendMessageFailed { .. })));
    assert_eq!(fault.attempts(), 2);
    assert_eq!(broker.published_count("orders"), 1);
}

/// Test topology calls resolve without touching the broker
#[tokio::test]
async fn test_topology_is_implicit() {
    init_tracing();

    let broker = InMemoryNsqBroker::new();
    let transport = transport(&broker);

    transport
        .create_topic(&Topic::Nsq(NsqChannel::new("orders").unwrap()), &[])
        .await
        .unwrap();
    transport.create_queue(&queue("orders"), &[]).await.unwrap();

    assert!(!transport.capabilities().topology);
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

/// Test entities of other backends are refused
#[tokio::test]
async fn test_foreign_entities_rejected() {
    init_tracing();

    let broker = InMemoryNsqBroker::new();
    let transport = transport(&broker);

    let redis = RedisTransportLevelDestination::new("orders").unwrap();
    let result = transport
        .send(vec![package("orders", "ok"), OutboundPackage::new("p", Headers::new(), redis)])
        .await;
    assert!(matches!(result, Err(TransportError::UnsupportedEntity { backend: "NSQ", .. })));
    assert_eq!(broker.published_count("orders"), 0);

    let (handler, _received) = collecting_handler();
    let result = transport
        .consume(handler, &[Queue::Amqp(AmqpQueue::default("orders").unwrap())])
        .await;
    assert!(matches!(result, Err(TransportError::UnsupportedEntity { .. })));
}

/// Test a refused connection surfaces as ConnectionFail
#[tokio::test]
async fn test_connection_refused() {
    init_tracing();

    let broker = InMemoryNsqBroker::new();
    broker.refuse_connections(true);
    let transport = transport(&broker);

    let result = transport.send(vec![package("orders", "p")]).await;

    assert!(matches!(result, Err(TransportError::ConnectionFail { port: 4150, .. })));
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

/// Test stop ends subscriptions and disconnects
#[tokio::test]
async fn test_stop() {
    init_tracing();

    let broker = InMemoryNsqBroker::new();
    let transport = transport(&broker);

    let (handler, mut received) = collecting_handler();
    transport.consume(handler, &[queue("orders")]).await.unwrap();
    assert_eq!(transport.consuming(), vec!["orders".to_string()]);

    transport.stop().await.unwrap();

    assert!(transport.consuming().is_empty());
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    assert!(!broker.is_connected());
    assert!(recv_within(&mut received, Duration::from_millis(50)).await.is_none());
}

/// Test a body that is not UTF-8 arrives byte for byte
#[tokio::test]
async fn test_binary_body_passes_through() {
    init_tracing();

    let broker = InMemoryNsqBroker::new();
    let transport = transport(&broker);

    let (handler, mut received) = collecting_handler();
    transport.consume(handler, &[queue("raw")]).await.unwrap();

    let body = vec![255u8, 0, 254, 97];
    broker.publish("raw", body.clone()).await.unwrap();

    let incoming = recv_within(&mut received, RECEIVE_TIMEOUT).await.unwrap();
    assert_eq!(incoming.payload(), body.as_slice());
    assert!(incoming.headers().is_empty());
    assert!(!incoming.id().is_empty());
    assert!(!incoming.trace_id().is_empty());
}

/// Test a handler still running does not hold back later messages
#[tokio::test]
async fn test_slow_handler_does_not_block_receiving() {
    init_tracing();

    let broker = InMemoryNsqBroker::new();
    let transport = transport(&broker);

    let gate = Arc::new(Notify::new());
    let (handler, mut received) = gated_handler("first", gate.clone());
    transport.consume(handler, &[queue("orders")]).await.unwrap();

    transport.send(vec![package("orders", "first")]).await.unwrap();
    transport.send(vec![package("orders", "second")]).await.unwrap();

    let second = recv_within(&mut received, RECEIVE_TIMEOUT).await.unwrap();
    assert_eq!(second.payload_str(), "second");

    gate.notify_one();
    let first = recv_within(&mut received, RECEIVE_TIMEOUT).await.unwrap();
    assert_eq!(first.payload_str(), "first");
}

/// Test messages of one topic are dispatched in publish order
#[tokio::test]
async fn test_dispatch_order_per_topic() {
    init_tracing();

    let broker = InMemoryNsqBroker::new();
    let transport = transport(&broker);

    let (handler, order_seen) = ordered_handler();
    transport.consume(handler, &[queue("orders")]).await.unwrap();

    let expected: Vec<String> = (0..20).map(|i| format!("message-{}", i)).collect();
    for payload in &expected {
        transport.send(vec![package("orders", payload)]).await.unwrap();
    }

    assert!(wait_for(RECEIVE_TIMEOUT, || order_seen.lock().len() == expected.len()).await);
    assert_eq!(*order_seen.lock(), expected);
}

/// Test concurrent consume calls on one topic subscribe once
#[tokio::test]
async fn test_concurrent_consume_subscribes_once() {
    init_tracing();

    let broker = InMemoryNsqBroker::new();
    let transport = transport(&broker);

    let (handler, _received) = collecting_handler();
    let queues = [queue("orders")];
    let (first, second) = tokio::join!(
        transport.consume(handler.clone(), &queues),
        transport.consume(handler.clone(), &queues)
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(transport.consuming(), vec!["orders".to_string()]);
    assert_eq!(broker.subscriber_count("orders", "service-bus"), 1);
}
