mod common;

use common::{
    collecting_handler, gated_handler, init_tracing, ordered_handler, recv_within, wait_for, FaultyRedisClient,
    PublishFault,
};
use service_bus_transport::nsq::NsqChannel;
use service_bus_transport::redis::{
    InMemoryRedisBroker, RedisChannel, RedisClient, RedisConnectionConfiguration, RedisTransport,
    RedisTransportLevelDestination,
};
use service_bus_transport::{
    ConnectionState, Headers, OutboundPackage, Queue, Transport, TransportCapabilities, TransportError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(2);

fn config() -> RedisConnectionConfiguration {
    RedisConnectionConfiguration::parse("tcp://localhost:6379?timeout=1").unwrap()
}

fn transport(broker: &InMemoryRedisBroker) -> RedisTransport {
    RedisTransport::new(Arc::new(broker.clone()), config())
}

fn package(channel: &str, payload: &str) -> OutboundPackage {
    OutboundPackage::new(payload, Headers::new(), RedisTransportLevelDestination::new(channel).unwrap())
}

fn queue(channel: &str) -> Queue {
    Queue::Redis(RedisChannel::new(channel).unwrap())
}

/// Test publish then consume on one channel
#[tokio::test]
async fn test_publish_and_consume() {
    init_tracing();

    let broker = InMemoryRedisBroker::new();
    let transport = transport(&broker);

    let (handler, mut received) = collecting_handler();
    transport.consume(handler, &[queue("c")]).await.unwrap();
    assert!(wait_for(Duration::from_secs(1), || broker.subscriber_count("c") == 1).await);

    transport.send(vec![package("c", "p")]).await.unwrap();

    let incoming = recv_within(&mut received, RECEIVE_TIMEOUT).await.unwrap();
    assert_eq!(incoming.payload_str(), "p");
    assert!(!incoming.id().is_empty());
    assert!(!incoming.trace_id().is_empty());
    assert!(incoming.headers().is_empty());
    assert_eq!(incoming.origin().to_string(), "c");
}

/// Test ack, nack and reject succeed without effect
#[tokio::test]
async fn test_settlement_is_a_no_op() {
    init_tracing();

    let broker = InMemoryRedisBroker::new();
    let transport = transport(&broker);

    assert_eq!(
        transport.capabilities(),
        TransportCapabilities {
            acknowledgement: false,
            atomic_bulk_send: false,
            topology: false,
        }
    );

    let (handler, mut received) = collecting_handler();
    transport.consume(handler, &[queue("c")]).await.unwrap();
    transport
        .send(vec![package("c", "one"), package("c", "two"), package("c", "three")])
        .await
        .unwrap();

    let first = recv_within(&mut received, RECEIVE_TIMEOUT).await.unwrap();
    let second = recv_within(&mut received, RECEIVE_TIMEOUT).await.unwrap();
    let third = recv_within(&mut received, RECEIVE_TIMEOUT).await.unwrap();

    assert!(!first.supports_acknowledgement());
    first.ack().await.unwrap();
    second.nack(true, None).await.unwrap();
    third.reject(true, Some("ignored")).await.unwrap();

    // nothing is redelivered
    assert!(recv_within(&mut received, Duration::from_millis(50)).await.is_none());
}

/// Test a failed bulk send still delivers the other packages
#[tokio::test]
async fn test_bulk_send_is_not_atomic() {
    init_tracing();

    let broker = InMemoryRedisBroker::new();
    let transport = RedisTransport::new(
        Arc::new(FaultyRedisClient {
            broker: broker.clone(),
            fault: PublishFault::fail_on(2),
        }),
        config(),
    );

    let result = transport
        .send(vec![package("c", "first"), package("c", "second")])
        .await;

    assert!(matches!(result, Err(TransportError::SendMessageFailed { .. })));
    assert_eq!(broker.published("c").len(), 1);
}

/// Test a bulk send stops publishing after the first failure
#[tokio::test]
async fn test_bulk_send_stops_at_first_failure() {
    init_tracing();

    let broker = InMemoryRedisBroker::new();
    let fault = PublishFault::fail_on(1);
    let transport = RedisTransport::new(
        Arc::new(FaultyRedisClient {
            broker: broker.clone(),
            fault: fault.clone(),
        }),
        config(),
    );

    let result = transport
        .send(vec![package("c", "first"), package("c", "second")])
        .await;

    assert!(matches!(result, Err(TransportError::SendMessageFailed { .. })));
    assert_eq!(fault.attempts(), 1);
    assert!(broker.published("c").is_empty());
}

/// Test a mandatory package with no subscribers is still accepted
#[tokio::test]
async fn test_mandatory_without_subscribers() {
    init_tracing();

    let broker = InMemoryRedisBroker::new();
    let transport = transport(&broker);

    transport.send(vec![package("nobody", "lost").mandatory()]).await.unwrap();

    let published = broker.published("nobody");
    assert_eq!(published.len(), 1);
    assert!(published[0].starts_with("[\"lost\","));
    assert!(published[0].contains("x-trace-id"));
}

/// Test a negative timeout falls back to the default
#[test]
fn test_negative_timeout_uses_default() {
    let config = RedisConnectionConfiguration::parse("tcp://host:7000?timeout=-1").unwrap();

    assert_eq!(config.host(), "host");
    assert_eq!(config.port(), 7000);
    assert_eq!(config.timeout(), Duration::from_secs(5));
}

/// Test entities of other backends are refused
#[tokio::test]
async fn test_foreign_queue_rejected() {
    init_tracing();

    let broker = InMemoryRedisBroker::new();
    let transport = transport(&broker);

    let (handler, _received) = collecting_handler();
    let result = transport
        .consume(handler, &[queue("c"), Queue::Nsq(NsqChannel::new("c").unwrap())])
        .await;

    assert!(matches!(result, Err(TransportError::UnsupportedEntity { backend: "Redis", .. })));
    assert!(transport.consuming().is_empty());
}

/// Test a refused connection surfaces as ConnectionFail
#[tokio::test]
async fn test_connection_refused() {
    init_tracing();

    let broker = InMemoryRedisBroker::new();
    broker.refuse_connections(true);
    let transport = transport(&broker);

    let err = transport.connect().await.unwrap_err();

    assert!(matches!(err, TransportError::ConnectionFail { port: 6379, .. }));
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

/// Test stop ends subscriptions and disconnects
#[tokio::test]
async fn test_stop() {
    init_tracing();

    let broker = InMemoryRedisBroker::new();
    let transport = transport(&broker);

    let (handler, _received) = collecting_handler();
    transport.consume(handler, &[queue("c")]).await.unwrap();
    assert_eq!(broker.subscriber_count("c"), 1);

    transport.stop().await.unwrap();

    assert!(transport.consuming().is_empty());
    assert!(!broker.is_connected());
    assert_eq!(broker.subscriber_count("c"), 0);
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

/// Test a handler still running does not hold back later messages
#[tokio::test]
async fn test_slow_handler_does_not_block_receiving() {
    init_tracing();

    let broker = InMemoryRedisBroker::new();
    let transport = transport(&broker);

    let gate = Arc::new(Notify::new());
    let (handler, mut received) = gated_handler("first", gate.clone());
    transport.consume(handler, &[queue("c")]).await.unwrap();
    assert!(wait_for(Duration::from_secs(1), || broker.subscriber_count("c") == 1).await);

    transport.send(vec![package("c", "first")]).await.unwrap();
    transport.send(vec![package("c", "second")]).await.unwrap();

    let second = recv_within(&mut received, RECEIVE_TIMEOUT).await.unwrap();
    assert_eq!(second.payload_str(), "second");

    gate.notify_one();
    let first = recv_within(&mut received, RECEIVE_TIMEOUT).await.unwrap();
    assert_eq!(first.payload_str(), "first");
}

/// Test messages of one channel are dispatched in publish order
#[tokio::test]
async fn test_dispatch_order_per_channel() {
    init_tracing();

    let broker = InMemoryRedisBroker::new();
    let transport = transport(&broker);

    let (handler, order_seen) = ordered_handler();
    transport.consume(handler, &[queue("c")]).await.unwrap();
    assert!(wait_for(Duration::from_secs(1), || broker.subscriber_count("c") == 1).await);

    let expected: Vec<String> = (0..20).map(|i| format!("message-{}", i)).collect();
    for payload in &expected {
        transport.send(vec![package("c", payload)]).await.unwrap();
    }

    assert!(wait_for(RECEIVE_TIMEOUT, || order_seen.lock().len() == expected.len()).await);
    assert_eq!(*order_seen.lock(), expected);
}

/// Test concurrent consume calls on one channel subscribe once
#[tokio::test]
async fn test_concurrent_consume_subscribes_once() {
    init_tracing();

    let broker = InMemoryRedisBroker::new();
    let transport = transport(&broker);

    let (handler, _received) = collecting_handler();
    let queues = [queue("c")];
    let (first, second) = tokio::join!(
        transport.consume(handler.clone(), &queues),
        transport.consume(handler.clone(), &queues)
    );
    first.unwrap();
    second.unwrap();

    assert!(wait_for(Duration::from_secs(1), || broker.subscriber_count("c") == 1).await);
    assert_eq!(transport.consuming(), vec!["c".to_string()]);
}
