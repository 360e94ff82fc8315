//! Common test utilities for transport testing
//!
//! Tracing setup, fault-injecting broker clients and helpers for collecting
//! consumed packages.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::BoxStream;
use service_bus_transport::amqp::{
    AmqpChannel, AmqpClient, AmqpConnectionConfiguration, AmqpDelivery, AmqpExchange, AmqpPublish,
    AmqpQueue, InMemoryAmqpBroker,
};
use service_bus_transport::nsq::{InMemoryNsqBroker, NsqClient, NsqConnectionConfiguration, NsqMessage};
use service_bus_transport::redis::{InMemoryRedisBroker, RedisClient, RedisConnectionConfiguration};
use service_bus_transport::{message_handler, Arguments, BrokerError, IncomingPackage, MessageHandler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

static TRACING: Once = Once::new();

/// Install a fmt subscriber honouring `RUST_LOG`; safe to call from every test
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "service_bus_transport=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Handler forwarding every received package into a channel
pub fn collecting_handler() -> (MessageHandler, mpsc::UnboundedReceiver<IncomingPackage>) {
    let (sender, receiver) = mpsc::unbounded_channel();

    let handler = message_handler(move |package| {
        let sender = sender.clone();
        async move {
            let _ = sender.send(package);
        }
    });

    (handler, receiver)
}

/// Handler recording payloads in dispatch order; the record is taken before the
/// handler future is spawned
pub fn ordered_handler() -> (MessageHandler, Arc<parking_lot::Mutex<Vec<String>>>) {
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let recorded = order.clone();

    let handler = message_handler(move |package| {
        recorded.lock().push(package.payload_str().into_owned());
        async move {
            let _ = package.ack().await;
        }
    });

    (handler, order)
}

/// Handler that parks on `gate` for the payload `blocked_payload` and forwards
/// every package once its handler completes
pub fn gated_handler(
    blocked_payload: &str,
    gate: Arc<Notify>,
) -> (MessageHandler, mpsc::UnboundedReceiver<IncomingPackage>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let blocked_payload = blocked_payload.to_string();

    let handler = message_handler(move |package| {
        let sender = sender.clone();
        let gate = gate.clone();
        let blocked = package.payload_str() == blocked_payload;

        async move {
            if blocked {
                gate.notified().await;
            }
            let _ = sender.send(package);
        }
    });

    (handler, receiver)
}

/// Next received package, or `None` after `timeout`
pub async fn recv_within(
    receiver: &mut mpsc::UnboundedReceiver<IncomingPackage>,
    timeout: Duration,
) -> Option<IncomingPackage> {
    tokio::time::timeout(timeout, receiver.recv()).await.ok().flatten()
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    condition()
}

/// Counts publishes across channels and fails the N-th one (1-based)
#[derive(Clone)]
pub struct PublishFault {
    fail_on: usize,
    attempts: Arc<AtomicUsize>,
}

impl PublishFault {
    pub fn fail_on(fail_on: usize) -> Self {
        Self {
            fail_on,
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), BrokerError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if attempt == self.fail_on {
            return Err(format!("injected failure on publish #{}", attempt).into());
        }
        Ok(())
    }
}

/// AMQP client whose channels fail a chosen publish
pub struct FaultyAmqpClient {
    pub broker: InMemoryAmqpBroker,
    pub fault: PublishFault,
}

impl FaultyAmqpClient {
    pub fn new(broker: InMemoryAmqpBroker, fault: PublishFault) -> Self {
        Self { broker, fault }
    }
}

#[async_trait]
impl AmqpClient for FaultyAmqpClient {
    fn is_connected(&self) -> bool {
        self.broker.is_connected()
    }

    async fn connect(&self, config: &AmqpConnectionConfiguration) -> Result<(), BrokerError> {
        self.broker.connect(config).await
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.broker.disconnect().await
    }

    async fn channel(&self) -> Result<Arc<dyn AmqpChannel>, BrokerError> {
        Ok(Arc::new(FaultyAmqpChannel {
            inner: self.broker.channel().await?,
            fault: self.fault.clone(),
        }))
    }
}

struct FaultyAmqpChannel {
    inner: Arc<dyn AmqpChannel>,
    fault: PublishFault,
}

#[async_trait]
impl AmqpChannel for FaultyAmqpChannel {
    async fn qos(&self, prefetch_size: u32, prefetch_count: u16, global: bool) -> Result<(), BrokerError> {
        self.inner.qos(prefetch_size, prefetch_count, global).await
    }

    async fn exchange_declare(&self, exchange: &AmqpExchange) -> Result<(), BrokerError> {
        self.inner.exchange_declare(exchange).await
    }

    async fn queue_declare(&self, queue: &AmqpQueue) -> Result<(), BrokerError> {
        self.inner.queue_declare(queue).await
    }

    async fn exchange_bind(&self, destination: &str, source: &str, routing_key: &str) -> Result<(), BrokerError> {
        self.inner.exchange_bind(destination, source, routing_key).await
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: &Arguments,
    ) -> Result<(), BrokerError> {
        self.inner.queue_bind(queue, exchange, routing_key, arguments).await
    }

    async fn publish(&self, message: AmqpPublish) -> Result<(), BrokerError> {
        self.fault.check()?;
        self.inner.publish(message).await
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<BoxStream<'static, Result<AmqpDelivery, BrokerError>>, BrokerError> {
        self.inner.consume(queue, consumer_tag).await
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        self.inner.cancel(consumer_tag).await
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.inner.ack(delivery_tag).await
    }

    async fn nack(&self, delivery_tag: u64, multiple: bool, requeue: bool) -> Result<(), BrokerError> {
        self.inner.nack(delivery_tag, multiple, requeue).await
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.inner.reject(delivery_tag, requeue).await
    }

    async fn tx_select(&self) -> Result<(), BrokerError> {
        self.inner.tx_select().await
    }

    async fn tx_commit(&self) -> Result<(), BrokerError> {
        self.inner.tx_commit().await
    }

    async fn tx_rollback(&self) -> Result<(), BrokerError> {
        self.inner.tx_rollback().await
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner.close().await
    }
}

/// NSQ client failing a chosen publish
pub struct FaultyNsqClient {
    pub broker: InMemoryNsqBroker,
    pub fault: PublishFault,
}

#[async_trait]
impl NsqClient for FaultyNsqClient {
    fn is_connected(&self) -> bool {
        self.broker.is_connected()
    }

    async fn connect(&self, config: &NsqConnectionConfiguration) -> Result<(), BrokerError> {
        self.broker.connect(config).await
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.broker.close().await
    }

    async fn publish(&self, topic: &str, body: Vec<u8>) -> Result<(), BrokerError> {
        self.fault.check()?;
        self.broker.publish(topic, body).await
    }

    async fn subscribe(&self, topic: &str, channel: &str) -> Result<BoxStream<'static, NsqMessage>, BrokerError> {
        self.broker.subscribe(topic, channel).await
    }
}

/// Redis client failing a chosen publish
pub struct FaultyRedisClient {
    pub broker: InMemoryRedisBroker,
    pub fault: PublishFault,
}

#[async_trait]
impl RedisClient for FaultyRedisClient {
    fn is_connected(&self) -> bool {
        self.broker.is_connected()
    }

    async fn connect(&self, config: &RedisConnectionConfiguration) -> Result<(), BrokerError> {
        self.broker.connect(config).await
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.broker.close().await
    }

    async fn publish(&self, channel: &str, message: String) -> Result<u64, BrokerError> {
        self.fault.check()?;
        self.broker.publish(channel, message).await
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, BrokerError> {
        self.broker.subscribe(channel).await
    }
}

/// AMQP client whose connect never completes
pub struct HangingAmqpClient;

#[async_trait]
impl AmqpClient for HangingAmqpClient {
    fn is_connected(&self) -> bool {
        false
    }

    async fn connect(&self, _config: &AmqpConnectionConfiguration) -> Result<(), BrokerError> {
        futures::future::pending::<()>().await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn channel(&self) -> Result<Arc<dyn AmqpChannel>, BrokerError> {
        Err("connection is closed".into())
    }
}
