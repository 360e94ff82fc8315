//! Boundary to the AMQP wire client
//!
//! The transport only talks to the broker through these traits. A production
//! deployment plugs in an adapter over its AMQP library; [`InMemoryAmqpBroker`]
//! implements them for development and tests.
//!
//! [`InMemoryAmqpBroker`]: crate::amqp::InMemoryAmqpBroker

use crate::amqp::config::AmqpConnectionConfiguration;
use crate::amqp::exchange::AmqpExchange;
use crate::amqp::queue::AmqpQueue;
use crate::common::headers::{Arguments, Headers};
use crate::error::BrokerError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Delivery mode of a message stored on disk
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// A basic.publish request
#[derive(Debug, Clone, PartialEq)]
pub struct AmqpPublish {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub headers: Headers,
    /// `Some(2)` for persistent messages
    pub delivery_mode: Option<u8>,
    /// Per-message TTL in milliseconds
    pub expiration: Option<String>,
    pub mandatory: bool,
    pub immediate: bool,
}

/// A message pushed by the broker to a consumer
#[derive(Debug, Clone, PartialEq)]
pub struct AmqpDelivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub headers: Headers,
    pub redelivered: bool,
}

/// Connection to an AMQP broker
#[async_trait]
pub trait AmqpClient: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn connect(&self, config: &AmqpConnectionConfiguration) -> Result<(), BrokerError>;

    async fn disconnect(&self) -> Result<(), BrokerError>;

    /// Open a new channel on the current connection
    async fn channel(&self) -> Result<Arc<dyn AmqpChannel>, BrokerError>;
}

/// A channel multiplexed over an AMQP connection
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    async fn qos(&self, prefetch_size: u32, prefetch_count: u16, global: bool) -> Result<(), BrokerError>;

    async fn exchange_declare(&self, exchange: &AmqpExchange) -> Result<(), BrokerError>;

    async fn queue_declare(&self, queue: &AmqpQueue) -> Result<(), BrokerError>;

    /// Route messages published to `source` into `destination`
    async fn exchange_bind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: &Arguments,
    ) -> Result<(), BrokerError>;

    async fn publish(&self, message: AmqpPublish) -> Result<(), BrokerError>;

    /// Start a consumer; the stream ends when the consumer is cancelled
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<BoxStream<'static, Result<AmqpDelivery, BrokerError>>, BrokerError>;

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    async fn nack(&self, delivery_tag: u64, multiple: bool, requeue: bool) -> Result<(), BrokerError>;

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;

    async fn tx_select(&self) -> Result<(), BrokerError>;

    async fn tx_commit(&self) -> Result<(), BrokerError>;

    async fn tx_rollback(&self) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}
