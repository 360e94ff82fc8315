//! Boundary to the Redis wire client

use crate::error::BrokerError;
use crate::redis::config::RedisConnectionConfiguration;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Redis pub/sub connection
#[async_trait]
pub trait RedisClient: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn connect(&self, config: &RedisConnectionConfiguration) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;

    /// PUBLISH; returns the number of subscribers that received the message
    async fn publish(&self, channel: &str, message: String) -> Result<u64, BrokerError>;

    /// SUBSCRIBE on a dedicated connection; dropping the stream unsubscribes
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, BrokerError>;
}
