//! `redis` crate implementation of [`RedisClient`]

use crate::error::BrokerError;
use crate::redis::client::RedisClient;
use crate::redis::config::RedisConnectionConfiguration;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::RwLock;
use ::redis::aio::ConnectionManager;
use ::redis::Client;

/// Publishes through a [`ConnectionManager`]; every subscription opens its own
/// pub/sub connection.
#[derive(Default)]
pub struct RedisPubSubClient {
    connection: RwLock<Option<Connected>>,
}

#[derive(Clone)]
struct Connected {
    client: Client,
    manager: ConnectionManager,
}

impl RedisPubSubClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn connected(&self) -> Result<Connected, BrokerError> {
        self.connection
            .read()
            .clone()
            .ok_or_else(|| "Redis client is not connected".into())
    }
}

#[async_trait]
impl RedisClient for RedisPubSubClient {
    fn is_connected(&self) -> bool {
        self.connection.read().is_some()
    }

    async fn connect(&self, config: &RedisConnectionConfiguration) -> Result<(), BrokerError> {
        let client = Client::open(config.client_url()?)?;
        let mut manager = ConnectionManager::new(client.clone()).await?;

        // Test connection
        ::redis::cmd("PING").query_async::<_, String>(&mut manager).await?;

        tracing::debug!(address = %config.address(), "Redis connection established");

        *self.connection.write() = Some(Connected { client, manager });
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.connection.write().take();
        Ok(())
    }

    async fn publish(&self, channel: &str, message: String) -> Result<u64, BrokerError> {
        let mut manager = self.connected()?.manager;

        let receivers = ::redis::cmd("PUBLISH")
            .arg(channel)
            .arg(message)
            .query_async::<_, u64>(&mut manager)
            .await?;

        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, BrokerError> {
        let client = self.connected()?.client;

        let mut pubsub = client.get_async_connection().await?.into_pubsub();
        pubsub.subscribe(channel).await?;

        let channel = channel.to_string();

        Ok(pubsub
            .into_on_message()
            .filter_map(move |message| {
                let payload = match message.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "Skipping non-text Redis message");
                        None
                    }
                };

                futures::future::ready(payload)
            })
            .boxed())
    }
}
