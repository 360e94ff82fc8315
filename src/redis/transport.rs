//! Redis pub/sub transport

use crate::common::entities::{Queue, QueueBind, Topic, TopicBind, TransportBackend};
use crate::common::package::OutboundPackage;
use crate::common::transport::{
    connect_with_timeout, ensure_destinations, ConnectionState, MessageHandler, StateCell, Transport,
    TransportCapabilities,
};
use crate::error::{TransportError, TransportResult};
use crate::redis::channel::RedisChannel;
use crate::redis::client::RedisClient;
use crate::redis::config::RedisConnectionConfiguration;
use crate::redis::consumer::RedisConsumer;
use crate::redis::publisher::RedisPublisher;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Transport over Redis pub/sub.
///
/// Delivery is fire-and-forget: messages published while nobody is subscribed
/// are lost, and ack/nack/reject on received packages have no effect.
pub struct RedisTransport {
    client: Arc<dyn RedisClient>,
    config: RedisConnectionConfiguration,
    state: StateCell,
    connect_lock: Mutex<()>,
    consume_lock: Mutex<()>,
    publisher: RedisPublisher,
    consumers: DashMap<String, Arc<RedisConsumer>>,
}

impl RedisTransport {
    pub fn new(client: Arc<dyn RedisClient>, config: RedisConnectionConfiguration) -> Self {
        Self {
            publisher: RedisPublisher::new(client.clone()),
            client,
            config,
            state: StateCell::new(),
            connect_lock: Mutex::new(()),
            consume_lock: Mutex::new(()),
            consumers: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RedisConnectionConfiguration {
        &self.config
    }

    pub fn consuming(&self) -> Vec<String> {
        self.consumers.iter().map(|entry| entry.key().clone()).collect()
    }

    fn channel<'a>(&self, queue: &'a Queue) -> TransportResult<&'a RedisChannel> {
        match queue {
            Queue::Redis(channel) => Ok(channel),
            other => Err(TransportError::UnsupportedEntity {
                backend: "Redis",
                entity: format!("{} queue \"{}\"", other.backend().label(), other.name()),
            }),
        }
    }

    async fn stop_consumers(&self) {
        for channel in self.consuming() {
            if let Some((channel, consumer)) = self.consumers.remove(&channel) {
                tracing::info!(address = %self.config.address(), channel = %channel, "Completing the subscription");
                consumer.stop().await;
            }
        }
    }
}

#[async_trait]
impl Transport for RedisTransport {
    fn backend(&self) -> TransportBackend {
        TransportBackend::Redis
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            acknowledgement: false,
            atomic_bulk_send: false,
            topology: false,
        }
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    async fn connect(&self) -> TransportResult<()> {
        let _guard = self.connect_lock.lock().await;

        if self.client.is_connected() {
            self.state.set(ConnectionState::Connected);
            return Ok(());
        }

        self.state.set(ConnectionState::Connecting);

        match connect_with_timeout(self.config.timeout(), self.client.connect(&self.config)).await {
            Ok(()) => {
                self.state.set(ConnectionState::Connected);
                tracing::info!(address = %self.config.address(), "Connected to Redis");
                Ok(())
            }
            Err(e) => {
                self.state.set(ConnectionState::Disconnected);
                tracing::error!(address = %self.config.address(), error = %e, "Redis connection failed");

                Err(TransportError::connection_fail(
                    self.config.host(),
                    self.config.port(),
                    self.config.socket_path().unwrap_or_default(),
                    e,
                ))
            }
        }
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.stop_consumers().await;

        if self.client.is_connected() {
            if let Err(e) = self.client.close().await {
                tracing::debug!(error = %e, "Error ignored while disconnecting");
            }
        }

        self.state.set(ConnectionState::Disconnected);
        tracing::info!(address = %self.config.address(), "Disconnect from Redis");

        Ok(())
    }

    async fn create_topic(&self, topic: &Topic, _binds: &[TopicBind]) -> TransportResult<()> {
        tracing::debug!(topic = %topic, "Redis channels need no declaration");
        Ok(())
    }

    async fn create_queue(&self, queue: &Queue, _binds: &[QueueBind]) -> TransportResult<()> {
        tracing::debug!(queue = %queue, "Redis channels need no declaration");
        Ok(())
    }

    async fn consume(&self, on_message: MessageHandler, queues: &[Queue]) -> TransportResult<()> {
        let channels = queues
            .iter()
            .map(|queue| self.channel(queue))
            .collect::<TransportResult<Vec<_>>>()?;

        let _guard = self.consume_lock.lock().await;
        self.connect().await?;

        for channel in channels {
            if self.consumers.contains_key(channel.name()) {
                tracing::debug!(channel = %channel.name(), "Channel is already consumed");
                continue;
            }

            tracing::info!(
                address = %self.config.address(),
                channel = %channel.name(),
                "Starting a subscription"
            );

            let consumer = Arc::new(RedisConsumer::new(channel.name(), self.client.clone()));
            consumer.listen(on_message.clone()).await?;

            self.consumers.insert(channel.name().to_string(), consumer);
        }

        Ok(())
    }

    async fn stop(&self) -> TransportResult<()> {
        let _guard = self.consume_lock.lock().await;
        self.disconnect().await
    }

    async fn send(&self, packages: Vec<OutboundPackage>) -> TransportResult<()> {
        if packages.is_empty() {
            return Ok(());
        }

        ensure_destinations(&packages, TransportBackend::Redis)?;
        self.connect().await?;

        match packages.as_slice() {
            [package] => self.publisher.publish(package).await,
            packages => self.publisher.publish_bulk(packages).await,
        }
    }
}
