//! NSQ transport

use crate::common::entities::{Queue, QueueBind, Topic, TopicBind, TransportBackend};
use crate::common::package::OutboundPackage;
use crate::common::transport::{
    connect_with_timeout, ensure_destinations, ConnectionState, MessageHandler, StateCell, Transport,
    TransportCapabilities,
};
use crate::error::{TransportError, TransportResult};
use crate::nsq::channel::NsqChannel;
use crate::nsq::client::NsqClient;
use crate::nsq::config::NsqConnectionConfiguration;
use crate::nsq::consumer::NsqConsumer;
use crate::nsq::publisher::NsqPublisher;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// NSQ channel every consumer subscribes through
pub const DEFAULT_CONSUMER_CHANNEL: &str = "service-bus";

/// Delay before a requeued message is redelivered
pub const DEFAULT_REQUEUE_DELAY: Duration = Duration::from_millis(10);

/// Consumer settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsqConsumerOptions {
    pub consumer_channel: String,
    pub requeue_delay: Duration,
}

impl Default for NsqConsumerOptions {
    fn default() -> Self {
        Self {
            consumer_channel: DEFAULT_CONSUMER_CHANNEL.to_string(),
            requeue_delay: DEFAULT_REQUEUE_DELAY,
        }
    }
}

/// Transport over nsqd. Topics are implicit, so there is no topology to declare.
pub struct NsqTransport {
    client: Arc<dyn NsqClient>,
    config: NsqConnectionConfiguration,
    options: NsqConsumerOptions,
    state: StateCell,
    connect_lock: Mutex<()>,
    consume_lock: Mutex<()>,
    publisher: NsqPublisher,
    consumers: DashMap<String, Arc<NsqConsumer>>,
}

impl NsqTransport {
    pub fn new(client: Arc<dyn NsqClient>, config: NsqConnectionConfiguration) -> Self {
        Self::with_options(client, config, NsqConsumerOptions::default())
    }

    pub fn with_options(
        client: Arc<dyn NsqClient>,
        config: NsqConnectionConfiguration,
        options: NsqConsumerOptions,
    ) -> Self {
        Self {
            publisher: NsqPublisher::new(client.clone()),
            client,
            config,
            options,
            state: StateCell::new(),
            connect_lock: Mutex::new(()),
            consume_lock: Mutex::new(()),
            consumers: DashMap::new(),
        }
    }

    pub fn config(&self) -> &NsqConnectionConfiguration {
        &self.config
    }

    pub fn options(&self) -> &NsqConsumerOptions {
        &self.options
    }

    pub fn consuming(&self) -> Vec<String> {
        self.consumers.iter().map(|entry| entry.key().clone()).collect()
    }

    fn channel<'a>(&self, queue: &'a Queue) -> TransportResult<&'a NsqChannel> {
        match queue {
            Queue::Nsq(channel) => Ok(channel),
            other => Err(TransportError::UnsupportedEntity {
                backend: "NSQ",
                entity: format!("{} queue \"{}\"", other.backend().label(), other.name()),
            }),
        }
    }

    async fn stop_consumers(&self) {
        for topic in self.consuming() {
            if let Some((topic, consumer)) = self.consumers.remove(&topic) {
                tracing::info!(address = %self.config.address(), topic = %topic, "Completing the subscription");
                consumer.stop().await;
            }
        }
    }
}

#[async_trait]
impl Transport for NsqTransport {
    fn backend(&self) -> TransportBackend {
        TransportBackend::Nsq
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            acknowledgement: true,
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
                tracing::info!(address = %self.config.address(), "Connected to nsqd");
                Ok(())
            }
            Err(e) => {
                self.state.set(ConnectionState::Disconnected);
                tracing::error!(address = %self.config.address(), error = %e, "nsqd connection failed");

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
        tracing::info!(address = %self.config.address(), "Disconnect from nsqd");

        Ok(())
    }

    async fn create_topic(&self, topic: &Topic, _binds: &[TopicBind]) -> TransportResult<()> {
        tracing::debug!(topic = %topic, "NSQ topics are created on first publish");
        Ok(())
    }

    async fn create_queue(&self, queue: &Queue, _binds: &[QueueBind]) -> TransportResult<()> {
        tracing::debug!(queue = %queue, "NSQ channels are created on first subscribe");
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
                tracing::debug!(topic = %channel.name(), "Topic is already consumed");
                continue;
            }

            tracing::info!(
                address = %self.config.address(),
                topic = %channel.name(),
                channel = %self.options.consumer_channel,
                "Starting a subscription"
            );

            let consumer = Arc::new(NsqConsumer::new(
                channel.name(),
                self.options.consumer_channel.clone(),
                self.options.requeue_delay,
                self.client.clone(),
            ));
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

        ensure_destinations(&packages, TransportBackend::Nsq)?;
        self.connect().await?;

        match packages.as_slice() {
            [package] => self.publisher.publish(package).await,
            packages => self.publisher.publish_bulk(packages).await,
        }
    }
}
