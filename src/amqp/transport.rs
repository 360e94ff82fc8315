//! AMQP transport

use crate::amqp::client::{AmqpChannel, AmqpClient};
use crate::amqp::config::{AmqpConnectionConfiguration, AmqpQoSConfiguration};
use crate::amqp::configurator::AmqpConfigurator;
use crate::amqp::consumer::AmqpConsumer;
use crate::amqp::exchange::AmqpExchange;
use crate::amqp::publisher::AmqpPublisher;
use crate::amqp::queue::AmqpQueue;
use crate::common::entities::{Queue, QueueBind, Topic, TopicBind, TransportBackend};
use crate::common::package::OutboundPackage;
use crate::common::transport::{
    connect_with_timeout, ConnectionState, MessageHandler, StateCell, Transport,
    TransportCapabilities,
};
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Transport over an AMQP 0.9.1 broker
pub struct AmqpTransport {
    client: Arc<dyn AmqpClient>,
    config: AmqpConnectionConfiguration,
    qos: AmqpQoSConfiguration,
    state: StateCell,
    /// Primary channel used for declarations and single publishes
    channel: Mutex<Option<Arc<dyn AmqpChannel>>>,
    publisher: Mutex<Option<Arc<AmqpPublisher>>>,
    consumer_channels: Mutex<Vec<Arc<dyn AmqpChannel>>>,
    /// Serializes consume and stop so a queue never gets two consumers
    consume_lock: Mutex<()>,
    consumers: DashMap<String, Arc<AmqpConsumer>>,
}

impl AmqpTransport {
    pub fn new(
        client: Arc<dyn AmqpClient>,
        config: AmqpConnectionConfiguration,
        qos: AmqpQoSConfiguration,
    ) -> Self {
        Self {
            client,
            config,
            qos,
            state: StateCell::new(),
            channel: Mutex::new(None),
            publisher: Mutex::new(None),
            consumer_channels: Mutex::new(Vec::new()),
            consume_lock: Mutex::new(()),
            consumers: DashMap::new(),
        }
    }

    pub fn config(&self) -> &AmqpConnectionConfiguration {
        &self.config
    }

    pub fn qos(&self) -> AmqpQoSConfiguration {
        self.qos
    }

    /// Names of the queues currently consumed
    pub fn consuming(&self) -> Vec<String> {
        self.consumers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Connect if needed and return the primary channel
    async fn ensure_connected(&self) -> TransportResult<Arc<dyn AmqpChannel>> {
        let mut channel = self.channel.lock().await;

        if let Some(channel) = channel.as_ref() {
            if self.client.is_connected() {
                return Ok(channel.clone());
            }
        }

        self.state.set(ConnectionState::Connecting);

        let connected = connect_with_timeout(self.config.timeout(), async {
            if !self.client.is_connected() {
                self.client.connect(&self.config).await?;
            }
            self.client.channel().await
        })
        .await;

        match connected {
            Ok(opened) => {
                *channel = Some(opened.clone());
                self.state.set(ConnectionState::Connected);

                tracing::info!(
                    host = %self.config.host(),
                    port = self.config.port(),
                    vhost = %self.config.virtual_host(),
                    "Connected to broker"
                );

                Ok(opened)
            }
            Err(e) => {
                self.state.set(ConnectionState::Disconnected);

                tracing::error!(
                    host = %self.config.host(),
                    port = self.config.port(),
                    vhost = %self.config.virtual_host(),
                    error = %e,
                    "Broker connection failed"
                );

                Err(TransportError::connection_fail(
                    self.config.host(),
                    self.config.port(),
                    self.config.virtual_host(),
                    e,
                ))
            }
        }
    }

    async fn publisher(&self, channel: Arc<dyn AmqpChannel>) -> TransportResult<Arc<AmqpPublisher>> {
        let mut publisher = self.publisher.lock().await;

        if let Some(publisher) = publisher.as_ref() {
            return Ok(publisher.clone());
        }

        let transaction_channel = self
            .client
            .channel()
            .await
            .map_err(TransportError::send_failed)?;

        let created = Arc::new(AmqpPublisher::new(channel, transaction_channel));
        *publisher = Some(created.clone());

        Ok(created)
    }

    async fn stop_consumers(&self) {
        let queues = self.consuming();

        for queue in queues {
            if let Some((queue, consumer)) = self.consumers.remove(&queue) {
                tracing::info!(
                    host = %self.config.host(),
                    port = self.config.port(),
                    vhost = %self.config.virtual_host(),
                    queue = %queue,
                    "Completing the subscription"
                );

                consumer.stop().await;
            }
        }

        for channel in self.consumer_channels.lock().await.drain(..) {
            if let Err(e) = channel.close().await {
                tracing::debug!(error = %e, "Consumer channel close failed");
            }
        }
    }

    fn exchange<'a>(&self, topic: &'a Topic) -> TransportResult<&'a AmqpExchange> {
        match topic {
            Topic::Amqp(exchange) => Ok(exchange),
            other => Err(unsupported(format!(
                "{} topic \"{}\"",
                other.backend().label(),
                other.name()
            ))),
        }
    }

    fn queue<'a>(&self, queue: &'a Queue) -> TransportResult<&'a AmqpQueue> {
        match queue {
            Queue::Amqp(queue) => Ok(queue),
            other => Err(unsupported(format!(
                "{} queue \"{}\"",
                other.backend().label(),
                other.name()
            ))),
        }
    }
}

fn unsupported(entity: String) -> TransportError {
    TransportError::UnsupportedEntity {
        backend: "AMQP",
        entity,
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    fn backend(&self) -> TransportBackend {
        TransportBackend::Amqp
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            acknowledgement: true,
            atomic_bulk_send: true,
            topology: true,
        }
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    async fn connect(&self) -> TransportResult<()> {
        self.ensure_connected().await.map(|_| ())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.stop_consumers().await;

        if let Some(publisher) = self.publisher.lock().await.take() {
            publisher.close().await;
        }

        self.channel.lock().await.take();

        if self.client.is_connected() {
            if let Err(e) = self.client.disconnect().await {
                tracing::debug!(error = %e, "Error ignored while disconnecting");
            }
        }

        self.state.set(ConnectionState::Disconnected);

        tracing::info!(
            host = %self.config.host(),
            port = self.config.port(),
            vhost = %self.config.virtual_host(),
            "Disconnect from broker"
        );

        Ok(())
    }

    async fn create_topic(&self, topic: &Topic, binds: &[TopicBind]) -> TransportResult<()> {
        let exchange = self.exchange(topic)?;
        let channel = self.ensure_connected().await?;
        let configurator = AmqpConfigurator::new(channel.as_ref());

        configurator.create_exchange(exchange).await?;
        configurator.bind_exchange(exchange, binds).await
    }

    async fn create_queue(&self, queue: &Queue, binds: &[QueueBind]) -> TransportResult<()> {
        let queue = self.queue(queue)?;
        let channel = self.ensure_connected().await?;
        let configurator = AmqpConfigurator::new(channel.as_ref());

        configurator.create_queue(queue).await?;
        configurator.bind_queue(queue, binds).await
    }

    async fn consume(&self, on_message: MessageHandler, queues: &[Queue]) -> TransportResult<()> {
        let queues = queues
            .iter()
            .map(|queue| self.queue(queue))
            .collect::<TransportResult<Vec<_>>>()?;

        let _guard = self.consume_lock.lock().await;

        let pending: Vec<&AmqpQueue> = queues
            .into_iter()
            .filter(|queue| {
                let consumed = self.consumers.contains_key(queue.name());
                if consumed {
                    tracing::debug!(queue = %queue.name(), "Queue is already consumed");
                }
                !consumed
            })
            .collect();

        if pending.is_empty() {
            return Ok(());
        }

        self.ensure_connected().await?;

        let consume_failed = |source| TransportError::ConsumeFailed {
            queue: pending
                .iter()
                .map(|queue| queue.name())
                .collect::<Vec<_>>()
                .join(", "),
            source,
        };

        let channel = self.client.channel().await.map_err(consume_failed)?;

        channel
            .qos(self.qos.size, self.qos.count, self.qos.global)
            .await
            .map_err(consume_failed)?;

        self.consumer_channels.lock().await.push(channel.clone());

        for queue in pending {
            tracing::info!(
                host = %self.config.host(),
                port = self.config.port(),
                vhost = %self.config.virtual_host(),
                queue = %queue.name(),
                "Starting a subscription"
            );

            let consumer = Arc::new(AmqpConsumer::new(queue.name(), channel.clone()));
            consumer.listen(on_message.clone()).await?;

            tracing::debug!(queue = %queue.name(), consumer_tag = %consumer.tag(), "Consumer started");

            self.consumers.insert(queue.name().to_string(), consumer);
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

        let channel = self.ensure_connected().await?;
        let publisher = self.publisher(channel).await?;

        match packages.as_slice() {
            [package] => publisher.process(package).await,
            packages => publisher.process_bulk(packages).await,
        }
    }
}
