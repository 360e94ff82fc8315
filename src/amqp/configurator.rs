//! Topology declaration: declare first, then bind

use crate::amqp::client::AmqpChannel;
use crate::amqp::exchange::AmqpExchange;
use crate::amqp::queue::AmqpQueue;
use crate::common::entities::{QueueBind, Topic, TopicBind};
use crate::error::{TransportError, TransportResult};

pub(crate) struct AmqpConfigurator<'a> {
    channel: &'a dyn AmqpChannel,
}

impl<'a> AmqpConfigurator<'a> {
    pub fn new(channel: &'a dyn AmqpChannel) -> Self {
        Self { channel }
    }

    pub async fn create_exchange(&self, exchange: &AmqpExchange) -> TransportResult<()> {
        tracing::debug!(
            exchange = %exchange.name(),
            exchange_type = %exchange.exchange_type(),
            flags = exchange.flags(),
            "Creating exchange"
        );

        self.channel.exchange_declare(exchange).await.map_err(|e| {
            tracing::error!(exchange = %exchange.name(), error = %e, "Exchange declaration failed");
            TransportError::CreateTopicFailed { source: e }
        })
    }

    /// Declare every bind's destination exchange and route `exchange` into it
    pub async fn bind_exchange(&self, exchange: &AmqpExchange, binds: &[TopicBind]) -> TransportResult<()> {
        for bind in binds {
            let destination = bind_target(&bind.destination_topic)?;
            let routing_key = bind.routing_key.as_deref().unwrap_or_default();

            self.create_exchange(destination).await.map_err(bind_failed)?;

            tracing::debug!(
                source = %exchange.name(),
                destination = %destination.name(),
                routing_key = %routing_key,
                "Linking exchange to exchange"
            );

            self.channel
                .exchange_bind(destination.name(), exchange.name(), routing_key)
                .await
                .map_err(|e| {
                    tracing::error!(exchange = %exchange.name(), error = %e, "Exchange bind failed");
                    TransportError::BindFailed { source: e }
                })?;
        }

        Ok(())
    }

    pub async fn create_queue(&self, queue: &AmqpQueue) -> TransportResult<()> {
        tracing::debug!(queue = %queue.name(), flags = queue.flags(), "Creating queue");

        self.channel.queue_declare(queue).await.map_err(|e| {
            tracing::error!(queue = %queue.name(), error = %e, "Queue declaration failed");
            TransportError::CreateQueueFailed { source: e }
        })
    }

    /// Declare every bind's destination exchange and link `queue` to it
    pub async fn bind_queue(&self, queue: &AmqpQueue, binds: &[QueueBind]) -> TransportResult<()> {
        for bind in binds {
            let exchange = bind_target(&bind.destination_topic)?;
            let routing_key = bind.routing_key.as_deref().unwrap_or_default();

            self.create_exchange(exchange).await.map_err(bind_failed)?;

            tracing::debug!(
                queue = %queue.name(),
                exchange = %exchange.name(),
                routing_key = %routing_key,
                "Linking queue to exchange"
            );

            self.channel
                .queue_bind(queue.name(), exchange.name(), routing_key, &bind.arguments)
                .await
                .map_err(|e| {
                    tracing::error!(queue = %queue.name(), error = %e, "Queue bind failed");
                    TransportError::BindFailed { source: e }
                })?;
        }

        Ok(())
    }
}

fn bind_target(topic: &Topic) -> TransportResult<&AmqpExchange> {
    match topic {
        Topic::Amqp(exchange) => Ok(exchange),
        other => Err(TransportError::UnsupportedEntity {
            backend: "AMQP",
            entity: format!("{} topic \"{}\"", other.backend().label(), other.name()),
        }),
    }
}

fn bind_failed(error: TransportError) -> TransportError {
    TransportError::BindFailed {
        source: Box::new(error),
    }
}
