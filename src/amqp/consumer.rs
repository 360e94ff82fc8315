//! AMQP consumer and delivery settlement

use crate::amqp::client::{AmqpChannel, AmqpDelivery};
use crate::amqp::destination::AmqpTransportLevelDestination;
use crate::common::envelope::Provenance;
use crate::common::package::{IncomingPackage, Settlement};
use crate::common::transport::MessageHandler;
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// One subscription to one queue
pub(crate) struct AmqpConsumer {
    queue: String,
    tag: String,
    channel: Arc<dyn AmqpChannel>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AmqpConsumer {
    pub fn new(queue: impl Into<String>, channel: Arc<dyn AmqpChannel>) -> Self {
        Self {
            queue: queue.into(),
            tag: Uuid::new_v4().simple().to_string(),
            channel,
            task: Mutex::new(None),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Start the subscription and dispatch every delivery to `on_message`
    pub async fn listen(&self, on_message: MessageHandler) -> TransportResult<()> {
        tracing::debug!(queue = %self.queue, consumer_tag = %self.tag, "Creating consumer");

        let mut deliveries = self
            .channel
            .consume(&self.queue, &self.tag)
            .await
            .map_err(|e| TransportError::ConsumeFailed {
                queue: self.queue.clone(),
                source: e,
            })?;

        let queue = self.queue.clone();
        let channel = self.channel.clone();

        let handle = tokio::spawn(async move {
            while let Some(delivery) = deliveries.next().await {
                match delivery {
                    Ok(delivery) => {
                        let package = incoming_package(delivery, channel.clone());

                        tracing::debug!(
                            queue = %queue,
                            message_id = %package.id(),
                            trace_id = %package.trace_id(),
                            payload = %package.payload_str(),
                            "New message received"
                        );

                        // Handlers run detached so the next delivery is not held back
                        tokio::spawn(on_message(package));
                    }
                    Err(e) => {
                        tracing::error!(queue = %queue, error = %e, "Failed to receive message");
                    }
                }
            }

            tracing::debug!(queue = %queue, "Delivery stream closed");
        });

        *self.task.lock().await = Some(handle);

        Ok(())
    }

    /// Cancel the subscription; a broker error here is logged and ignored
    pub async fn stop(&self) {
        if let Err(e) = self.channel.cancel(&self.tag).await {
            tracing::warn!(queue = %self.queue, consumer_tag = %self.tag, error = %e, "Consumer cancel failed");
        }

        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }

        tracing::debug!(queue = %self.queue, consumer_tag = %self.tag, "Subscription canceled");
    }
}

fn incoming_package(delivery: AmqpDelivery, channel: Arc<dyn AmqpChannel>) -> IncomingPackage {
    let AmqpDelivery {
        delivery_tag,
        exchange,
        routing_key,
        body,
        mut headers,
        ..
    } = delivery;

    let provenance = Provenance::extract(&mut headers);

    IncomingPackage::new(
        provenance.message_id,
        provenance.trace_id,
        AmqpTransportLevelDestination::from_delivery(exchange, routing_key).into(),
        body,
        headers,
        Box::new(AmqpSettlement {
            channel,
            delivery_tag,
        }),
    )
}

/// Acknowledgement routed back over the channel the message arrived on
struct AmqpSettlement {
    channel: Arc<dyn AmqpChannel>,
    delivery_tag: u64,
}

#[async_trait]
impl Settlement for AmqpSettlement {
    async fn ack(&self) -> TransportResult<()> {
        self.channel
            .ack(self.delivery_tag)
            .await
            .map_err(|e| TransportError::AcknowledgeFailed { source: e })
    }

    async fn nack(&self, requeue: bool, reason: Option<&str>) -> TransportResult<()> {
        if let Some(reason) = reason {
            tracing::debug!(delivery_tag = self.delivery_tag, reason = %reason, "Message not acknowledged");
        }

        self.channel
            .nack(self.delivery_tag, false, requeue)
            .await
            .map_err(|e| TransportError::NotAcknowledgeFailed { source: e })
    }

    async fn reject(&self, requeue: bool, reason: Option<&str>) -> TransportResult<()> {
        if let Some(reason) = reason {
            tracing::debug!(delivery_tag = self.delivery_tag, reason = %reason, "Message rejected");
        }

        self.channel
            .reject(self.delivery_tag, requeue)
            .await
            .map_err(|e| TransportError::RejectFailed { source: e })
    }
}
