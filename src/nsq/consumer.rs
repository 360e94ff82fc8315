use crate::common::envelope::decode_package_bytes;
use crate::common::package::{IncomingPackage, Settlement};
use crate::common::transport::MessageHandler;
use crate::error::{TransportError, TransportResult};
use crate::nsq::channel::NsqTransportLevelDestination;
use crate::nsq::client::{NsqClient, NsqMessage, NsqResponder};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Subscription to one NSQ topic
pub(crate) struct NsqConsumer {
    topic: String,
    channel: String,
    requeue_delay: Duration,
    client: Arc<dyn NsqClient>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NsqConsumer {
    pub fn new(
        topic: impl Into<String>,
        channel: impl Into<String>,
        requeue_delay: Duration,
        client: Arc<dyn NsqClient>,
    ) -> Self {
        Self {
            topic: topic.into(),
            channel: channel.into(),
            requeue_delay,
            client,
            task: Mutex::new(None),
        }
    }

    pub async fn listen(&self, on_message: MessageHandler) -> TransportResult<()> {
        tracing::debug!(topic = %self.topic, channel = %self.channel, "Creating consumer");

        let mut messages = self
            .client
            .subscribe(&self.topic, &self.channel)
            .await
            .map_err(|e| TransportError::ConsumeFailed {
                queue: self.topic.clone(),
                source: e,
            })?;

        let topic = self.topic.clone();
        let requeue_delay = self.requeue_delay;

        let handle = tokio::spawn(async move {
            while let Some(message) = messages.next().await {
                match incoming_package(&topic, message, requeue_delay) {
                    Ok(package) => {
                        tracing::debug!(
                            topic = %topic,
                            message_id = %package.id(),
                            trace_id = %package.trace_id(),
                            "New message received"
                        );

                        tokio::spawn(on_message(package));
                    }
                    Err(e) => {
                        tracing::error!(topic = %topic, error = %e, "Emit package failed");
                    }
                }
            }
        });

        *self.task.lock().await = Some(handle);

        Ok(())
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
            tracing::debug!(topic = %self.topic, "Subscription canceled");
        }
    }
}

fn incoming_package(
    topic: &str,
    message: NsqMessage,
    requeue_delay: Duration,
) -> TransportResult<IncomingPackage> {
    let (provenance, envelope) = decode_package_bytes(&message.body);

    Ok(IncomingPackage::new(
        provenance.message_id,
        provenance.trace_id,
        NsqTransportLevelDestination::new(topic)?.into(),
        envelope.payload,
        envelope.headers,
        Box::new(NsqSettlement {
            responder: message.responder,
            message_id: message.id,
            requeue_delay,
        }),
    ))
}

/// FIN on ack; REQ or FIN on nack/reject depending on `requeue`
struct NsqSettlement {
    responder: Arc<dyn NsqResponder>,
    message_id: String,
    requeue_delay: Duration,
}

impl NsqSettlement {
    async fn requeue_or_finish(&self, requeue: bool) -> Result<(), crate::error::BrokerError> {
        if requeue {
            self.responder.requeue(&self.message_id, self.requeue_delay).await
        } else {
            self.responder.finish(&self.message_id).await
        }
    }
}

#[async_trait]
impl Settlement for NsqSettlement {
    async fn ack(&self) -> TransportResult<()> {
        self.responder
            .finish(&self.message_id)
            .await
            .map_err(|e| TransportError::AcknowledgeFailed { source: e })
    }

    async fn nack(&self, requeue: bool, reason: Option<&str>) -> TransportResult<()> {
        tracing::debug!(message_id = %self.message_id, requeue, reason = ?reason, "Message not acknowledged");

        self.requeue_or_finish(requeue)
            .await
            .map_err(|e| TransportError::NotAcknowledgeFailed { source: e })
    }

    async fn reject(&self, requeue: bool, reason: Option<&str>) -> TransportResult<()> {
        tracing::debug!(message_id = %self.message_id, requeue, reason = ?reason, "Message rejected");

        self.requeue_or_finish(requeue)
            .await
            .map_err(|e| TransportError::RejectFailed { source: e })
    }
}
