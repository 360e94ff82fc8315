use crate::common::envelope::decode_package;
use crate::common::package::{IncomingPackage, Settlement};
use crate::common::transport::MessageHandler;
use crate::error::{TransportError, TransportResult};
use crate::redis::channel::RedisTransportLevelDestination;
use crate::redis::client::RedisClient;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Subscription to one Redis channel
pub(crate) struct RedisConsumer {
    channel: String,
    client: Arc<dyn RedisClient>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RedisConsumer {
    pub fn new(channel: impl Into<String>, client: Arc<dyn RedisClient>) -> Self {
        Self {
            channel: channel.into(),
            client,
            task: Mutex::new(None),
        }
    }

    pub async fn listen(&self, on_message: MessageHandler) -> TransportResult<()> {
        tracing::debug!(channel = %self.channel, "Creating consumer");

        let mut messages = self
            .client
            .subscribe(&self.channel)
            .await
            .map_err(|e| TransportError::ConsumeFailed {
                queue: self.channel.clone(),
                source: e,
            })?;

        let channel = self.channel.clone();

        let handle = tokio::spawn(async move {
            while let Some(message) = messages.next().await {
                match incoming_package(&channel, &message) {
                    Ok(package) => {
                        tracing::debug!(
                            channel = %channel,
                            message_id = %package.id(),
                            trace_id = %package.trace_id(),
                            "New message received"
                        );

                        tokio::spawn(on_message(package));
                    }
                    Err(e) => {
                        tracing::error!(channel = %channel, error = %e, "Emit package failed");
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
            tracing::debug!(channel = %self.channel, "Subscription canceled");
        }
    }
}

fn incoming_package(channel: &str, message: &str) -> TransportResult<IncomingPackage> {
    let (provenance, envelope) = decode_package(message);

    Ok(IncomingPackage::new(
        provenance.message_id,
        provenance.trace_id,
        RedisTransportLevelDestination::new(channel)?.into(),
        envelope.payload,
        envelope.headers,
        Box::new(NoSettlement),
    ))
}

/// Redis pub/sub has no delivery acknowledgement; every disposition succeeds without effect
struct NoSettlement;

#[async_trait]
impl Settlement for NoSettlement {
    async fn ack(&self) -> TransportResult<()> {
        Ok(())
    }

    async fn nack(&self, _requeue: bool, _reason: Option<&str>) -> TransportResult<()> {
        Ok(())
    }

    async fn reject(&self, _requeue: bool, _reason: Option<&str>) -> TransportResult<()> {
        Ok(())
    }

    fn supports_acknowledgement(&self) -> bool {
        false
    }
}
