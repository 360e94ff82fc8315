use crate::common::entities::DeliveryDestination;
use crate::common::envelope::encode_package;
use crate::common::package::OutboundPackage;
use crate::error::{TransportError, TransportResult};
use crate::redis::client::RedisClient;
use std::sync::Arc;

/// Publishes JSON envelopes to Redis channels
pub(crate) struct RedisPublisher {
    client: Arc<dyn RedisClient>,
}

impl RedisPublisher {
    pub fn new(client: Arc<dyn RedisClient>) -> Self {
        Self { client }
    }

    pub async fn publish(&self, package: &OutboundPackage) -> TransportResult<()> {
        let channel = match package.destination() {
            DeliveryDestination::Redis(destination) => destination.channel(),
            other => {
                return Err(TransportError::UnsupportedEntity {
                    backend: "Redis",
                    entity: format!("{} destination \"{}\"", other.backend().label(), other),
                })
            }
        };

        let body = encode_package(package)?;

        tracing::debug!(
            trace_id = %package.trace_id(),
            channel = %channel,
            content = %body,
            mandatory = package.is_mandatory(),
            "Publish message"
        );

        let receivers = self
            .client
            .publish(channel, body)
            .await
            .map_err(TransportError::send_failed)?;

        if receivers == 0 && package.is_mandatory() {
            tracing::error!(
                trace_id = %package.trace_id(),
                channel = %channel,
                "Publish message failed: no subscribers received a mandatory message"
            );
        }

        Ok(())
    }

    /// Publish in order and stop at the first failure; packages already sent stay sent
    pub async fn publish_bulk(&self, packages: &[OutboundPackage]) -> TransportResult<()> {
        for package in packages {
            self.publish(package).await?;
        }

        Ok(())
    }
}
