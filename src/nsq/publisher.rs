use crate::common::entities::DeliveryDestination;
use crate::common::envelope::encode_package;
use crate::common::package::OutboundPackage;
use crate::error::{TransportError, TransportResult};
use crate::nsq::client::NsqClient;
use std::sync::Arc;

/// Publishes JSON envelopes to NSQ topics
pub(crate) struct NsqPublisher {
    client: Arc<dyn NsqClient>,
}

impl NsqPublisher {
    pub fn new(client: Arc<dyn NsqClient>) -> Self {
        Self { client }
    }

    pub async fn publish(&self, package: &OutboundPackage) -> TransportResult<()> {
        let topic = match package.destination() {
            DeliveryDestination::Nsq(destination) => destination.channel(),
            other => {
                return Err(TransportError::UnsupportedEntity {
                    backend: "NSQ",
                    entity: format!("{} destination \"{}\"", other.backend().label(), other),
                })
            }
        };

        let body = encode_package(package)?;

        tracing::debug!(
            trace_id = %package.trace_id(),
            topic = %topic,
            mandatory = package.is_mandatory(),
            "Publish message"
        );

        self.client
            .publish(topic, body.into_bytes())
            .await
            .map_err(|e| {
                if package.is_mandatory() {
                    tracing::error!(trace_id = %package.trace_id(), topic = %topic, error = %e, "Publish message failed");
                }
                TransportError::send_failed(e)
            })
    }

    /// Publish in order and stop at the first failure; packages already sent stay sent
    pub async fn publish_bulk(&self, packages: &[OutboundPackage]) -> TransportResult<()> {
        for package in packages {
            self.publish(package).await?;
        }

        Ok(())
    }
}
