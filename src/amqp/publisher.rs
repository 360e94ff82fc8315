//! AMQP publishing: single messages on the regular channel, batches in a transaction

use crate::amqp::client::{AmqpChannel, AmqpPublish, PERSISTENT_DELIVERY_MODE};
use crate::amqp::destination::AmqpTransportLevelDestination;
use crate::common::entities::DeliveryDestination;
use crate::common::envelope::{HEADER_DELIVERY_MODE, HEADER_EXPIRATION, HEADER_TRACE_ID};
use crate::common::headers::{HeaderValue, Headers};
use crate::common::package::OutboundPackage;
use crate::error::{TransportError, TransportResult};
use std::sync::Arc;

pub(crate) struct AmqpPublisher {
    regular_channel: Arc<dyn AmqpChannel>,
    transaction_channel: Arc<dyn AmqpChannel>,
}

impl AmqpPublisher {
    pub fn new(regular_channel: Arc<dyn AmqpChannel>, transaction_channel: Arc<dyn AmqpChannel>) -> Self {
        Self {
            regular_channel,
            transaction_channel,
        }
    }

    pub async fn process(&self, package: &OutboundPackage) -> TransportResult<()> {
        let message = prepare_message(package)?;

        self.regular_channel
            .publish(message)
            .await
            .map_err(TransportError::send_failed)
    }

    /// Publish every package inside one transaction; on failure nothing is committed
    pub async fn process_bulk(&self, packages: &[OutboundPackage]) -> TransportResult<()> {
        let messages = packages
            .iter()
            .map(prepare_message)
            .collect::<TransportResult<Vec<_>>>()?;

        self.transaction_channel
            .tx_select()
            .await
            .map_err(TransportError::send_failed)?;

        match self.publish_all(messages).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(error = %e, "Bulk publish failed, rolling back transaction");

                if let Err(rollback) = self.transaction_channel.tx_rollback().await {
                    tracing::error!(error = %rollback, "Transaction rollback failed");
                }

                Err(TransportError::send_failed(e))
            }
        }
    }

    /// Close the transaction channel; the regular channel belongs to the transport
    pub async fn close(&self) {
        if let Err(e) = self.transaction_channel.close().await {
            tracing::debug!(error = %e, "Transaction channel close failed");
        }
    }

    async fn publish_all(&self, messages: Vec<AmqpPublish>) -> Result<(), crate::error::BrokerError> {
        for message in messages {
            self.transaction_channel.publish(message).await?;
        }

        self.transaction_channel.tx_commit().await
    }
}

fn destination(package: &OutboundPackage) -> TransportResult<&AmqpTransportLevelDestination> {
    match package.destination() {
        DeliveryDestination::Amqp(destination) => Ok(destination),
        other => Err(TransportError::UnsupportedEntity {
            backend: "AMQP",
            entity: format!("{} destination \"{}\"", other.backend().label(), other),
        }),
    }
}

/// Merge the internal headers with the package headers (package headers win),
/// drop nulls and lift delivery mode and expiration into message properties.
fn prepare_headers(package: &OutboundPackage) -> Headers {
    let mut headers = Headers::new();

    if package.is_persistent() {
        headers.insert(
            HEADER_DELIVERY_MODE.to_string(),
            HeaderValue::Int(i64::from(PERSISTENT_DELIVERY_MODE)),
        );
    }

    if let Some(ttl) = package.expired_after() {
        headers.insert(
            HEADER_EXPIRATION.to_string(),
            HeaderValue::String(ttl.as_millis().to_string()),
        );
    }

    headers.insert(
        HEADER_TRACE_ID.to_string(),
        HeaderValue::String(package.trace_id().to_string()),
    );

    headers.extend(package.headers().clone());
    headers.retain(|_, value| !value.is_null());
    headers
}

fn prepare_message(package: &OutboundPackage) -> TransportResult<AmqpPublish> {
    let destination = destination(package)?;
    let mut headers = prepare_headers(package);

    let delivery_mode = headers
        .remove(HEADER_DELIVERY_MODE)
        .and_then(|value| match value {
            HeaderValue::Int(mode) => u8::try_from(mode).ok(),
            HeaderValue::String(mode) => mode.parse().ok(),
            _ => None,
        });

    let expiration = headers
        .remove(HEADER_EXPIRATION)
        .map(|value| value.to_string());

    tracing::debug!(
        trace_id = %package.trace_id(),
        exchange = %destination.exchange(),
        routing_key = %destination.routing_key().unwrap_or_default(),
        mandatory = package.is_mandatory(),
        immediate = package.is_immediate(),
        expiration = ?expiration,
        "Publish message"
    );

    Ok(AmqpPublish {
        exchange: destination.exchange().to_string(),
        routing_key: destination.routing_key().unwrap_or_default().to_string(),
        body: package.payload().to_vec(),
        headers,
        delivery_mode,
        expiration,
        mandatory: package.is_mandatory(),
        immediate: package.is_immediate(),
    })
}
