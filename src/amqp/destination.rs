use crate::error::{TransportError, TransportResult};

/// Exchange and routing key a message is published to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AmqpTransportLevelDestination {
    exchange: String,
    routing_key: Option<String>,
}

impl AmqpTransportLevelDestination {
    pub fn new(exchange: impl Into<String>, routing_key: Option<String>) -> TransportResult<Self> {
        let exchange = exchange.into();

        if exchange.is_empty() {
            return Err(TransportError::IncorrectDestinationExchange);
        }

        Ok(Self {
            exchange,
            routing_key: routing_key.filter(|key| !key.is_empty()),
        })
    }

    /// Origin of a delivery as reported by the broker; the exchange may be
    /// empty for messages published to the default exchange.
    pub(crate) fn from_delivery(exchange: String, routing_key: String) -> Self {
        Self {
            exchange,
            routing_key: Some(routing_key).filter(|key| !key.is_empty()),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> Option<&str> {
        self.routing_key.as_deref()
    }
}
