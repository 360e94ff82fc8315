//! AMQP queue declaration

use crate::amqp::exchange::{
    validate_name, AmqpExchange, AMQP_AUTO_DELETE, AMQP_DURABLE, AMQP_EXCLUSIVE, AMQP_PASSIVE,
};
use crate::common::headers::{Arguments, HeaderValue};
use crate::error::{TransportError, TransportResult};

/// An AMQP queue
#[derive(Debug, Clone, PartialEq)]
pub struct AmqpQueue {
    name: String,
    passive: bool,
    durable: bool,
    exclusive: bool,
    auto_delete: bool,
    arguments: Arguments,
}

impl AmqpQueue {
    /// Non-durable classic queue
    pub fn default(name: impl Into<String>) -> TransportResult<Self> {
        let name = name.into();
        validate_name(&name).map_err(TransportError::InvalidQueueName)?;

        Ok(Self {
            name,
            passive: false,
            durable: false,
            exclusive: false,
            auto_delete: false,
            arguments: Arguments::new(),
        })
    }

    /// Durable queue whose expired messages are dead-lettered to `exchange`
    pub fn delayed(name: impl Into<String>, exchange: &AmqpExchange) -> TransportResult<Self> {
        let mut arguments = Arguments::new();
        arguments.insert(
            "x-dead-letter-exchange".to_string(),
            HeaderValue::from(exchange.name()),
        );

        Ok(Self::default(name)?.make_durable().with_arguments(arguments))
    }

    /// Durable replicated quorum queue
    pub fn quorum(name: impl Into<String>) -> TransportResult<Self> {
        let mut arguments = Arguments::new();
        arguments.insert("x-queue-type".to_string(), HeaderValue::from("quorum"));

        Ok(Self::default(name)?.make_durable().with_arguments(arguments))
    }

    pub fn make_passive(mut self) -> Self {
        self.passive = true;
        self
    }

    pub fn make_durable(mut self) -> Self {
        self.durable = true;
        self
    }

    pub fn make_exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn enable_auto_delete(mut self) -> Self {
        self.auto_delete = true;
        self
    }

    pub fn with_arguments(mut self, arguments: Arguments) -> Self {
        self.arguments.extend(arguments);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_passive(&self) -> bool {
        self.passive
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn is_auto_delete(&self) -> bool {
        self.auto_delete
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    pub fn flags(&self) -> u32 {
        [
            (self.durable, AMQP_DURABLE),
            (self.passive, AMQP_PASSIVE),
            (self.exclusive, AMQP_EXCLUSIVE),
            (self.auto_delete, AMQP_AUTO_DELETE),
        ]
        .iter()
        .filter(|(enabled, _)| *enabled)
        .fold(0, |flags, (_, bit)| flags | bit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NameViolation;

    #[test]
    fn test_all_flags() {
        let queue = AmqpQueue::default("q")
            .unwrap()
            .make_durable()
            .make_passive()
            .enable_auto_delete()
            .make_exclusive();

        assert_eq!(queue.flags(), 30);
    }

    #[test]
    fn test_repeated_builders_keep_flags() {
        let queue = AmqpQueue::default("q")
            .unwrap()
            .make_durable()
            .make_durable()
            .make_exclusive()
            .make_exclusive();

        assert_eq!(queue.flags(), AMQP_DURABLE | AMQP_EXCLUSIVE);
    }

    #[test]
    fn test_invalid_names() {
        assert!(matches!(
            AmqpQueue::default(""),
            Err(TransportError::InvalidQueueName(NameViolation::Empty))
        ));
        assert!(matches!(
            AmqpQueue::quorum("q".repeat(300)),
            Err(TransportError::InvalidQueueName(NameViolation::TooLong { length: 300 }))
        ));
        assert!(AmqpQueue::default("q".repeat(255)).is_ok());
    }

    #[test]
    fn test_delayed_queue() {
        let exchange = AmqpExchange::direct("target").unwrap();
        let queue = AmqpQueue::delayed("waiting", &exchange).unwrap();

        assert!(queue.is_durable());
        assert_eq!(
            queue.arguments().get("x-dead-letter-exchange"),
            Some(&HeaderValue::from("target"))
        );
    }

    #[test]
    fn test_quorum_queue() {
        let queue = AmqpQueue::quorum("replicated").unwrap();

        assert!(queue.is_durable());
        assert_eq!(queue.flags(), AMQP_DURABLE);
        assert_eq!(
            queue.arguments().get("x-queue-type"),
            Some(&HeaderValue::from("quorum"))
        );
    }
}
