//! AMQP exchange declaration

use crate::common::headers::{Arguments, HeaderValue};
use crate::error::{NameViolation, TransportError, TransportResult};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Flag bit: survives a broker restart
pub const AMQP_DURABLE: u32 = 2;
/// Flag bit: assert existence without creating
pub const AMQP_PASSIVE: u32 = 4;
/// Flag bit: used by one connection only
pub const AMQP_EXCLUSIVE: u32 = 8;
/// Flag bit: deleted once the last consumer leaves
pub const AMQP_AUTO_DELETE: u32 = 16;

/// Longest entity name the broker accepts, in bytes
pub const MAX_NAME_LENGTH: usize = 255;

pub(crate) fn validate_name(name: &str) -> Result<(), NameViolation> {
    if name.is_empty() {
        return Err(NameViolation::Empty);
    }

    if name.len() > MAX_NAME_LENGTH {
        return Err(NameViolation::TooLong { length: name.len() });
    }

    Ok(())
}

/// Exchange routing algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
pub enum AmqpExchangeType {
    #[strum(serialize = "fanout")]
    #[serde(rename = "fanout")]
    Fanout,
    #[strum(serialize = "direct")]
    #[serde(rename = "direct")]
    Direct,
    #[strum(serialize = "topic")]
    #[serde(rename = "topic")]
    Topic,
    #[strum(serialize = "headers")]
    #[serde(rename = "headers")]
    Headers,
    /// Provided by the delayed message exchange plugin
    #[strum(serialize = "x-delayed-message")]
    #[serde(rename = "x-delayed-message")]
    Delayed,
}

/// An AMQP exchange.
///
/// Builders take `self` and return the updated value; applying one twice
/// leaves the flags unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct AmqpExchange {
    name: String,
    exchange_type: AmqpExchangeType,
    passive: bool,
    durable: bool,
    arguments: Arguments,
}

impl AmqpExchange {
    pub fn new(name: impl Into<String>, exchange_type: AmqpExchangeType) -> TransportResult<Self> {
        let name = name.into();
        validate_name(&name).map_err(TransportError::InvalidExchangeName)?;

        Ok(Self {
            name,
            exchange_type,
            passive: false,
            durable: false,
            arguments: Arguments::new(),
        })
    }

    pub fn fanout(name: impl Into<String>) -> TransportResult<Self> {
        Self::new(name, AmqpExchangeType::Fanout)
    }

    pub fn direct(name: impl Into<String>) -> TransportResult<Self> {
        Self::new(name, AmqpExchangeType::Direct)
    }

    pub fn topic(name: impl Into<String>) -> TransportResult<Self> {
        Self::new(name, AmqpExchangeType::Topic)
    }

    pub fn headers(name: impl Into<String>) -> TransportResult<Self> {
        Self::new(name, AmqpExchangeType::Headers)
    }

    /// Durable delayed-message exchange routing like `direct` once the delay elapses
    pub fn delayed(name: impl Into<String>) -> TransportResult<Self> {
        let mut arguments = Arguments::new();
        arguments.insert("x-delayed-type".to_string(), HeaderValue::from("direct"));

        Ok(Self::new(name, AmqpExchangeType::Delayed)?
            .make_durable()
            .with_arguments(arguments))
    }

    pub fn make_passive(mut self) -> Self {
        self.passive = true;
        self
    }

    pub fn make_durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Merge declaration arguments; later keys win
    pub fn with_arguments(mut self, arguments: Arguments) -> Self {
        self.arguments.extend(arguments);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exchange_type(&self) -> AmqpExchangeType {
        self.exchange_type
    }

    pub fn is_passive(&self) -> bool {
        self.passive
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    pub fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.durable {
            flags |= AMQP_DURABLE;
        }
        if self.passive {
            flags |= AMQP_PASSIVE;
        }
        flags
    }
}
