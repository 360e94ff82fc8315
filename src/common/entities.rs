//! Addressable broker entities and delivery destinations
//!
//! Each type is a closed enum over the supported backends. A transport accepts
//! only the variants of its own backend.

use crate::amqp::{AmqpExchange, AmqpQueue, AmqpTransportLevelDestination};
use crate::common::headers::Arguments;
use crate::nsq::{NsqChannel, NsqTransportLevelDestination};
use crate::redis::{RedisChannel, RedisTransportLevelDestination};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumString};

/// Supported broker backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TransportBackend {
    Amqp,
    Nsq,
    Redis,
}

impl TransportBackend {
    pub fn label(&self) -> &'static str {
        match self {
            TransportBackend::Amqp => "AMQP",
            TransportBackend::Nsq => "NSQ",
            TransportBackend::Redis => "Redis",
        }
    }
}

/// Named routing point a message is published to
#[derive(Debug, Clone, PartialEq)]
pub enum Topic {
    Amqp(AmqpExchange),
    Nsq(NsqChannel),
    Redis(RedisChannel),
}

impl Topic {
    pub fn name(&self) -> &str {
        match self {
            Topic::Amqp(exchange) => exchange.name(),
            Topic::Nsq(channel) => channel.name(),
            Topic::Redis(channel) => channel.name(),
        }
    }

    pub fn backend(&self) -> TransportBackend {
        match self {
            Topic::Amqp(_) => TransportBackend::Amqp,
            Topic::Nsq(_) => TransportBackend::Nsq,
            Topic::Redis(_) => TransportBackend::Redis,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<AmqpExchange> for Topic {
    fn from(exchange: AmqpExchange) -> Self {
        Topic::Amqp(exchange)
    }
}

impl From<NsqChannel> for Topic {
    fn from(channel: NsqChannel) -> Self {
        Topic::Nsq(channel)
    }
}

impl From<RedisChannel> for Topic {
    fn from(channel: RedisChannel) -> Self {
        Topic::Redis(channel)
    }
}

/// Named holding area messages are consumed from
#[derive(Debug, Clone, PartialEq)]
pub enum Queue {
    Amqp(AmqpQueue),
    Nsq(NsqChannel),
    Redis(RedisChannel),
}

impl Queue {
    pub fn name(&self) -> &str {
        match self {
            Queue::Amqp(queue) => queue.name(),
            Queue::Nsq(channel) => channel.name(),
            Queue::Redis(channel) => channel.name(),
        }
    }

    pub fn backend(&self) -> TransportBackend {
        match self {
            Queue::Amqp(_) => TransportBackend::Amqp,
            Queue::Nsq(_) => TransportBackend::Nsq,
            Queue::Redis(_) => TransportBackend::Redis,
        }
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<AmqpQueue> for Queue {
    fn from(queue: AmqpQueue) -> Self {
        Queue::Amqp(queue)
    }
}

impl From<NsqChannel> for Queue {
    fn from(channel: NsqChannel) -> Self {
        Queue::Nsq(channel)
    }
}

impl From<RedisChannel> for Queue {
    fn from(channel: RedisChannel) -> Self {
        Queue::Redis(channel)
    }
}

/// Where an outbound message is routed, or where an inbound one came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryDestination {
    Amqp(AmqpTransportLevelDestination),
    Nsq(NsqTransportLevelDestination),
    Redis(RedisTransportLevelDestination),
}

impl DeliveryDestination {
    pub fn backend(&self) -> TransportBackend {
        match self {
            DeliveryDestination::Amqp(_) => TransportBackend::Amqp,
            DeliveryDestination::Nsq(_) => TransportBackend::Nsq,
            DeliveryDestination::Redis(_) => TransportBackend::Redis,
        }
    }
}

impl fmt::Display for DeliveryDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryDestination::Amqp(destination) => match destination.routing_key() {
                Some(routing_key) => write!(f, "{}:{}", destination.exchange(), routing_key),
                None => f.write_str(destination.exchange()),
            },
            DeliveryDestination::Nsq(destination) => f.write_str(destination.channel()),
            DeliveryDestination::Redis(destination) => f.write_str(destination.channel()),
        }
    }
}

impl From<AmqpTransportLevelDestination> for DeliveryDestination {
    fn from(destination: AmqpTransportLevelDestination) -> Self {
        DeliveryDestination::Amqp(destination)
    }
}

impl From<NsqTransportLevelDestination> for DeliveryDestination {
    fn from(destination: NsqTransportLevelDestination) -> Self {
        DeliveryDestination::Nsq(destination)
    }
}

impl From<RedisTransportLevelDestination> for DeliveryDestination {
    fn from(destination: RedisTransportLevelDestination) -> Self {
        DeliveryDestination::Redis(destination)
    }
}

/// Link from a topic to another topic
#[derive(Debug, Clone, PartialEq)]
pub struct TopicBind {
    pub destination_topic: Topic,
    pub routing_key: Option<String>,
}

impl TopicBind {
    pub fn new(destination_topic: impl Into<Topic>, routing_key: Option<String>) -> Self {
        Self {
            destination_topic: destination_topic.into(),
            routing_key,
        }
    }
}

/// Link from a queue to a topic
#[derive(Debug, Clone, PartialEq)]
pub struct QueueBind {
    pub destination_topic: Topic,
    pub routing_key: Option<String>,
    pub arguments: Arguments,
}

impl QueueBind {
    pub fn new(destination_topic: impl Into<Topic>, routing_key: Option<String>) -> Self {
        Self {
            destination_topic: destination_topic.into(),
            routing_key,
            arguments: Arguments::new(),
        }
    }

    pub fn with_arguments(mut self, arguments: Arguments) -> Self {
        self.arguments.extend(arguments);
        self
    }
}
