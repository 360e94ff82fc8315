//! Uniform transport layer over AMQP, NSQ and Redis pub/sub.
//!
//! A [`Transport`] connects to one broker, declares topology where the broker has
//! any, consumes queues into a [`MessageHandler`] and publishes
//! [`OutboundPackage`]s. Backends differ in what they guarantee; query
//! [`Transport::capabilities`] instead of assuming:
//!
//! | backend | acknowledgement | atomic bulk send | topology |
//! |---------|-----------------|------------------|----------|
//! | AMQP    | yes             | yes (tx channel) | yes      |
//! | NSQ     | yes             | no               | no       |
//! | Redis   | no              | no               | no       |
//!
//! Wire protocols sit behind the [`amqp::AmqpClient`], [`nsq::NsqClient`] and
//! [`redis::RedisClient`] traits. The crate ships a `redis`-crate client and
//! in-memory brokers for all three backends.

pub mod amqp;
pub mod common;
pub mod config;
pub mod error;
pub mod factory;
pub mod nsq;
pub mod redis;

pub use common::{
    message_handler, Arguments, ConnectionState, DeliveryDestination, HeaderValue, Headers,
    IncomingPackage, MessageHandler, OutboundPackage, Provenance, Queue, QueueBind, Settlement,
    Topic, TopicBind, Transport, TransportBackend, TransportCapabilities, HEADER_MESSAGE_ID,
    HEADER_TRACE_ID,
};
pub use crate::config::TransportConfig;
pub use error::{BrokerError, TransportError, TransportResult};
pub use factory::{create_in_memory_transport, create_transport, BrokerClient};
