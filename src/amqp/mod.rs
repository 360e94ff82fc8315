//! AMQP 0.9.1 (RabbitMQ) backend
//!
//! Exchanges, queues and binds are declared on the broker before use. Multi-package
//! sends run inside a channel transaction, so either every package is published or
//! none is. Message id and trace id travel as native headers.
//!
//! # Example
//!
//! ```no_run
//! use service_bus_transport::amqp::{
//!     AmqpConnectionConfiguration, AmqpExchange, AmqpQoSConfiguration, AmqpQueue,
//!     AmqpTransport, AmqpTransportLevelDestination, InMemoryAmqpBroker,
//! };
//! use service_bus_transport::{Headers, OutboundPackage, QueueBind, Queue, Topic, Transport};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = AmqpTransport::new(
//!     Arc::new(InMemoryAmqpBroker::new()),
//!     AmqpConnectionConfiguration::localhost(),
//!     AmqpQoSConfiguration::default(),
//! );
//!
//! let exchange = AmqpExchange::direct("orders")?.make_durable();
//! transport.create_topic(&Topic::Amqp(exchange.clone()), &[]).await?;
//! transport
//!     .create_queue(
//!         &Queue::Amqp(AmqpQueue::default("orders.created")?),
//!         &[QueueBind::new(exchange, Some("created".to_string()))],
//!     )
//!     .await?;
//!
//! let destination = AmqpTransportLevelDestination::new("orders", Some("created".to_string()))?;
//! transport
//!     .send(vec![OutboundPackage::new("{}", Headers::new(), destination).persistent()])
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod configurator;
mod consumer;
mod destination;
mod exchange;
mod memory;
mod publisher;
mod queue;
mod transport;

pub use client::{AmqpChannel, AmqpClient, AmqpDelivery, AmqpPublish, PERSISTENT_DELIVERY_MODE};
pub use self::config::{AmqpConnectionConfiguration, AmqpQoSConfiguration};
pub use destination::AmqpTransportLevelDestination;
pub use exchange::{
    AmqpExchange, AmqpExchangeType, AMQP_AUTO_DELETE, AMQP_DURABLE, AMQP_EXCLUSIVE, AMQP_PASSIVE,
    MAX_NAME_LENGTH,
};
pub use memory::{InMemoryAmqpBroker, InMemoryAmqpChannel};
pub use queue::AmqpQueue;
pub use transport::AmqpTransport;
