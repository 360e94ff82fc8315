//! NSQ backend
//!
//! Topics and channels come into existence on first use, so topology calls are
//! no-ops. Messages travel as a JSON envelope carrying the payload and headers.
//! Every consumer subscribes through the same NSQ channel, `service-bus` by default,
//! which load-balances a topic between service instances.

mod channel;
mod client;
mod config;
mod consumer;
mod memory;
mod publisher;
mod transport;

pub use channel::{NsqChannel, NsqTransportLevelDestination};
pub use client::{NsqClient, NsqMessage, NsqResponder};
pub use self::config::NsqConnectionConfiguration;
pub use memory::InMemoryNsqBroker;
pub use transport::{NsqConsumerOptions, NsqTransport, DEFAULT_CONSUMER_CHANNEL, DEFAULT_REQUEUE_DELAY};
