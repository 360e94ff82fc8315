//! Redis pub/sub backend
//!
//! Channels need no declaration and pub/sub has no acknowledgement, so
//! `ack`/`nack`/`reject` succeed without effect and
//! [`TransportCapabilities::acknowledgement`](crate::TransportCapabilities) is `false`.
//! Messages travel as the same JSON envelope NSQ uses.

mod channel;
mod client;
mod config;
mod consumer;
mod memory;
mod publisher;
mod pubsub;
mod transport;

pub use channel::{RedisChannel, RedisTransportLevelDestination};
pub use client::RedisClient;
pub use self::config::RedisConnectionConfiguration;
pub use memory::InMemoryRedisBroker;
pub use pubsub::RedisPubSubClient;
pub use transport::RedisTransport;
