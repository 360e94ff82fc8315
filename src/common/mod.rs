//! Backend-independent building blocks: entities, packages, envelope and the transport contract

pub(crate) mod dsn;
pub mod entities;
pub mod envelope;
pub mod headers;
pub mod package;
pub mod transport;

pub use entities::{DeliveryDestination, Queue, QueueBind, Topic, TopicBind, TransportBackend};
pub use envelope::{Provenance, HEADER_MESSAGE_ID, HEADER_TRACE_ID};
pub use headers::{Arguments, HeaderValue, Headers};
pub use package::{IncomingPackage, OutboundPackage, Settlement};
pub use transport::{
    message_handler, ConnectionState, MessageHandler, Transport, TransportCapabilities,
};
