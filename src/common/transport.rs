//! Transport contract shared by every backend

use crate::common::entities::{Queue, QueueBind, Topic, TopicBind, TransportBackend};
use crate::common::package::{IncomingPackage, OutboundPackage};
use crate::error::{BrokerError, TransportError, TransportResult};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;

/// Callback invoked for every received message
pub type MessageHandler = Arc<dyn Fn(IncomingPackage) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`]
pub fn message_handler<F, Fut>(handler: F) -> MessageHandler
where
    F: Fn(IncomingPackage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |package| Box::pin(handler(package)))
}

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Delivery guarantees a backend provides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCapabilities {
    /// ack/nack/reject reach the broker
    pub acknowledgement: bool,
    /// a multi-package send is all-or-nothing
    pub atomic_bulk_send: bool,
    /// exchanges, queues and binds are declared on the broker
    pub topology: bool,
}

/// Uniform facade over a message broker
#[async_trait]
pub trait Transport: Send + Sync {
    fn backend(&self) -> TransportBackend;

    fn capabilities(&self) -> TransportCapabilities;

    fn state(&self) -> ConnectionState;

    /// Open the broker connection; no-op when already connected
    async fn connect(&self) -> TransportResult<()>;

    /// Stop every consumer and close the connection. Teardown errors are logged, not returned.
    async fn disconnect(&self) -> TransportResult<()>;

    /// Declare a topic and bind it to each destination topic
    async fn create_topic(&self, topic: &Topic, binds: &[TopicBind]) -> TransportResult<()>;

    /// Declare a queue and bind it to each destination topic
    async fn create_queue(&self, queue: &Queue, binds: &[QueueBind]) -> TransportResult<()>;

    /// Start consuming the given queues; queues already consumed are skipped
    async fn consume(&self, on_message: MessageHandler, queues: &[Queue]) -> TransportResult<()>;

    /// Stop consuming and disconnect
    async fn stop(&self) -> TransportResult<()>;

    /// Publish packages; see [`TransportCapabilities::atomic_bulk_send`] for multi-package semantics
    async fn send(&self, packages: Vec<OutboundPackage>) -> TransportResult<()>;
}

/// Shared, lock-protected connection state
#[derive(Debug, Clone)]
pub(crate) struct StateCell {
    inner: Arc<RwLock<ConnectionState>>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ConnectionState::Disconnected)),
        }
    }

    pub fn get(&self) -> ConnectionState {
        *self.inner.read()
    }

    pub fn set(&self, state: ConnectionState) {
        *self.inner.write() = state;
    }
}

/// Run a connect future under the configured timeout
pub(crate) async fn connect_with_timeout<F, T>(timeout: Duration, connect: F) -> Result<T, BrokerError>
where
    F: Future<Output = Result<T, BrokerError>>,
{
    match tokio::time::timeout(timeout, connect).await {
        Ok(result) => result,
        Err(_) => Err(format!("connection timed out after {:?}", timeout).into()),
    }
}

/// Fail with `UnsupportedEntity` unless every package targets `backend`
pub(crate) fn ensure_destinations(
    packages: &[OutboundPackage],
    backend: TransportBackend,
) -> TransportResult<()> {
    match packages
        .iter()
        .map(OutboundPackage::destination)
        .find(|destination| destination.backend() != backend)
    {
        Some(foreign) => Err(TransportError::UnsupportedEntity {
            backend: backend.label(),
            entity: format!("{} destination \"{}\"", foreign.backend().label(), foreign),
        }),
        None => Ok(()),
    }
}
