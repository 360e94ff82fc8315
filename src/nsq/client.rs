//! Boundary to the NSQ wire client

use crate::error::BrokerError;
use crate::nsq::config::NsqConnectionConfiguration;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Responds to nsqd about an in-flight message
#[async_trait]
pub trait NsqResponder: Send + Sync {
    /// FIN
    async fn finish(&self, message_id: &str) -> Result<(), BrokerError>;

    /// REQ with a redelivery delay
    async fn requeue(&self, message_id: &str, delay: Duration) -> Result<(), BrokerError>;
}

/// A message received on a topic/channel subscription
#[derive(Clone)]
pub struct NsqMessage {
    pub id: String,
    pub body: Vec<u8>,
    pub attempts: u16,
    pub responder: Arc<dyn NsqResponder>,
}

impl fmt::Debug for NsqMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NsqMessage")
            .field("id", &self.id)
            .field("body", &String::from_utf8_lossy(&self.body))
            .field("attempts", &self.attempts)
            .finish()
    }
}

/// Connection to nsqd
#[async_trait]
pub trait NsqClient: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn connect(&self, config: &NsqConnectionConfiguration) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;

    async fn publish(&self, topic: &str, body: Vec<u8>) -> Result<(), BrokerError>;

    /// Subscribe to `topic` through `channel`; dropping the stream ends the subscription
    async fn subscribe(
        &self,
        topic: &str,
        channel: &str,
    ) -> Result<BoxStream<'static, NsqMessage>, BrokerError>;
}
