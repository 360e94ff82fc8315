//! Inbound and outbound message packages

use crate::common::entities::DeliveryDestination;
use crate::common::envelope::{generate_id, HEADER_MESSAGE_ID};
use crate::common::headers::{HeaderValue, Headers};
use crate::error::TransportResult;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Broker-specific disposition of a received message
#[async_trait]
pub trait Settlement: Send + Sync {
    async fn ack(&self) -> TransportResult<()>;

    async fn nack(&self, requeue: bool, reason: Option<&str>) -> TransportResult<()>;

    async fn reject(&self, requeue: bool, reason: Option<&str>) -> TransportResult<()>;

    /// False when ack/nack/reject have no effect on the broker
    fn supports_acknowledgement(&self) -> bool {
        true
    }
}

/// A message received from the broker.
///
/// `ack`, `nack` and `reject` take the package by value, so each received
/// message is settled at most once.
pub struct IncomingPackage {
    id: String,
    trace_id: String,
    origin: DeliveryDestination,
    payload: Vec<u8>,
    headers: Headers,
    settlement: Box<dyn Settlement>,
}

impl IncomingPackage {
    pub fn new(
        id: String,
        trace_id: String,
        origin: DeliveryDestination,
        payload: Vec<u8>,
        headers: Headers,
        settlement: Box<dyn Settlement>,
    ) -> Self {
        Self {
            id,
            trace_id,
            origin,
            payload,
            headers,
            settlement,
        }
    }

    /// Message id
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Where the message came from
    pub fn origin(&self) -> &DeliveryDestination {
        &self.origin
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as text, replacing invalid UTF-8 sequences
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Headers without the provenance keys
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn supports_acknowledgement(&self) -> bool {
        self.settlement.supports_acknowledgement()
    }

    /// Acknowledge the message
    pub async fn ack(self) -> TransportResult<()> {
        self.settlement.ack().await
    }

    /// Negative acknowledge, optionally returning the message to the queue
    pub async fn nack(self, requeue: bool, reason: Option<&str>) -> TransportResult<()> {
        self.settlement.nack(requeue, reason).await
    }

    /// Reject the message, optionally returning it to the queue
    pub async fn reject(self, requeue: bool, reason: Option<&str>) -> TransportResult<()> {
        self.settlement.reject(requeue, reason).await
    }
}

impl fmt::Debug for IncomingPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingPackage")
            .field("id", &self.id)
            .field("trace_id", &self.trace_id)
            .field("origin", &self.origin)
            .field("payload", &self.payload_str())
            .field("headers", &self.headers)
            .finish()
    }
}

/// A message to be published
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundPackage {
    trace_id: String,
    payload: Vec<u8>,
    headers: Headers,
    destination: DeliveryDestination,
    persistent: bool,
    mandatory: bool,
    immediate: bool,
    expired_after: Option<Duration>,
}

impl OutboundPackage {
    /// Create a package with a freshly generated trace id
    pub fn new(
        payload: impl Into<Vec<u8>>,
        headers: Headers,
        destination: impl Into<DeliveryDestination>,
    ) -> Self {
        Self {
            trace_id: generate_id(),
            payload: payload.into(),
            headers,
            destination: destination.into(),
            persistent: false,
            mandatory: false,
            immediate: false,
            expired_after: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    /// Carry an explicit message id in the `x-message-id` header
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.headers
            .insert(HEADER_MESSAGE_ID.to_string(), HeaderValue::String(message_id.into()));
        self
    }

    /// Ask the broker to store the message on disk
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    /// Require the message to be routed to at least one queue
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    /// Message TTL, forwarded to the broker
    pub fn expires_after(mut self, ttl: Duration) -> Self {
        self.expired_after = Some(ttl);
        self
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn destination(&self) -> &DeliveryDestination {
        &self.destination
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn is_mandatory(&self) -> bool {
        self.mandatory
    }

    pub fn is_immediate(&self) -> bool {
        self.immediate
    }

    pub fn expired_after(&self) -> Option<Duration> {
        self.expired_after
    }
}
