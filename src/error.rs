use crate::common::envelope::EnvelopeError;
use std::fmt;
use thiserror::Error;

/// Opaque error raised by a broker client implementation
pub type BrokerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Why an entity name was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameViolation {
    /// Name is an empty string
    Empty,
    /// Name is longer than the broker accepts
    TooLong { length: usize },
}

impl fmt::Display for NameViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameViolation::Empty => write!(f, "name must be specified"),
            NameViolation::TooLong { length } => write!(
                f,
                "name may be up to 255 bytes of UTF-8 characters ({} specified)",
                length
            ),
        }
    }
}

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection DSN was an empty string
    #[error("Connection DSN can't be empty")]
    ConnectionDsnEmpty,

    /// Connection DSN could not be parsed
    #[error("Can't parse specified connection DSN ({dsn})")]
    IncorrectDsn { dsn: String },

    /// Connection DSN uses a scheme the backend does not accept
    #[error("Connection DSN must start with tcp:// or unix:// ({dsn})")]
    IncorrectScheme { dsn: String },

    /// AMQP exchange name rejected
    #[error("Invalid exchange name: exchange {0}")]
    InvalidExchangeName(NameViolation),

    /// AMQP queue name rejected
    #[error("Invalid queue name: queue {0}")]
    InvalidQueueName(NameViolation),

    /// NSQ/Redis channel name rejected
    #[error("Channel name can't be empty")]
    IncorrectChannelName,

    /// AMQP destination without an exchange
    #[error("Destination exchange name must be specified")]
    IncorrectDestinationExchange,

    /// Broker connection could not be established
    #[error("Can't connect to {host}:{port} (vhost: {vhost})")]
    ConnectionFail {
        host: String,
        port: u16,
        vhost: String,
        #[source]
        source: BrokerError,
    },

    /// Exchange/topic declaration failed
    #[error("Create topic failed: {source}")]
    CreateTopicFailed {
        #[source]
        source: BrokerError,
    },

    /// Queue declaration failed
    #[error("Create queue failed: {source}")]
    CreateQueueFailed {
        #[source]
        source: BrokerError,
    },

    /// Binding a queue or exchange failed
    #[error("Bind failed: {source}")]
    BindFailed {
        #[source]
        source: BrokerError,
    },

    /// Starting a subscription failed
    #[error("Consume from \"{queue}\" failed: {source}")]
    ConsumeFailed {
        queue: String,
        #[source]
        source: BrokerError,
    },

    /// Publishing failed
    #[error("Send message failed: {source}")]
    SendMessageFailed {
        #[source]
        source: BrokerError,
    },

    /// Broker refused the acknowledgement
    #[error("Acknowledge failed: {source}")]
    AcknowledgeFailed {
        #[source]
        source: BrokerError,
    },

    /// Broker refused the negative acknowledgement
    #[error("Not acknowledge failed: {source}")]
    NotAcknowledgeFailed {
        #[source]
        source: BrokerError,
    },

    /// Broker refused the rejection
    #[error("Reject failed: {source}")]
    RejectFailed {
        #[source]
        source: BrokerError,
    },

    /// Entity or destination belongs to another backend
    #[error("{backend} transport can't handle {entity}")]
    UnsupportedEntity {
        backend: &'static str,
        entity: String,
    },

    /// Envelope encoding error
    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TransportError {
    /// Wrap a broker error raised while connecting
    pub fn connection_fail(
        host: impl Into<String>,
        port: u16,
        vhost: impl Into<String>,
        source: impl Into<BrokerError>,
    ) -> Self {
        TransportError::ConnectionFail {
            host: host.into(),
            port,
            vhost: vhost.into(),
            source: source.into(),
        }
    }

    pub fn send_failed(source: impl Into<BrokerError>) -> Self {
        TransportError::SendMessageFailed {
            source: source.into(),
        }
    }

    /// True for errors raised synchronously while building values
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionDsnEmpty
                | TransportError::IncorrectDsn { .. }
                | TransportError::IncorrectScheme { .. }
                | TransportError::InvalidExchangeName(_)
                | TransportError::InvalidQueueName(_)
                | TransportError::IncorrectChannelName
                | TransportError::IncorrectDestinationExchange
        )
    }

    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            TransportError::ConnectionDsnEmpty
            | TransportError::IncorrectDsn { .. }
            | TransportError::IncorrectScheme { .. } => "INCORRECT_CONNECTION_PARAMETERS",
            TransportError::InvalidExchangeName(_) => "INVALID_EXCHANGE_NAME",
            TransportError::InvalidQueueName(_) => "INVALID_QUEUE_NAME",
            TransportError::IncorrectChannelName => "INCORRECT_CHANNEL_NAME",
            TransportError::IncorrectDestinationExchange => "INCORRECT_DESTINATION_EXCHANGE",
            TransportError::ConnectionFail { .. } => "CONNECTION_FAIL",
            TransportError::CreateTopicFailed { .. } => "CREATE_TOPIC_FAILED",
            TransportError::CreateQueueFailed { .. } => "CREATE_QUEUE_FAILED",
            TransportError::BindFailed { .. } => "BIND_FAILED",
            TransportError::ConsumeFailed { .. } => "CONSUME_FAILED",
            TransportError::SendMessageFailed { .. } => "SEND_MESSAGE_FAILED",
            TransportError::AcknowledgeFailed { .. } => "ACKNOWLEDGE_FAILED",
            TransportError::NotAcknowledgeFailed { .. } => "NOT_ACKNOWLEDGE_FAILED",
            TransportError::RejectFailed { .. } => "REJECT_FAILED",
            TransportError::UnsupportedEntity { .. } => "UNSUPPORTED_ENTITY",
            TransportError::Envelope(_) => "ENVELOPE_ERROR",
            TransportError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for TransportError {
    fn from(err: config::ConfigError) -> Self {
        TransportError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_name_violation_messages() {
        assert_eq!(
            TransportError::InvalidExchangeName(NameViolation::Empty).to_string(),
            "Invalid exchange name: exchange name must be specified"
        );
        assert_eq!(
            TransportError::InvalidQueueName(NameViolation::TooLong { length: 256 }).to_string(),
            "Invalid queue name: queue name may be up to 255 bytes of UTF-8 characters (256 specified)"
        );
    }

    #[test]
    fn test_connection_fail_keeps_source() {
        let err = TransportError::connection_fail("localhost", 5672, "/", "connection refused");

        assert_eq!(err.to_string(), "Can't connect to localhost:5672 (vhost: /)");
        assert_eq!(err.source().unwrap().to_string(), "connection refused");
        assert_eq!(err.error_code(), "CONNECTION_FAIL");
    }

    #[test]
    fn test_construction_errors() {
        assert!(TransportError::ConnectionDsnEmpty.is_construction_error());
        assert!(TransportError::IncorrectChannelName.is_construction_error());
        assert!(!TransportError::send_failed("boom").is_construction_error());
    }
}
