use crate::error::{TransportError, TransportResult};

/// NSQ topic used both as a publish target and as a consumed queue
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NsqChannel {
    name: String,
}

impl NsqChannel {
    pub fn new(name: impl Into<String>) -> TransportResult<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(TransportError::IncorrectChannelName);
        }

        Ok(Self { name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// NSQ topic a message is published to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NsqTransportLevelDestination {
    channel: String,
}

impl NsqTransportLevelDestination {
    pub fn new(channel: impl Into<String>) -> TransportResult<Self> {
        let channel = channel.into();

        if channel.is_empty() {
            return Err(TransportError::IncorrectChannelName);
        }

        Ok(Self { channel })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}
