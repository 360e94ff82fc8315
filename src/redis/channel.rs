use crate::error::{TransportError, TransportResult};

/// Redis pub/sub channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RedisChannel {
    name: String,
}

impl RedisChannel {
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

/// Redis channel a message is published to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RedisTransportLevelDestination {
    channel: String,
}

impl RedisTransportLevelDestination {
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

impl From<&RedisChannel> for RedisTransportLevelDestination {
    fn from(channel: &RedisChannel) -> Self {
        Self {
            channel: channel.name.clone(),
        }
    }
}
