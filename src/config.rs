//! Transport configuration
//!
//! Values are layered: the embedded `config/default.toml`, then an optional file
//! named by `SERVICE_BUS_CONFIG`, then `SERVICE_BUS__*` environment variables.

use crate::amqp::{AmqpConnectionConfiguration, AmqpQoSConfiguration, AmqpTransportLevelDestination};
use crate::common::entities::{DeliveryDestination, TransportBackend};
use crate::error::{TransportError, TransportResult};
use crate::nsq::{NsqConnectionConfiguration, NsqConsumerOptions, NsqTransportLevelDestination};
use crate::redis::{RedisConnectionConfiguration, RedisTransportLevelDestination};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an optional configuration file
pub const CONFIG_PATH_ENV: &str = "SERVICE_BUS_CONFIG";

const ENV_PREFIX: &str = "SERVICE_BUS";

/// Main transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Broker backend
    pub backend: TransportBackend,

    /// Connection DSN for the selected backend
    pub dsn: String,

    /// Where packages go when the caller names no destination
    #[serde(default)]
    pub default_destination: DefaultDestinationConfig,

    /// AMQP consumer prefetch
    #[serde(default)]
    pub qos: QosConfig,

    /// NSQ consumer settings
    #[serde(default)]
    pub nsq: NsqConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultDestinationConfig {
    #[serde(default)]
    pub exchange: Option<String>,

    #[serde(default)]
    pub routing_key: Option<String>,

    #[serde(default)]
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QosConfig {
    /// Prefetch window in bytes
    #[serde(default)]
    pub size: Option<i64>,

    /// Prefetch window in messages
    #[serde(default)]
    pub count: Option<i64>,

    #[serde(default)]
    pub global: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NsqConfig {
    #[serde(default = "default_consumer_channel")]
    pub consumer_channel: String,

    #[serde(default = "default_requeue_delay_ms")]
    pub requeue_delay_ms: u64,
}

impl Default for NsqConfig {
    fn default() -> Self {
        Self {
            consumer_channel: default_consumer_channel(),
            requeue_delay_ms: default_requeue_delay_ms(),
        }
    }
}

fn default_consumer_channel() -> String {
    crate::nsq::DEFAULT_CONSUMER_CHANNEL.to_string()
}

fn default_requeue_delay_ms() -> u64 {
    crate::nsq::DEFAULT_REQUEUE_DELAY.as_millis() as u64
}

impl TransportConfig {
    /// Load configuration from the defaults, `SERVICE_BUS_CONFIG` and the environment
    pub fn load() -> TransportResult<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok();
        Self::build(path.as_deref().map(Path::new), false)
    }

    /// Load configuration with `path` layered over the defaults; the file must exist
    pub fn load_from_file(path: impl AsRef<Path>) -> TransportResult<Self> {
        Self::build(Some(path.as_ref()), true)
    }

    fn build(path: Option<&Path>, required: bool) -> TransportResult<Self> {
        let mut builder = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(required));
        }

        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Check that the DSN belongs to the selected backend and parses
    pub fn validate(&self) -> TransportResult<()> {
        match self.backend {
            TransportBackend::Amqp => {
                self.amqp_connection()?;
            }
            TransportBackend::Nsq => {
                self.nsq_connection()?;

                if self.nsq.consumer_channel.is_empty() {
                    return Err(TransportError::Configuration(
                        "nsq.consumer_channel can't be empty".to_string(),
                    ));
                }
            }
            TransportBackend::Redis => {
                self.redis_connection()?;
            }
        }

        Ok(())
    }

    pub fn amqp_connection(&self) -> TransportResult<AmqpConnectionConfiguration> {
        AmqpConnectionConfiguration::parse(&self.dsn)
    }

    pub fn nsq_connection(&self) -> TransportResult<NsqConnectionConfiguration> {
        NsqConnectionConfiguration::parse(&self.dsn)
    }

    pub fn redis_connection(&self) -> TransportResult<RedisConnectionConfiguration> {
        RedisConnectionConfiguration::parse(&self.dsn)
    }

    pub fn amqp_qos(&self) -> AmqpQoSConfiguration {
        AmqpQoSConfiguration::new(self.qos.size, self.qos.count, self.qos.global)
    }

    pub fn nsq_options(&self) -> NsqConsumerOptions {
        NsqConsumerOptions {
            consumer_channel: self.nsq.consumer_channel.clone(),
            requeue_delay: Duration::from_millis(self.nsq.requeue_delay_ms),
        }
    }

    /// Destination of the selected backend built from `default_destination`
    pub fn default_destination(&self) -> TransportResult<DeliveryDestination> {
        let destination = &self.default_destination;

        Ok(match self.backend {
            TransportBackend::Amqp => AmqpTransportLevelDestination::new(
                destination.exchange.clone().unwrap_or_default(),
                destination.routing_key.clone(),
            )?
            .into(),
            TransportBackend::Nsq => {
                NsqTransportLevelDestination::new(destination.channel.clone().unwrap_or_default())?.into()
            }
            TransportBackend::Redis => {
                RedisTransportLevelDestination::new(destination.channel.clone().unwrap_or_default())?.into()
            }
        })
    }
}
