//! NSQ connection settings

use crate::common::dsn::{parse_socket_dsn, whole_seconds_param};
use crate::error::{TransportError, TransportResult};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 4150;
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Parsed `tcp://host:port?timeout=T` or `unix:///path?timeout=T` DSN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsqConnectionConfiguration {
    scheme: String,
    host: String,
    port: u16,
    socket_path: Option<String>,
    timeout: Duration,
}

impl NsqConnectionConfiguration {
    pub fn parse(dsn: &str) -> TransportResult<Self> {
        let parsed = parse_socket_dsn(dsn)?;
        let socket_path = (parsed.scheme == "unix").then(|| parsed.path.clone());

        Ok(Self {
            host: parsed.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parsed.port.unwrap_or(DEFAULT_PORT),
            socket_path,
            timeout: Duration::from_secs(
                whole_seconds_param(&parsed.query, "timeout").unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            scheme: parsed.scheme,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Socket path for `unix://` connections
    pub fn socket_path(&self) -> Option<&str> {
        self.socket_path.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `host:port` for TCP, the socket path otherwise
    pub fn address(&self) -> String {
        match &self.socket_path {
            Some(path) => path.clone(),
            None => format!("{}:{}", self.host, self.port),
        }
    }
}

impl FromStr for NsqConnectionConfiguration {
    type Err = TransportError;

    fn from_str(dsn: &str) -> Result<Self, Self::Err> {
        Self::parse(dsn)
    }
}

impl fmt::Display for NsqConnectionConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.socket_path {
            Some(path) => write!(f, "{}://{}", self.scheme, path)?,
            None => write!(f, "{}://{}:{}", self.scheme, self.host, self.port)?,
        }

        write!(f, "?timeout={}", self.timeout.as_secs())
    }
}
