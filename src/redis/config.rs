//! Redis connection settings

use crate::common::dsn::{parse_socket_dsn, whole_seconds_param};
use crate::error::{TransportError, TransportResult};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::form_urlencoded;
use url::Url;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 6379;
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Parsed `tcp://host:port?timeout=T&password=P` or `unix:///path?...` DSN
#[derive(Clone, PartialEq, Eq)]
pub struct RedisConnectionConfiguration {
    scheme: String,
    host: String,
    port: u16,
    socket_path: Option<String>,
    timeout: Duration,
    password: Option<String>,
}

impl RedisConnectionConfiguration {
    pub fn parse(dsn: &str) -> TransportResult<Self> {
        let parsed = parse_socket_dsn(dsn)?;
        let socket_path = (parsed.scheme == "unix").then(|| parsed.path.clone());

        let password = parsed
            .query
            .get("password")
            .cloned()
            .or(parsed.password)
            .filter(|password| !password.is_empty());

        Ok(Self {
            host: parsed.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parsed.port.unwrap_or(DEFAULT_PORT),
            socket_path,
            timeout: Duration::from_secs(
                whole_seconds_param(&parsed.query, "timeout").unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            password,
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

    pub fn socket_path(&self) -> Option<&str> {
        self.socket_path.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// `host:port` for TCP, the socket path otherwise
    pub fn address(&self) -> String {
        match &self.socket_path {
            Some(path) => path.clone(),
            None => format!("{}:{}", self.host, self.port),
        }
    }

    /// Connection URL understood by the `redis` crate
    pub fn client_url(&self) -> TransportResult<String> {
        match &self.socket_path {
            Some(path) => {
                let mut url = format!("redis+unix://{}", path);

                if let Some(password) = &self.password {
                    url.push('?');
                    url.push_str(
                        &form_urlencoded::Serializer::new(String::new())
                            .append_pair("pass", password)
                            .finish(),
                    );
                }

                Ok(url)
            }
            None => {
                let mut url = Url::parse(&format!("redis://{}:{}", self.host, self.port))
                    .map_err(|e| TransportError::Configuration(format!("Invalid Redis address: {}", e)))?;

                if self.password.is_some() && url.set_password(self.password.as_deref()).is_err() {
                    return Err(TransportError::Configuration(
                        "Redis password can't be set for this address".to_string(),
                    ));
                }

                Ok(url.to_string())
            }
        }
    }
}

impl FromStr for RedisConnectionConfiguration {
    type Err = TransportError;

    fn from_str(dsn: &str) -> Result<Self, Self::Err> {
        Self::parse(dsn)
    }
}

impl fmt::Display for RedisConnectionConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.socket_path {
            Some(path) => write!(f, "{}://{}", self.scheme, path)?,
            None => write!(f, "{}://{}:{}", self.scheme, self.host, self.port)?,
        }

        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("timeout", &self.timeout.as_secs().to_string());
        if let Some(password) = &self.password {
            query.append_pair("password", password);
        }

        write!(f, "?{}", query.finish())
    }
}

impl fmt::Debug for RedisConnectionConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConnectionConfiguration")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("socket_path", &self.socket_path)
            .field("timeout", &self.timeout)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}
