//! In-process Redis pub/sub

use crate::error::BrokerError;
use crate::redis::client::RedisClient;
use crate::redis::config::RedisConnectionConfiguration;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// In-memory Redis pub/sub; clones share the same broker.
///
/// Like the real thing, a message reaches only the subscribers present at
/// publish time.
#[derive(Clone, Default)]
pub struct InMemoryRedisBroker {
    inner: Arc<RedisInner>,
}

#[derive(Default)]
struct RedisInner {
    subscribers: DashMap<String, Vec<mpsc::UnboundedSender<String>>>,
    history: Mutex<Vec<(String, String)>>,
    connected: AtomicBool,
    refuse_connections: AtomicBool,
}

impl InMemoryRedisBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Every message published on `channel`, in order
    pub fn published(&self, channel: &str) -> Vec<String> {
        self.inner
            .history
            .lock()
            .iter()
            .filter(|(published_on, _)| published_on == channel)
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// Live subscriptions on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .subscribers
            .get(channel)
            .map(|senders| senders.iter().filter(|sender| !sender.is_closed()).count())
            .unwrap_or(0)
    }

    fn ensure_connected(&self) -> Result<(), BrokerError> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err("Connection closed".into());
        }
        Ok(())
    }
}

#[async_trait]
impl RedisClient for InMemoryRedisBroker {
    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self, config: &RedisConnectionConfiguration) -> Result<(), BrokerError> {
        if self.inner.refuse_connections.load(Ordering::SeqCst) {
            return Err(format!("Connection refused ({})", config.address()).into());
        }

        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.subscribers.clear();
        Ok(())
    }

    async fn publish(&self, channel: &str, message: String) -> Result<u64, BrokerError> {
        self.ensure_connected()?;

        self.inner
            .history
            .lock()
            .push((channel.to_string(), message.clone()));

        let mut receivers = 0;
        if let Some(mut senders) = self.inner.subscribers.get_mut(channel) {
            senders.retain(|sender| sender.send(message.clone()).is_ok());
            receivers = senders.len() as u64;
        }

        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, BrokerError> {
        self.ensure_connected()?;

        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .entry(channel.to_string())
            .or_default()
            .push(sender);

        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected() -> InMemoryRedisBroker {
        let broker = InMemoryRedisBroker::new();
        let config = RedisConnectionConfiguration::parse("tcp://localhost:6379").unwrap();
        broker.connect(&config).await.unwrap();
        broker
    }

    #[tokio::test]
    async fn test_fan_out_to_every_subscriber() {
        let broker = connected().await;
        let mut first = broker.subscribe("events").await.unwrap();
        let mut second = broker.subscribe("events").await.unwrap();

        let receivers = broker.publish("events", "hello".to_string()).await.unwrap();

        assert_eq!(receivers, 2);
        assert_eq!(first.next().await.unwrap(), "hello");
        assert_eq!(second.next().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_no_subscribers() {
        let broker = connected().await;

        let receivers = broker.publish("events", "lost".to_string()).await.unwrap();

        assert_eq!(receivers, 0);
        assert_eq!(broker.published("events"), vec!["lost".to_string()]);
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let broker = connected().await;
        let stream = broker.subscribe("events").await.unwrap();
        drop(stream);

        assert_eq!(broker.subscriber_count("events"), 0);
        assert_eq!(broker.publish("events", "x".to_string()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let broker = InMemoryRedisBroker::new();
        broker.refuse_connections(true);

        let config = RedisConnectionConfiguration::parse("tcp://localhost:6379").unwrap();
        assert!(broker.connect(&config).await.is_err());
        assert!(!broker.is_connected());
    }
}
