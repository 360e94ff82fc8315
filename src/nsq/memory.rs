//! In-process nsqd
//!
//! Topics fan out to every channel, a channel load-balances between its
//! subscribers, and messages stay in flight until finished or requeued. Messages
//! published before a topic has any channel are kept until the first one appears.

use crate::error::BrokerError;
use crate::nsq::client::{NsqClient, NsqMessage, NsqResponder};
use crate::nsq::config::NsqConnectionConfiguration;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// In-memory NSQ daemon; clones share the same broker
#[derive(Clone, Default)]
pub struct InMemoryNsqBroker {
    inner: Arc<NsqInner>,
}

#[derive(Default)]
struct NsqInner {
    state: Mutex<NsqState>,
    connected: AtomicBool,
    refuse_connections: AtomicBool,
    next_id: AtomicU64,
}

#[derive(Default)]
struct NsqState {
    topics: HashMap<String, TopicState>,
    in_flight: HashMap<String, InFlight>,
    finished: Vec<String>,
    requeued: Vec<String>,
}

#[derive(Default)]
struct TopicState {
    backlog: VecDeque<Pending>,
    channels: HashMap<String, ChannelState>,
    published: usize,
}

#[derive(Default)]
struct ChannelState {
    ready: VecDeque<Pending>,
    subscribers: Vec<mpsc::UnboundedSender<NsqMessage>>,
    cursor: usize,
}

#[derive(Clone)]
struct Pending {
    id: String,
    body: Vec<u8>,
    attempts: u16,
}

struct InFlight {
    topic: String,
    channel: String,
    message: Pending,
}

impl InMemoryNsqBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Ids of finished messages, in order
    pub fn finished_ids(&self) -> Vec<String> {
        self.inner.state.lock().finished.clone()
    }

    /// Ids of requeued messages, in order
    pub fn requeued_ids(&self) -> Vec<String> {
        self.inner.state.lock().requeued.clone()
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Messages accepted on `topic`
    pub fn published_count(&self, topic: &str) -> usize {
        self.inner
            .state
            .lock()
            .topics
            .get(topic)
            .map(|topic| topic.published)
            .unwrap_or(0)
    }

    /// Messages waiting on `topic/channel` with no subscriber to take them
    pub fn depth(&self, topic: &str, channel: &str) -> usize {
        let state = self.inner.state.lock();

        match state.topics.get(topic) {
            Some(topic) => match topic.channels.get(channel) {
                Some(channel) => channel.ready.len(),
                None if topic.channels.is_empty() => topic.backlog.len(),
                None => 0,
            },
            None => 0,
        }
    }

    /// Live subscribers on `topic/channel`
    pub fn subscriber_count(&self, topic: &str, channel: &str) -> usize {
        let state = self.inner.state.lock();

        state
            .topics
            .get(topic)
            .and_then(|topic| topic.channels.get(channel))
            .map(|channel| channel.subscribers.iter().filter(|sender| !sender.is_closed()).count())
            .unwrap_or(0)
    }

    fn ensure_connected(&self) -> Result<(), BrokerError> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err("E_NOT_CONNECTED - connection is closed".into());
        }
        Ok(())
    }
}

#[async_trait]
impl NsqClient for InMemoryNsqBroker {
    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self, config: &NsqConnectionConfiguration) -> Result<(), BrokerError> {
        if self.inner.refuse_connections.load(Ordering::SeqCst) {
            return Err(format!("connection to {} refused", config.address()).into());
        }

        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner.connected.store(false, Ordering::SeqCst);

        let mut state = self.inner.state.lock();
        for topic in state.topics.values_mut() {
            for channel in topic.channels.values_mut() {
                channel.subscribers.clear();
            }
        }

        let in_flight: Vec<InFlight> = state.in_flight.drain().map(|(_, message)| message).collect();
        for message in in_flight {
            if let Some(channel) = state
                .topics
                .get_mut(&message.topic)
                .and_then(|topic| topic.channels.get_mut(&message.channel))
            {
                channel.ready.push_front(message.message);
            }
        }

        Ok(())
    }

    async fn publish(&self, topic: &str, body: Vec<u8>) -> Result<(), BrokerError> {
        self.ensure_connected()?;

        let message = Pending {
            id: format!("{:016x}", self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1),
            body,
            attempts: 0,
        };

        let mut state = self.inner.state.lock();
        let topic_state = state.topics.entry(topic.to_string()).or_default();
        topic_state.published += 1;

        if topic_state.channels.is_empty() {
            topic_state.backlog.push_back(message);
            return Ok(());
        }

        let channels: Vec<String> = topic_state.channels.keys().cloned().collect();
        for channel in &channels {
            if let Some(channel_state) = topic_state.channels.get_mut(channel) {
                channel_state.ready.push_back(message.clone());
            }
        }

        for channel in channels {
            dispatch(&mut state, &self.inner, topic, &channel);
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str, channel: &str) -> Result<BoxStream<'static, NsqMessage>, BrokerError> {
        self.ensure_connected()?;

        let (sender, receiver) = mpsc::unbounded_channel();

        let mut state = self.inner.state.lock();
        let topic_state = state.topics.entry(topic.to_string()).or_default();
        let first_channel = topic_state.channels.is_empty();
        let backlog: Vec<Pending> = if first_channel {
            topic_state.backlog.drain(..).collect()
        } else {
            Vec::new()
        };

        let channel_state = topic_state.channels.entry(channel.to_string()).or_default();
        channel_state.ready.extend(backlog);
        channel_state.subscribers.push(sender);

        dispatch(&mut state, &self.inner, topic, channel);

        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }
}

#[async_trait]
impl NsqResponder for InMemoryNsqBroker {
    async fn finish(&self, message_id: &str) -> Result<(), BrokerError> {
        let mut state = self.inner.state.lock();

        if state.in_flight.remove(message_id).is_none() {
            return Err(format!("E_FIN_FAILED - message {} is not in flight", message_id).into());
        }

        state.finished.push(message_id.to_string());
        Ok(())
    }

    async fn requeue(&self, message_id: &str, delay: Duration) -> Result<(), BrokerError> {
        let in_flight = {
            let mut state = self.inner.state.lock();
            let in_flight = state
                .in_flight
                .remove(message_id)
                .ok_or_else(|| format!("E_REQ_FAILED - message {} is not in flight", message_id))?;
            state.requeued.push(message_id.to_string());
            in_flight
        };

        let inner = self.inner.clone();
        let redeliver = move || {
            let mut state = inner.state.lock();
            if let Some(channel) = state
                .topics
                .get_mut(&in_flight.topic)
                .and_then(|topic| topic.channels.get_mut(&in_flight.channel))
            {
                channel.ready.push_front(in_flight.message);
            }
            dispatch(&mut state, &inner, &in_flight.topic, &in_flight.channel);
        };

        if delay.is_zero() {
            redeliver();
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                redeliver();
            });
        }

        Ok(())
    }
}

/// Hand ready messages to subscribers in round-robin order
fn dispatch(state: &mut NsqState, inner: &Arc<NsqInner>, topic: &str, channel: &str) {
    let NsqState {
        topics, in_flight, ..
    } = state;

    let Some(channel_state) = topics
        .get_mut(topic)
        .and_then(|topic| topic.channels.get_mut(channel))
    else {
        return;
    };

    while !channel_state.subscribers.is_empty() {
        let Some(mut pending) = channel_state.ready.pop_front() else {
            break;
        };

        pending.attempts = pending.attempts.saturating_add(1);

        let index = channel_state.cursor % channel_state.subscribers.len();
        channel_state.cursor = channel_state.cursor.wrapping_add(1);

        let message = NsqMessage {
            id: pending.id.clone(),
            body: pending.body.clone(),
            attempts: pending.attempts,
            responder: Arc::new(InMemoryNsqBroker {
                inner: inner.clone(),
            }),
        };

        if channel_state.subscribers[index].send(message).is_err() {
            // subscriber dropped its stream
            channel_state.subscribers.remove(index);
            pending.attempts -= 1;
            channel_state.ready.push_front(pending);
            continue;
        }

        in_flight.insert(
            pending.id.clone(),
            InFlight {
                topic: topic.to_string(),
                channel: channel.to_string(),
                message: pending,
            },
        );
    }
}
