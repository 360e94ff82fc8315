//! In-process AMQP broker
//!
//! Implements exchanges (fanout, direct, topic, headers, delayed as direct),
//! queues, exchange-to-exchange and queue binds, round-robin consumers,
//! unacknowledged tracking with requeue, and channel transactions. Message TTL,
//! delivery mode and prefetch limits are accepted but not enforced.

use crate::amqp::client::{AmqpChannel, AmqpClient, AmqpDelivery, AmqpPublish};
use crate::amqp::config::AmqpConnectionConfiguration;
use crate::amqp::exchange::{AmqpExchange, AmqpExchangeType};
use crate::amqp::queue::AmqpQueue;
use crate::common::headers::{Arguments, HeaderValue, Headers};
use crate::error::BrokerError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

type DeliverySender = mpsc::UnboundedSender<Result<AmqpDelivery, BrokerError>>;

/// In-memory AMQP broker; clones share the same broker
#[derive(Clone, Default)]
pub struct InMemoryAmqpBroker {
    inner: Arc<BrokerInner>,
}

#[derive(Default)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    connected: AtomicBool,
    refuse_connections: AtomicBool,
    next_delivery_tag: AtomicU64,
    next_channel_id: AtomicU64,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeState>,
    queues: HashMap<String, QueueState>,
    /// consumer tag -> queue name
    consumers: HashMap<String, String>,
    unacked: HashMap<u64, Unacked>,
    last_qos: Option<(u32, u16, bool)>,
}

struct ExchangeState {
    exchange_type: AmqpExchangeType,
    bindings: Vec<Binding>,
}

struct Binding {
    target: BindTarget,
    routing_key: String,
    arguments: Arguments,
}

#[derive(PartialEq)]
enum BindTarget {
    Queue(String),
    Exchange(String),
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    consumers: Vec<ConsumerSlot>,
    cursor: usize,
}

struct ConsumerSlot {
    tag: String,
    channel_id: u64,
    sender: DeliverySender,
}

#[derive(Clone)]
struct StoredMessage {
    exchange: String,
    routing_key: String,
    body: Vec<u8>,
    headers: Headers,
    redelivered: bool,
}

struct Unacked {
    queue: String,
    channel_id: u64,
    message: StoredMessage,
}

impl InMemoryAmqpBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent connection attempts fail
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.inner.state.lock().exchanges.contains_key(name)
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.inner.state.lock().queues.contains_key(name)
    }

    /// Messages waiting in `queue` that have not been delivered
    pub fn ready_count(&self, queue: &str) -> usize {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map(|queue| queue.ready.len())
            .unwrap_or(0)
    }

    /// Delivered messages that have not been settled yet
    pub fn unacked_count(&self) -> usize {
        self.inner.state.lock().unacked.len()
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map(|queue| queue.consumers.len())
            .unwrap_or(0)
    }

    /// Most recent QoS request as `(prefetch_size, prefetch_count, global)`
    pub fn last_qos(&self) -> Option<(u32, u16, bool)> {
        self.inner.state.lock().last_qos
    }
}

#[async_trait]
impl AmqpClient for InMemoryAmqpBroker {
    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self, config: &AmqpConnectionConfiguration) -> Result<(), BrokerError> {
        if self.inner.refuse_connections.load(Ordering::SeqCst) {
            return Err(format!("connection to {}:{} refused", config.host(), config.port()).into());
        }

        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.inner.connected.store(false, Ordering::SeqCst);

        let mut state = self.inner.state.lock();
        state.consumers.clear();
        for queue in state.queues.values_mut() {
            queue.consumers.clear();
        }
        requeue_unacked(&mut state, &self.inner, |_| true);

        Ok(())
    }

    async fn channel(&self) -> Result<Arc<dyn AmqpChannel>, BrokerError> {
        if !self.is_connected() {
            return Err("connection is closed".into());
        }

        Ok(Arc::new(InMemoryAmqpChannel {
            id: self.inner.next_channel_id.fetch_add(1, Ordering::SeqCst) + 1,
            broker: self.inner.clone(),
            transaction: Mutex::new(None),
            open: AtomicBool::new(true),
        }))
    }
}

/// Channel opened on an [`InMemoryAmqpBroker`]
pub struct InMemoryAmqpChannel {
    id: u64,
    broker: Arc<BrokerInner>,
    /// Buffered publishes while in transaction mode
    transaction: Mutex<Option<Vec<AmqpPublish>>>,
    open: AtomicBool,
}

impl InMemoryAmqpChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if !self.open.load(Ordering::SeqCst) || !self.broker.connected.load(Ordering::SeqCst) {
            return Err(format!("channel {} is closed", self.id).into());
        }
        Ok(())
    }

    fn settle(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.ensure_open()?;

        let mut state = self.broker.state.lock();
        let unacked = state
            .unacked
            .remove(&delivery_tag)
            .ok_or_else(|| format!("PRECONDITION_FAILED - unknown delivery tag {}", delivery_tag))?;

        if requeue {
            let mut message = unacked.message;
            message.redelivered = true;
            enqueue(&mut state, &self.broker, &unacked.queue, message, true);
        }

        Ok(())
    }
}

#[async_trait]
impl AmqpChannel for InMemoryAmqpChannel {
    async fn qos(&self, prefetch_size: u32, prefetch_count: u16, global: bool) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.broker.state.lock().last_qos = Some((prefetch_size, prefetch_count, global));
        Ok(())
    }

    async fn exchange_declare(&self, exchange: &AmqpExchange) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();

        let existing = state
            .exchanges
            .get(exchange.name())
            .map(|existing| existing.exchange_type);

        match existing {
            Some(exchange_type) if exchange_type != exchange.exchange_type() && !exchange.is_passive() => {
                Err(format!(
                    "PRECONDITION_FAILED - inequivalent arg 'type' for exchange '{}'",
                    exchange.name()
                )
                .into())
            }
            Some(_) => Ok(()),
            None if exchange.is_passive() => {
                Err(format!("NOT_FOUND - no exchange '{}'", exchange.name()).into())
            }
            None => {
                state.exchanges.insert(
                    exchange.name().to_string(),
                    ExchangeState {
                        exchange_type: exchange.exchange_type(),
                        bindings: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn queue_declare(&self, queue: &AmqpQueue) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();

        if state.queues.contains_key(queue.name()) {
            return Ok(());
        }

        if queue.is_passive() {
            return Err(format!("NOT_FOUND - no queue '{}'", queue.name()).into());
        }

        state.queues.insert(queue.name().to_string(), QueueState::default());
        Ok(())
    }

    async fn exchange_bind(&self, destination: &str, source: &str, routing_key: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();

        if !state.exchanges.contains_key(destination) {
            return Err(format!("NOT_FOUND - no exchange '{}'", destination).into());
        }

        let source = state
            .exchanges
            .get_mut(source)
            .ok_or_else(|| format!("NOT_FOUND - no exchange '{}'", source))?;

        add_binding(
            source,
            Binding {
                target: BindTarget::Exchange(destination.to_string()),
                routing_key: routing_key.to_string(),
                arguments: Arguments::new(),
            },
        );

        Ok(())
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: &Arguments,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();

        if !state.queues.contains_key(queue) {
            return Err(format!("NOT_FOUND - no queue '{}'", queue).into());
        }

        let exchange = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| format!("NOT_FOUND - no exchange '{}'", exchange))?;

        add_binding(
            exchange,
            Binding {
                target: BindTarget::Queue(queue.to_string()),
                routing_key: routing_key.to_string(),
                arguments: arguments.clone(),
            },
        );

        Ok(())
    }

    async fn publish(&self, message: AmqpPublish) -> Result<(), BrokerError> {
        self.ensure_open()?;

        if !message.exchange.is_empty() && !self.broker.state.lock().exchanges.contains_key(&message.exchange) {
            return Err(format!("NOT_FOUND - no exchange '{}'", message.exchange).into());
        }

        if let Some(buffer) = self.transaction.lock().as_mut() {
            buffer.push(message);
            return Ok(());
        }

        let mut state = self.broker.state.lock();
        deliver(&mut state, &self.broker, message);
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<BoxStream<'static, Result<AmqpDelivery, BrokerError>>, BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();

        if !state.queues.contains_key(queue) {
            return Err(format!("NOT_FOUND - no queue '{}'", queue).into());
        }

        if state.consumers.contains_key(consumer_tag) {
            return Err(format!("NOT_ALLOWED - attempt to reuse consumer tag '{}'", consumer_tag).into());
        }

        let (sender, receiver) = mpsc::unbounded_channel();

        state.consumers.insert(consumer_tag.to_string(), queue.to_string());
        if let Some(queue_state) = state.queues.get_mut(queue) {
            queue_state.consumers.push(ConsumerSlot {
                tag: consumer_tag.to_string(),
                channel_id: self.id,
                sender,
            });
        }
        dispatch(&mut state, &self.broker, queue);

        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();

        if let Some(queue) = state.consumers.remove(consumer_tag) {
            if let Some(queue) = state.queues.get_mut(&queue) {
                queue.consumers.retain(|slot| slot.tag != consumer_tag);
            }
        }

        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.settle(delivery_tag, false)
    }

    async fn nack(&self, delivery_tag: u64, _multiple: bool, requeue: bool) -> Result<(), BrokerError> {
        self.settle(delivery_tag, requeue)
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.settle(delivery_tag, requeue)
    }

    async fn tx_select(&self) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut transaction = self.transaction.lock();
        if transaction.is_none() {
            *transaction = Some(Vec::new());
        }
        Ok(())
    }

    async fn tx_commit(&self) -> Result<(), BrokerError> {
        self.ensure_open()?;

        let buffered = match self.transaction.lock().as_mut() {
            Some(buffer) => std::mem::take(buffer),
            None => return Err("PRECONDITION_FAILED - channel is not transactional".into()),
        };

        let mut state = self.broker.state.lock();
        for message in buffered {
            deliver(&mut state, &self.broker, message);
        }

        Ok(())
    }

    async fn tx_rollback(&self) -> Result<(), BrokerError> {
        self.ensure_open()?;

        match self.transaction.lock().as_mut() {
            Some(buffer) => {
                buffer.clear();
                Ok(())
            }
            None => Err("PRECONDITION_FAILED - channel is not transactional".into()),
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let mut state = self.broker.state.lock();
        let channel_id = self.id;

        let mut cancelled = Vec::new();
        for queue in state.queues.values_mut() {
            queue.consumers.retain(|slot| {
                let owned = slot.channel_id == channel_id;
                if owned {
                    cancelled.push(slot.tag.clone());
                }
                !owned
            });
        }
        for tag in cancelled {
            state.consumers.remove(&tag);
        }

        requeue_unacked(&mut state, &self.broker, |unacked| unacked.channel_id == channel_id);

        Ok(())
    }
}

fn add_binding(exchange: &mut ExchangeState, binding: Binding) {
    let duplicate = exchange
        .bindings
        .iter()
        .any(|existing| existing.target == binding.target && existing.routing_key == binding.routing_key);

    if !duplicate {
        exchange.bindings.push(binding);
    }
}

/// Route a published message into every matching queue
fn deliver(state: &mut BrokerState, broker: &BrokerInner, message: AmqpPublish) {
    let queues = route(state, &message.exchange, &message.routing_key, &message.headers);

    if queues.is_empty() {
        if message.mandatory {
            tracing::warn!(
                exchange = %message.exchange,
                routing_key = %message.routing_key,
                "Mandatory message could not be routed"
            );
        }
        return;
    }

    let stored = StoredMessage {
        exchange: message.exchange,
        routing_key: message.routing_key,
        body: message.body,
        headers: message.headers,
        redelivered: false,
    };

    for queue in queues {
        enqueue(state, broker, &queue, stored.clone(), false);
    }
}

fn route(state: &BrokerState, exchange: &str, routing_key: &str, headers: &Headers) -> Vec<String> {
    // default exchange routes by queue name
    if exchange.is_empty() {
        return state
            .queues
            .contains_key(routing_key)
            .then(|| vec![routing_key.to_string()])
            .unwrap_or_default();
    }

    let mut queues = Vec::new();
    let mut visited = HashSet::new();
    collect_queues(state, exchange, routing_key, headers, &mut visited, &mut queues);
    queues
}

fn collect_queues(
    state: &BrokerState,
    exchange: &str,
    routing_key: &str,
    headers: &Headers,
    visited: &mut HashSet<String>,
    queues: &mut Vec<String>,
) {
    if !visited.insert(exchange.to_string()) {
        return;
    }

    let Some(exchange) = state.exchanges.get(exchange) else {
        return;
    };

    for binding in &exchange.bindings {
        if !binding_matches(exchange.exchange_type, binding, routing_key, headers) {
            continue;
        }

        match &binding.target {
            BindTarget::Queue(queue) => {
                if !queues.contains(queue) {
                    queues.push(queue.clone());
                }
            }
            BindTarget::Exchange(destination) => {
                collect_queues(state, destination, routing_key, headers, visited, queues);
            }
        }
    }
}

fn binding_matches(
    exchange_type: AmqpExchangeType,
    binding: &Binding,
    routing_key: &str,
    headers: &Headers,
) -> bool {
    match exchange_type {
        AmqpExchangeType::Fanout => true,
        AmqpExchangeType::Direct | AmqpExchangeType::Delayed => binding.routing_key == routing_key,
        AmqpExchangeType::Topic => {
            let pattern: Vec<&str> = binding.routing_key.split('.').collect();
            let key: Vec<&str> = routing_key.split('.').collect();
            topic_matches(&pattern, &key)
        }
        AmqpExchangeType::Headers => headers_match(&binding.arguments, headers),
    }
}

/// `*` matches exactly one word, `#` matches zero or more words
fn topic_matches(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.split_first(), key.split_first()) {
        (None, None) => true,
        (Some((&"#", rest)), _) => {
            topic_matches(rest, key) || (!key.is_empty() && topic_matches(pattern, &key[1..]))
        }
        (Some((&"*", rest)), Some((_, key_rest))) => topic_matches(rest, key_rest),
        (Some((word, rest)), Some((part, key_rest))) => word == part && topic_matches(rest, key_rest),
        _ => false,
    }
}

fn headers_match(arguments: &Arguments, headers: &Headers) -> bool {
    let match_any = matches!(arguments.get("x-match"), Some(HeaderValue::String(mode)) if mode == "any");

    let mut expected = arguments.iter().filter(|(key, _)| !key.starts_with("x-")).peekable();
    if expected.peek().is_none() {
        return true;
    }

    let mut matched = expected.map(|(key, value)| headers.get(key) == Some(value));

    if match_any {
        matched.any(|hit| hit)
    } else {
        matched.all(|hit| hit)
    }
}

fn enqueue(state: &mut BrokerState, broker: &BrokerInner, queue: &str, message: StoredMessage, front: bool) {
    let Some(queue_state) = state.queues.get_mut(queue) else {
        return;
    };

    if front {
        queue_state.ready.push_front(message);
    } else {
        queue_state.ready.push_back(message);
    }

    dispatch(state, broker, queue);
}

/// Hand ready messages to the queue's consumers in round-robin order
fn dispatch(state: &mut BrokerState, broker: &BrokerInner, queue: &str) {
    let BrokerState {
        queues,
        consumers,
        unacked,
        ..
    } = state;

    let Some(queue_state) = queues.get_mut(queue) else {
        return;
    };

    while !queue_state.consumers.is_empty() {
        let Some(message) = queue_state.ready.pop_front() else {
            break;
        };

        let index = queue_state.cursor % queue_state.consumers.len();
        queue_state.cursor = queue_state.cursor.wrapping_add(1);

        let delivery_tag = broker.next_delivery_tag.fetch_add(1, Ordering::SeqCst) + 1;
        let slot = &queue_state.consumers[index];

        let delivery = AmqpDelivery {
            delivery_tag,
            exchange: message.exchange.clone(),
            routing_key: message.routing_key.clone(),
            body: message.body.clone(),
            headers: message.headers.clone(),
            redelivered: message.redelivered,
        };

        if slot.sender.send(Ok(delivery)).is_err() {
            // receiving side dropped the stream
            let slot = queue_state.consumers.remove(index);
            consumers.remove(&slot.tag);
            queue_state.ready.push_front(message);
            continue;
        }

        unacked.insert(
            delivery_tag,
            Unacked {
                queue: queue.to_string(),
                channel_id: slot.channel_id,
                message,
            },
        );
    }
}

fn requeue_unacked(state: &mut BrokerState, broker: &BrokerInner, filter: impl Fn(&Unacked) -> bool) {
    let mut tags: Vec<u64> = state
        .unacked
        .iter()
        .filter(|(_, unacked)| filter(unacked))
        .map(|(tag, _)| *tag)
        .collect();

    // oldest delivery ends up first in the queue
    tags.sort_unstable_by(|a, b| b.cmp(a));

    for tag in tags {
        if let Some(unacked) = state.unacked.remove(&tag) {
            let mut message = unacked.message;
            message.redelivered = true;
            enqueue(state, broker, &unacked.queue, message, true);
        }
    }
}
