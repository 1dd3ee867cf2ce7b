//! In-memory broker for testing and single-process deployments.
//!
//! Implements topic exchanges, durable-style queues,
//! bindings, per-consumer prefetch, ack/reject with requeue, auto-delete and
//! exclusive queues, and connection-close notifications. Everything lives
//! behind one `Mutex`, which is never held across an `.await`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::future::BoxFuture;
use tokio::sync::watch;

use super::{
    topic_matches, Acker, Broker, BrokerError, CloseReason, Connection, ConsumeOptions,
    Credentials, Delivery, DeliveryStream, ExchangeOptions, Properties,
    QueueOptions, Session,
};

/// A message accepted by [`Session::publish`], as recorded by the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub properties: Properties,
    pub body: Vec<u8>,
}

impl Published {
    /// Get the body as a string (if valid UTF-8).
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// In-memory broker.
///
/// Cloning shares the same broker, so a test can keep one handle for
/// inspection and fault injection while the code under test connects
/// through another.
///
/// ## Example
///
/// ```
/// use synapse_rust::broker::{
///     Broker, Connection, Credentials, ExchangeOptions, InMemoryBroker, Session,
/// };
///
/// # tokio_test_block(async {
/// let broker = InMemoryBroker::new();
/// let conn = broker.connect(&Credentials::default()).await.unwrap();
/// let session = conn.open_session().await.unwrap();
/// session.declare_exchange("shop", &ExchangeOptions::topic()).await.unwrap();
/// assert!(broker.has_exchange("shop"));
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    exchanges: HashMap<String, ExchangeOptions>,
    queues: HashMap<String, Queue>,
    bindings: Vec<Binding>,
    connections: HashMap<u64, watch::Sender<Option<CloseReason>>>,
    sessions: HashMap<u64, SessionEntry>,
    unacked: HashMap<u64, Unacked>,
    refuse_connects: usize,
    recording: bool,
    stats: Stats,
}

#[derive(Default)]
struct Stats {
    connects: usize,
    exchange_declarations: usize,
    queue_declarations: usize,
    acked: usize,
    rejected: usize,
    published: Vec<Published>,
}

#[derive(Clone, PartialEq, Eq)]
struct Binding {
    exchange: String,
    queue: String,
    routing_key: String,
}

struct SessionEntry {
    connection: u64,
    prefetch: u16,
}

struct Queue {
    options: QueueOptions,
    owner: Option<u64>,
    messages: VecDeque<Message>,
    consumers: Vec<Consumer>,
    next_consumer: usize,
    had_consumer: bool,
}

#[derive(Clone)]
struct Message {
    exchange: String,
    routing_key: String,
    properties: Properties,
    body: Vec<u8>,
    redelivered: bool,
}

struct Consumer {
    id: u64,
    session: u64,
    connection: u64,
    prefetch: u16,
    in_flight: usize,
    exclusive: bool,
    acker: Option<Arc<dyn Acker>>,
    tx: mpsc::UnboundedSender<Delivery>,
}

impl Consumer {
    fn has_capacity(&self) -> bool {
        self.acker.is_none() || self.prefetch == 0 || self.in_flight < self.prefetch as usize
    }
}

struct Unacked {
    queue: String,
    consumer: u64,
    session: u64,
    connection: u64,
    message: Message,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn session(&self, id: u64) -> Result<&SessionEntry, BrokerError> {
        self.sessions.get(&id).ok_or(BrokerError::ChannelClosed)
    }

    fn route(&mut self, message: Message) -> Result<(), BrokerError> {
        if !self.exchanges.contains_key(&message.exchange) {
            return Err(BrokerError::NotFound(format!(
                "exchange '{}'",
                message.exchange
            )));
        }

        let mut targets: Vec<String> = Vec::new();
        for binding in self.bindings.iter().filter(|b| b.exchange == message.exchange) {
            if topic_matches(&binding.routing_key, &message.routing_key)
                && !targets.contains(&binding.queue)
            {
                targets.push(binding.queue.clone());
            }
        }

        for name in targets {
            if let Some(queue) = self.queues.get_mut(&name) {
                queue.messages.push_back(message.clone());
            }
            self.pump(&name);
        }
        Ok(())
    }

    /// Hand queued messages to consumers with spare prefetch capacity,
    /// round-robin.
    fn pump(&mut self, name: &str) {
        loop {
            let Some(queue) = self.queues.get_mut(name) else {
                return;
            };
            if queue.messages.is_empty() || queue.consumers.is_empty() {
                return;
            }

            let count = queue.consumers.len();
            let Some(idx) = (0..count)
                .map(|offset| (queue.next_consumer + offset) % count)
                .find(|&idx| queue.consumers[idx].has_capacity())
            else {
                return;
            };
            queue.next_consumer = (idx + 1) % count;

            let Some(message) = queue.messages.pop_front() else {
                return;
            };

            self.next_id += 1;
            let tag = self.next_id;
            let consumer = &mut queue.consumers[idx];

            let mut delivery = Delivery::new(
                tag,
                message.exchange.clone(),
                message.routing_key.clone(),
                message.properties.clone(),
                message.body.clone(),
            )
            .with_redelivered(message.redelivered);
            if let Some(acker) = &consumer.acker {
                delivery = delivery.with_acker(Arc::clone(acker));
            }

            if consumer.tx.unbounded_send(delivery).is_err() {
                // The consumer dropped its stream.
                queue.messages.push_front(message);
                queue.consumers.remove(idx);
                queue.next_consumer = 0;
                self.auto_delete_if_idle(name);
                continue;
            }

            if consumer.acker.is_some() {
                consumer.in_flight += 1;
                let unacked = Unacked {
                    queue: name.to_string(),
                    consumer: consumer.id,
                    session: consumer.session,
                    connection: consumer.connection,
                    message,
                };
                self.unacked.insert(tag, unacked);
            }
        }
    }

    fn settle(&mut self, session: u64, tag: u64, requeue: Option<bool>) -> Result<(), BrokerError> {
        self.session(session)?;
        let owned = self
            .unacked
            .get(&tag)
            .is_some_and(|u| u.session == session);
        let unacked = owned
            .then(|| self.unacked.remove(&tag))
            .flatten()
            .ok_or_else(|| BrokerError::PreconditionFailed(format!("unknown delivery tag {}", tag)))?;

        if let Some(queue) = self.queues.get_mut(&unacked.queue) {
            if let Some(consumer) = queue.consumers.iter_mut().find(|c| c.id == unacked.consumer) {
                consumer.in_flight = consumer.in_flight.saturating_sub(1);
            }
            if requeue == Some(true) {
                let mut message = unacked.message;
                message.redelivered = true;
                queue.messages.push_front(message);
            }
        }

        match requeue {
            None => self.stats.acked += 1,
            Some(_) => self.stats.rejected += 1,
        }
        self.pump(&unacked.queue);
        Ok(())
    }

    /// Drop sessions: requeue their unacknowledged deliveries and cancel
    /// their consumers.
    fn drop_sessions(&mut self, ids: &[u64]) {
        self.sessions.retain(|id, _| !ids.contains(id));

        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| ids.contains(&u.session))
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable_by(|a, b| b.cmp(a));
        for tag in tags {
            if let Some(unacked) = self.unacked.remove(&tag) {
                if let Some(queue) = self.queues.get_mut(&unacked.queue) {
                    let mut message = unacked.message;
                    message.redelivered = true;
                    queue.messages.push_front(message);
                }
            }
        }

        let names: Vec<String> = self.queues.keys().cloned().collect();
        for name in &names {
            if let Some(queue) = self.queues.get_mut(name) {
                let before = queue.consumers.len();
                queue.consumers.retain(|c| !ids.contains(&c.session));
                if queue.consumers.len() != before {
                    queue.next_consumer = 0;
                }
            }
            self.auto_delete_if_idle(name);
        }
        for name in &names {
            self.pump(name);
        }
    }

    fn close_connection(&mut self, connection: u64, reason: CloseReason) {
        let Some(closed) = self.connections.remove(&connection) else {
            return;
        };

        let sessions: Vec<u64> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.connection == connection)
            .map(|(id, _)| *id)
            .collect();
        self.drop_sessions(&sessions);
        self.unacked.retain(|_, u| u.connection != connection);

        let owned: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, q)| q.owner == Some(connection))
            .map(|(name, _)| name.clone())
            .collect();
        for name in owned {
            self.delete_queue(&name);
        }

        closed.send_replace(Some(reason));
    }

    fn auto_delete_if_idle(&mut self, name: &str) {
        let idle = self
            .queues
            .get(name)
            .map(|q| q.options.auto_delete && q.had_consumer && q.consumers.is_empty())
            .unwrap_or(false);
        if idle {
            self.delete_queue(name);
        }
    }

    fn delete_queue(&mut self, name: &str) {
        self.queues.remove(name);
        self.bindings.retain(|b| b.queue != name);
        self.unacked.retain(|_, u| u.queue != name);
    }
}

impl InMemoryBroker {
    /// Create a new, empty broker. Published messages are routed but not
    /// kept; see [`recording`](Self::recording).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a broker that also keeps a copy of every published message for
    /// [`published`](Self::published) and [`published_to`](Self::published_to).
    /// The record grows without bound, so this is meant for tests.
    pub fn recording() -> Self {
        let broker = Self::default();
        broker.state().recording = true;
        broker
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close every open connection, as if the broker restarted or the
    /// network dropped.
    pub fn drop_connections(&self, reason: &str) {
        let mut state = self.state();
        let ids: Vec<u64> = state.connections.keys().copied().collect();
        for id in ids {
            state.close_connection(id, CloseReason::new(320, reason));
        }
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_connections(&self, count: usize) {
        self.state().refuse_connects = count;
    }

    /// Publish directly into an exchange without a connection, as another
    /// application on the bus would.
    pub fn inject(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: Properties,
        body: Vec<u8>,
    ) -> Result<(), BrokerError> {
        self.state().route(Message {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            properties,
            body,
            redelivered: false,
        })
    }

    /// Number of successful connects so far.
    pub fn connects(&self) -> usize {
        self.state().stats.connects
    }

    pub fn open_connections(&self) -> usize {
        self.state().connections.len()
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.state().exchanges.contains_key(name)
    }

    pub fn exchange_options(&self, name: &str) -> Option<ExchangeOptions> {
        self.state().exchanges.get(name).cloned()
    }

    pub fn exchange_declarations(&self) -> usize {
        self.state().stats.exchange_declarations
    }

    pub fn queue_declarations(&self) -> usize {
        self.state().stats.queue_declarations
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.state().queues.contains_key(name)
    }

    pub fn queue_options(&self, name: &str) -> Option<QueueOptions> {
        self.state().queues.get(name).map(|q| q.options.clone())
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Messages waiting in a queue (not counting unacknowledged ones).
    pub fn queue_len(&self, name: &str) -> usize {
        self.state()
            .queues
            .get(name)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    pub fn consumer_count(&self, name: &str) -> usize {
        self.state()
            .queues
            .get(name)
            .map(|q| q.consumers.len())
            .unwrap_or(0)
    }

    /// Binding routing keys for a queue, in declaration order.
    pub fn bindings_for(&self, queue: &str) -> Vec<String> {
        self.state()
            .bindings
            .iter()
            .filter(|b| b.queue == queue)
            .map(|b| b.routing_key.clone())
            .collect()
    }

    pub fn binding_count(&self) -> usize {
        self.state().bindings.len()
    }

    pub fn acked(&self) -> usize {
        self.state().stats.acked
    }

    pub fn rejected(&self) -> usize {
        self.state().stats.rejected
    }

    pub fn unacked(&self) -> usize {
        self.state().unacked.len()
    }

    /// Every message published through a session, in order. Always empty
    /// unless the broker was built with [`recording`](Self::recording).
    pub fn published(&self) -> Vec<Published> {
        self.state().stats.published.clone()
    }

    /// Published messages whose routing key equals `routing_key`.
    pub fn published_to(&self, routing_key: &str) -> Vec<Published> {
        self.state()
            .stats
            .published
            .iter()
            .filter(|p| p.routing_key == routing_key)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self, _credentials: &Credentials) -> Result<Box<dyn Connection>, BrokerError> {
        let mut state = self.state();
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(BrokerError::ConnectionFailed("connection refused".into()));
        }
        let id = state.next_id();
        let (closed_tx, closed_rx) = watch::channel(None);
        state.connections.insert(id, closed_tx);
        state.stats.connects += 1;
        Ok(Box::new(InMemoryConnection {
            id,
            shared: Arc::clone(&self.shared),
            closed: closed_rx,
        }))
    }
}

struct InMemoryConnection {
    id: u64,
    shared: Arc<Mutex<State>>,
    closed: watch::Receiver<Option<CloseReason>>,
}

impl InMemoryConnection {
    fn state(&self) -> MutexGuard<'_, State> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Connection for InMemoryConnection {
    async fn open_session(&self) -> Result<Arc<dyn Session>, BrokerError> {
        let mut state = self.state();
        if !state.connections.contains_key(&self.id) {
            return Err(BrokerError::ConnectionClosed("connection is closed".into()));
        }
        let id = state.next_id();
        state.sessions.insert(
            id,
            SessionEntry {
                connection: self.id,
                prefetch: 0,
            },
        );
        Ok(Arc::new(InMemorySession {
            id,
            connection: self.id,
            shared: Arc::clone(&self.shared),
        }))
    }

    fn closed(&self) -> BoxFuture<'static, CloseReason> {
        let mut closed = self.closed.clone();
        Box::pin(async move {
            loop {
                if let Some(reason) = closed.borrow_and_update().clone() {
                    return reason;
                }
                if closed.changed().await.is_err() {
                    return CloseReason::new(320, "connection dropped");
                }
            }
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.state()
            .close_connection(self.id, CloseReason::new(200, "closed by client"));
        Ok(())
    }
}

struct InMemorySession {
    id: u64,
    connection: u64,
    shared: Arc<Mutex<State>>,
}

impl InMemorySession {
    fn state(&self) -> MutexGuard<'_, State> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Session for InMemorySession {
    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
        let mut state = self.state();
        let session = state.sessions.get_mut(&self.id).ok_or(BrokerError::ChannelClosed)?;
        session.prefetch = count;
        Ok(())
    }

    async fn declare_exchange(
        &self,
        name: &str,
        options: &ExchangeOptions,
    ) -> Result<(), BrokerError> {
        let mut state = self.state();
        state.session(self.id)?;
        match state.exchanges.get(name) {
            Some(existing) if existing != options => {
                return Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent arguments for exchange '{}'",
                    name
                )));
            }
            Some(_) => {}
            None => {
                state.exchanges.insert(name.to_string(), options.clone());
            }
        }
        state.stats.exchange_declarations += 1;
        Ok(())
    }

    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> Result<(), BrokerError> {
        let mut state = self.state();
        state.session(self.id)?;
        match state.queues.get(name) {
            Some(existing) if existing.options != *options => {
                return Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent arguments for queue '{}'",
                    name
                )));
            }
            Some(existing) if existing.owner.is_some_and(|owner| owner != self.connection) => {
                return Err(BrokerError::PreconditionFailed(format!(
                    "queue '{}' is exclusive to another connection",
                    name
                )));
            }
            Some(_) => {}
            None => {
                let queue = Queue {
                    options: options.clone(),
                    owner: options.exclusive.then_some(self.connection),
                    messages: VecDeque::new(),
                    consumers: Vec::new(),
                    next_consumer: 0,
                    had_consumer: false,
                };
                state.queues.insert(name.to_string(), queue);
            }
        }
        state.stats.queue_declarations += 1;
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        let mut state = self.state();
        state.session(self.id)?;
        if !state.exchanges.contains_key(exchange) {
            return Err(BrokerError::NotFound(format!("exchange '{}'", exchange)));
        }
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::NotFound(format!("queue '{}'", queue)));
        }
        let binding = Binding {
            exchange: exchange.to_string(),
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        };
        if !state.bindings.contains(&binding) {
            state.bindings.push(binding);
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: Properties,
        body: Vec<u8>,
    ) -> Result<(), BrokerError> {
        let mut state = self.state();
        state.session(self.id)?;
        let message = Message {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            properties,
            body,
            redelivered: false,
        };
        let record = state.recording.then(|| Published {
            exchange: message.exchange.clone(),
            routing_key: message.routing_key.clone(),
            properties: message.properties.clone(),
            body: message.body.clone(),
        });
        state.route(message)?;
        if let Some(record) = record {
            state.stats.published.push(record);
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        options: &ConsumeOptions,
    ) -> Result<DeliveryStream, BrokerError> {
        let mut state = self.state();
        let prefetch = state.session(self.id)?.prefetch;
        let id = state.next_id();

        let entry = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::NotFound(format!("queue '{}'", queue)))?;
        let exclusive_conflict = entry.consumers.iter().any(|c| c.exclusive)
            || (options.exclusive && !entry.consumers.is_empty());
        if exclusive_conflict {
            return Err(BrokerError::PreconditionFailed(format!(
                "queue '{}' is in exclusive use",
                queue
            )));
        }

        let (tx, rx) = mpsc::unbounded();
        let acker: Option<Arc<dyn Acker>> = if options.auto_ack {
            None
        } else {
            Some(Arc::new(InMemoryAcker {
                session: self.id,
                shared: Arc::clone(&self.shared),
            }))
        };
        entry.consumers.push(Consumer {
            id,
            session: self.id,
            connection: self.connection,
            prefetch,
            in_flight: 0,
            exclusive: options.exclusive,
            acker,
            tx,
        });
        entry.had_consumer = true;
        state.pump(queue);

        Ok(Box::pin(rx))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.state().drop_sessions(&[self.id]);
        Ok(())
    }
}

struct InMemoryAcker {
    session: u64,
    shared: Arc<Mutex<State>>,
}

impl InMemoryAcker {
    fn state(&self) -> MutexGuard<'_, State> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Acker for InMemoryAcker {
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.state().settle(self.session, delivery_tag, None)
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.state().settle(self.session, delivery_tag, Some(requeue))
    }
}
