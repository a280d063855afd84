//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Transport` trait. It is intended primarily for testing, local execution,
//! and as a reference for transport semantics.
//!
//! ## Reference Semantics
//!
//! The in-memory transport defines the **reference behavior** for the transport
//! layer. All other transport implementations are expected to approximate this
//! behavior as closely as their underlying systems allow and to document any
//! unavoidable deviations.
//!
//! In particular, the in-memory transport establishes the following expectations:
//!
//! - `produce()` either rejects a message immediately or queues it; it never
//!   fires the delivery callback itself.
//! - Delivery reports fire only from inside `poll()`, on the polling task,
//!   after the transport's own lock has been released.
//! - Every accepted message produces exactly one report, unless its client is
//!   destroyed first.
//! - A message not acknowledged within the topic's `message.timeout.ms`
//!   fails with [`DeliveryFailure::MessageTimedOut`] as soon as that time is
//!   up, whether or not an acknowledgment ever arrives.
//! - A rejected `produce()` leaves no trace: injected delivery failures and
//!   partition assignment carry over to the next accepted message.
//!
//! ## Non-Goals
//!
//! This transport does not attempt to emulate the wire protocol, batching, or
//! retry behavior of any specific broker. It exists to provide a clear,
//! deterministic baseline against which producer behavior can be validated.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::Notify;

use crate::{
    // ---
    log_debug,
    sync::lock_ignore_poison,
    ClientConfig,
    ClientHandle,
    ClientKind,
    DeliveryCallback,
    DeliveryFailure,
    DeliveryReport,
    Error,
    Opaque,
    ProduceFailure,
    Result,
    TopicConfig,
    TopicFailure,
    TopicHandle,
    Transport,
    TransportPtr,
};

/// Longest legal topic name.
const MAX_TOPIC_NAME_LEN: usize = 249;

/// Client handles are process-unique across every hub so that independent
/// hubs never alias each other in the correlation registry.
static NEXT_CLIENT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// How accepted messages become acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Each message completes `latency` after it was produced.
    Auto { latency: Duration },

    /// Messages wait until [`MemoryHub::acknowledge_all`] or
    /// [`MemoryHub::acknowledge`] releases them.
    Manual,
}

impl Default for AckMode {
    fn default() -> Self {
        AckMode::Auto {
            latency: Duration::ZERO,
        }
    }
}

struct PendingMessage {
    // ---
    opaque: Opaque,
    topic_id: u64,
    partition: i32,
    payload: Bytes,
    produced_at: Instant,
    ready_at: Option<Instant>,
    expires_at: Option<Instant>,
    injected: Option<DeliveryFailure>,
}

impl PendingMessage {
    /// When this message reports: at its acknowledgment, or at its expiry
    /// if that comes first.
    fn completes_at(&self) -> Option<Instant> {
        match (self.ready_at, self.expires_at) {
            (Some(ack), Some(expiry)) => Some(ack.min(expiry)),
            (ack, expiry) => ack.or(expiry),
        }
    }

    /// Failure to report for this message, or `None` if it was delivered.
    fn failure(&self) -> Option<DeliveryFailure> {
        // ---
        let acked_in_time = match (self.ready_at, self.expires_at) {
            (Some(ack), Some(expiry)) => ack <= expiry,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if acked_in_time {
            self.injected.clone()
        } else {
            Some(DeliveryFailure::MessageTimedOut)
        }
    }
}

struct ClientState {
    // ---
    kind: ClientKind,
    name: String,
    callback: Option<DeliveryCallback>,
    queue_limit: usize,
    max_message_bytes: usize,
    brokers: BTreeSet<String>,
    in_flight: VecDeque<PendingMessage>,
}

struct TopicState {
    // ---
    name: String,
    message_timeout: Option<Duration>,
}

#[derive(Default)]
struct HubState {
    // ---
    clients: HashMap<ClientHandle, ClientState>,
    topics: HashMap<TopicHandle, TopicState>,
    next_topic_id: u64,
    producers_created: u64,
    consumers_created: u64,
    partitions: i32,
    round_robin: i32,
    ack_mode: AckMode,
    duplicate_reports: bool,
    offsets: HashMap<(String, i32), i64>,
    delivered: HashMap<String, Vec<Bytes>>,
    fail_next_client: Option<String>,
    fail_next_topic: Option<TopicFailure>,
    fail_next_produce: VecDeque<ProduceFailure>,
    fail_next_delivery: VecDeque<DeliveryFailure>,
}

/// Shared message bus for the in-memory transport.
///
/// Simulates a broker within a single process. Acknowledgment timing and
/// failures are controlled through the methods on this type, which makes it
/// the test double for every producer scenario.
///
/// # ⚠️  Testing Only - Subject to Change
///
/// **The control methods on this type exist for `mom-producer`'s own tests
/// and demos.** They may change without a deprecation cycle.
///
/// # Usage in Integration Tests
///
/// ```
/// # use mom_producer::{MemoryHub, Producer};
/// # use std::time::Duration;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> mom_producer::Result<()> {
/// let hub = MemoryHub::new();
/// hub.set_manual_acks();
///
/// let transport = mom_producer::create_memory_transport_with_hub(hub.clone());
/// let producer = Producer::new(transport, "orders", None, None)?;
///
/// producer.send("hello", None)?;
/// assert_eq!(producer.outstanding(), 1);
///
/// hub.acknowledge_all();
/// producer.flush(Duration::from_secs(1)).await;
/// assert_eq!(producer.outstanding(), 0);
/// # Ok(())
/// # }
/// ```
pub struct MemoryHub {
    // ---
    state: Mutex<HubState>,
    progress: Notify,
}

impl MemoryHub {
    /// Create a new, empty hub with a single partition and immediate acks.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acknowledge every message `latency` after it was produced.
    pub fn set_ack_latency(&self, latency: Duration) {
        // ---
        lock_ignore_poison(&self.state).ack_mode = AckMode::Auto { latency };
        self.progress.notify_waiters();
    }

    /// Hold every message until it is explicitly acknowledged.
    pub fn set_manual_acks(&self) {
        lock_ignore_poison(&self.state).ack_mode = AckMode::Manual;
    }

    /// Current acknowledgment mode.
    pub fn ack_mode(&self) -> AckMode {
        lock_ignore_poison(&self.state).ack_mode
    }

    /// Number of partitions every topic has. Values below 1 are clamped.
    pub fn set_partitions(&self, partitions: i32) {
        lock_ignore_poison(&self.state).partitions = partitions.max(1);
    }

    /// Fire every delivery report twice, simulating a spurious duplicate
    /// callback from the engine.
    pub fn set_duplicate_reports(&self, enabled: bool) {
        lock_ignore_poison(&self.state).duplicate_reports = enabled;
    }

    /// Make the next `create_client()` fail with `reason`.
    pub fn fail_next_client(&self, reason: impl Into<String>) {
        lock_ignore_poison(&self.state).fail_next_client = Some(reason.into());
    }

    /// Make the next `create_topic()` fail with `failure`.
    pub fn fail_next_topic(&self, failure: TopicFailure) {
        lock_ignore_poison(&self.state).fail_next_topic = Some(failure);
    }

    /// Reject the next `produce()` with `failure`. Calls queue up.
    pub fn fail_next_produce(&self, failure: ProduceFailure) {
        lock_ignore_poison(&self.state)
            .fail_next_produce
            .push_back(failure);
    }

    /// Accept the next produced message but report `failure` for it.
    pub fn fail_next_delivery(&self, failure: DeliveryFailure) {
        lock_ignore_poison(&self.state)
            .fail_next_delivery
            .push_back(failure);
    }

    /// Release every held message of every client. Returns how many were
    /// released.
    pub fn acknowledge_all(&self) -> usize {
        self.acknowledge(usize::MAX)
    }

    /// Release up to `count` held messages, oldest first across clients.
    pub fn acknowledge(&self, count: usize) -> usize {
        // ---
        let now = Instant::now();
        let mut released = 0;

        {
            let mut state = lock_ignore_poison(&self.state);
            let mut held: Vec<&mut PendingMessage> = state
                .clients
                .values_mut()
                .flat_map(|client| client.in_flight.iter_mut())
                .filter(|msg| msg.ready_at.is_none())
                .collect();
            held.sort_by_key(|msg| msg.produced_at);

            for msg in held.into_iter().take(count) {
                msg.ready_at = Some(now);
                released += 1;
            }
        }

        if released > 0 {
            self.progress.notify_waiters();
        }
        released
    }

    /// Number of messages accepted but not yet reported, across clients.
    pub fn in_flight(&self) -> usize {
        // ---
        lock_ignore_poison(&self.state)
            .clients
            .values()
            .map(|client| client.in_flight.len())
            .sum()
    }

    /// Payloads acknowledged on `topic`, in acknowledgment order.
    pub fn delivered(&self, topic: &str) -> Vec<Bytes> {
        // ---
        lock_ignore_poison(&self.state)
            .delivered
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of live clients.
    pub fn client_count(&self) -> usize {
        lock_ignore_poison(&self.state).clients.len()
    }

    /// Number of live topic handles.
    pub fn topic_count(&self) -> usize {
        lock_ignore_poison(&self.state).topics.len()
    }

    fn create_client(
        &self,
        transport_id: &str,
        kind: ClientKind,
        config: &ClientConfig,
    ) -> Result<ClientHandle> {
        // ---
        let mut state = lock_ignore_poison(&self.state);

        if let Some(reason) = state.fail_next_client.take() {
            return Err(Error::Connection(reason));
        }

        let client_id = config.get("client.id")?;
        let queue_limit = usize::try_from(config.get_int("queue.buffering.max.messages")?)
            .map_err(|_| Error::Connection("queue.buffering.max.messages out of range".into()))?;
        let max_message_bytes = usize::try_from(config.get_int("message.max.bytes")?)
            .map_err(|_| Error::Connection("message.max.bytes out of range".into()))?;

        let sequence = match kind {
            ClientKind::Producer => {
                state.producers_created += 1;
                state.producers_created
            }
            ClientKind::Consumer => {
                state.consumers_created += 1;
                state.consumers_created
            }
        };

        let handle = ClientHandle(NEXT_CLIENT_HANDLE.fetch_add(1, Ordering::Relaxed));
        let mut client = ClientState {
            kind,
            name: format!("{client_id}#{kind}-{sequence}"),
            callback: config.delivery_callback().cloned(),
            queue_limit,
            max_message_bytes,
            brokers: BTreeSet::new(),
            in_flight: VecDeque::new(),
        };
        add_broker_list(&mut client.brokers, &config.get("bootstrap.servers")?);

        log_debug!("{transport_id}: created {} ({handle})", client.name);
        state.clients.insert(handle, client);

        Ok(handle)
    }

    fn create_topic(
        &self,
        client: ClientHandle,
        name: &str,
        config: Option<&TopicConfig>,
    ) -> std::result::Result<TopicHandle, TopicFailure> {
        // ---
        let mut state = lock_ignore_poison(&self.state);

        if let Some(failure) = state.fail_next_topic.take() {
            return Err(failure);
        }
        if !state.clients.contains_key(&client) {
            return Err(TopicFailure::UnknownClient(client));
        }
        if !is_valid_topic_name(name) {
            return Err(TopicFailure::InvalidName(name.to_string()));
        }

        let timeout_ms = match config {
            Some(config) => config.get_int("message.timeout.ms"),
            None => TopicConfig::new().get_int("message.timeout.ms"),
        }
        .map_err(|_| TopicFailure::ResourceExhausted)?;

        let message_timeout = match u64::try_from(timeout_ms) {
            Ok(0) | Err(_) => None,
            Ok(ms) => Some(Duration::from_millis(ms)),
        };

        state.next_topic_id += 1;
        let handle = TopicHandle {
            client,
            id: state.next_topic_id,
        };
        state.topics.insert(
            handle,
            TopicState {
                name: name.to_string(),
                message_timeout,
            },
        );

        Ok(handle)
    }

    fn produce(
        &self,
        topic: TopicHandle,
        payload: Bytes,
        key: Option<Bytes>,
        opaque: Opaque,
    ) -> std::result::Result<(), ProduceFailure> {
        // ---
        let now = Instant::now();

        {
            let mut state = lock_ignore_poison(&self.state);

            if let Some(failure) = state.fail_next_produce.pop_front() {
                return Err(failure);
            }

            let (topic_name, timeout) = match state.topics.get(&topic) {
                Some(t) => (t.name.clone(), t.message_timeout),
                None => return Err(ProduceFailure::UnknownTopic(format!("{topic:?}"))),
            };

            let client = state
                .clients
                .get(&topic.client)
                .ok_or_else(|| ProduceFailure::UnknownTopic(topic_name.clone()))?;

            if client.in_flight.len() >= client.queue_limit {
                return Err(ProduceFailure::QueueFull);
            }
            if payload.len() > client.max_message_bytes {
                return Err(ProduceFailure::MessageTooLarge {
                    size: payload.len(),
                    max: client.max_message_bytes,
                });
            }

            // Accepted from here on: only now consume injected failures and
            // advance the round robin.
            let partitions = state.partitions.max(1);
            let partition = match &key {
                Some(key) => partition_for_key(key, partitions),
                None => {
                    state.round_robin = (state.round_robin + 1) % partitions;
                    state.round_robin
                }
            };

            let ready_at = match state.ack_mode {
                AckMode::Auto { latency } => Some(now + latency),
                AckMode::Manual => None,
            };
            let expires_at = timeout.and_then(|timeout| now.checked_add(timeout));
            let injected = state.fail_next_delivery.pop_front();

            let client = state
                .clients
                .get_mut(&topic.client)
                .ok_or(ProduceFailure::UnknownTopic(topic_name))?;

            client.in_flight.push_back(PendingMessage {
                opaque,
                topic_id: topic.id,
                partition,
                payload,
                produced_at: now,
                ready_at,
                expires_at,
                injected,
            });
        }

        self.progress.notify_waiters();
        Ok(())
    }

    /// Take every ready message of `client` and fire its report.
    ///
    /// Reports are built under the hub lock and dispatched after it has been
    /// released, so a callback may call back into the hub.
    fn dispatch_ready(&self, client: ClientHandle) -> usize {
        // ---
        let now = Instant::now();

        let (callback, reports, duplicate) = {
            let mut guard = lock_ignore_poison(&self.state);
            let state = &mut *guard;

            let Some(client_state) = state.clients.get_mut(&client) else {
                return 0;
            };

            let mut ready = Vec::new();
            let mut waiting = VecDeque::with_capacity(client_state.in_flight.len());
            for msg in client_state.in_flight.drain(..) {
                match msg.completes_at() {
                    Some(at) if at <= now => ready.push(msg),
                    _ => waiting.push_back(msg),
                }
            }
            client_state.in_flight = waiting;

            if ready.is_empty() {
                return 0;
            }

            let callback = client_state.callback.clone();
            let mut reports = Vec::with_capacity(ready.len());

            for msg in ready {
                let handle = TopicHandle {
                    client,
                    id: msg.topic_id,
                };
                let topic_name = state
                    .topics
                    .get(&handle)
                    .map(|t| t.name.clone())
                    .unwrap_or_default();

                let report = if let Some(failure) = msg.failure() {
                    DeliveryReport::failed(msg.opaque, failure)
                } else {
                    let offset = state
                        .offsets
                        .entry((topic_name.clone(), msg.partition))
                        .or_insert(0);
                    let report = DeliveryReport::delivered(msg.opaque, msg.partition, *offset);
                    *offset += 1;
                    state.delivered.entry(topic_name).or_default().push(msg.payload);
                    report
                };
                reports.push(report);
            }

            (callback, reports, state.duplicate_reports)
        };

        let fired = reports.len();

        match callback {
            Some(callback) => {
                for report in reports {
                    if duplicate {
                        callback(client, report.clone());
                    }
                    callback(client, report);
                }
            }
            None => {
                log_debug!("{client}: {fired} report(s) dropped, no delivery callback");
            }
        }

        fired
    }

    /// Earliest pending completion time of `client`, if any is scheduled.
    fn next_ready(&self, client: ClientHandle) -> Option<Instant> {
        // ---
        lock_ignore_poison(&self.state)
            .clients
            .get(&client)
            .and_then(|c| c.in_flight.iter().filter_map(PendingMessage::completes_at).min())
    }

    async fn poll(&self, client: ClientHandle, max_wait: Duration) -> usize {
        // ---
        let deadline = Instant::now().checked_add(max_wait);

        loop {
            // Register for progress before inspecting the queue so that a
            // notification between the check and the wait is not lost.
            let progress = self.progress.notified();

            let fired = self.dispatch_ready(client);
            if fired > 0 {
                return fired;
            }

            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                return 0;
            }

            let wake = match (deadline, self.next_ready(client)) {
                (Some(d), Some(r)) => Some(d.min(r)),
                (Some(d), None) => Some(d),
                (None, r) => r,
            };

            match wake {
                Some(at) => {
                    tokio::select! {
                        _ = progress => {}
                        _ = tokio::time::sleep_until(tokio::time::Instant::from_std(at)) => {}
                    }
                }
                None => progress.await,
            }
        }
    }

    fn add_brokers(&self, client: ClientHandle, brokers: &str) -> usize {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        match state.clients.get_mut(&client) {
            Some(client) => add_broker_list(&mut client.brokers, brokers),
            None => 0,
        }
    }

    fn client_name(&self, client: ClientHandle) -> String {
        // ---
        lock_ignore_poison(&self.state)
            .clients
            .get(&client)
            .map(|c| c.name.clone())
            .unwrap_or_default()
    }

    fn destroy_topic(&self, transport_id: &str, topic: TopicHandle) {
        // ---
        if lock_ignore_poison(&self.state).topics.remove(&topic).is_some() {
            log_debug!("{transport_id}: destroyed topic {topic:?}");
        }
    }

    fn destroy_client(&self, transport_id: &str, client: ClientHandle) {
        // ---
        let removed = {
            let mut state = lock_ignore_poison(&self.state);
            state.topics.retain(|handle, _| handle.client != client);
            state.clients.remove(&client)
        };

        if let Some(removed) = removed {
            log_debug!(
                "{transport_id}: destroyed {} {client}, {} report(s) discarded",
                removed.kind,
                removed.in_flight.len()
            );
        }
        self.progress.notify_waiters();
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        // ---
        Self {
            state: Mutex::new(HubState {
                partitions: 1,
                ..HubState::default()
            }),
            progress: Notify::new(),
        }
    }
}

fn is_valid_topic_name(name: &str) -> bool {
    // ---
    !name.is_empty()
        && name.len() <= MAX_TOPIC_NAME_LEN
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn partition_for_key(key: &[u8], partitions: i32) -> i32 {
    // ---
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let bucket = hasher.finish() % u64::from(partitions.unsigned_abs());
    i32::try_from(bucket).unwrap_or(0)
}

/// Add every valid `host[:port]` entry of a comma-separated list.
///
/// Returns the number of entries that were not already present.
fn add_broker_list(brokers: &mut BTreeSet<String>, list: &str) -> usize {
    // ---
    list.split(',')
        .map(str::trim)
        .filter(|entry| is_valid_broker(entry))
        .filter(|entry| brokers.insert(entry.to_string()))
        .count()
}

fn is_valid_broker(entry: &str) -> bool {
    // ---
    let (host, port) = match entry.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (entry, None),
    };

    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    let port_ok = port.map_or(true, |p| p.parse::<u16>().is_ok_and(|p| p > 0));

    host_ok && port_ok
}

/// Process-global hub used by [`create_memory_transport`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport.
///
/// Routes every call through a shared [`MemoryHub`].
struct MemoryTransport {
    // ---
    transport_id: String,
    hub: Arc<MemoryHub>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn transport_id(&self) -> &str {
        &self.transport_id
    }

    fn create_client(&self, kind: ClientKind, config: &ClientConfig) -> Result<ClientHandle> {
        self.hub.create_client(&self.transport_id, kind, config)
    }

    fn create_topic(
        &self,
        client: ClientHandle,
        name: &str,
        config: Option<&TopicConfig>,
    ) -> std::result::Result<TopicHandle, TopicFailure> {
        self.hub.create_topic(client, name, config)
    }

    fn produce(
        &self,
        topic: TopicHandle,
        payload: Bytes,
        key: Option<Bytes>,
        opaque: Opaque,
    ) -> std::result::Result<(), ProduceFailure> {
        self.hub.produce(topic, payload, key, opaque)
    }

    async fn poll(&self, client: ClientHandle, max_wait: Duration) -> usize {
        self.hub.poll(client, max_wait).await
    }

    fn add_brokers(&self, client: ClientHandle, brokers: &str) -> usize {
        self.hub.add_brokers(client, brokers)
    }

    fn client_name(&self, client: ClientHandle) -> String {
        self.hub.client_name(client)
    }

    fn destroy_topic(&self, topic: TopicHandle) {
        self.hub.destroy_topic(&self.transport_id, topic)
    }

    fn destroy_client(&self, client: ClientHandle) {
        self.hub.destroy_client(&self.transport_id, client)
    }
}

/// Create a new in-memory transport using the process-global hub.
///
/// For isolated parallel testing, use [`create_memory_transport_with_hub`].
pub fn create_memory_transport() -> TransportPtr {
    create_memory_transport_with_hub(global_hub())
}

/// Create a new in-memory transport using the provided hub.
///
/// Allows tests to control acknowledgment timing and failures of one
/// transport without affecting others running in parallel.
pub fn create_memory_transport_with_hub(hub: Arc<MemoryHub>) -> TransportPtr {
    // ---
    let transport_id = format!("memory-{}", uuid::Uuid::new_v4().simple());
    log_debug!("{transport_id}: create memory transport");

    Arc::new(MemoryTransport { transport_id, hub })
}
