// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the narrow interface through which the producer talks
//! to the asynchronous network engine that actually batches and transmits
//! messages. It intentionally avoids any reference to concrete protocols,
//! brokers, or client libraries.
//!
//! The transport layer is responsible only for queueing payloads and later
//! reporting each message's terminal outcome through a single delivery
//! callback. Correlation of those reports back to the producer that sent the
//! message, and the bounded flush built on top of it, are handled elsewhere.
//!
//! Concrete implementations of this interface live under `src/transport/`.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::{ClientConfig, Result, TopicConfig};

/// Role a transport client is created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    // ---
    /// Publishes messages and receives delivery reports.
    Producer,

    /// Retrieves messages. Only construction is supported by this crate.
    Consumer,
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        match self {
            ClientKind::Producer => f.write_str("producer"),
            ClientKind::Consumer => f.write_str("consumer"),
        }
    }
}

/// Opaque client handle issued by a transport.
///
/// Handles are the only identity the delivery callback receives, so a
/// transport must never hand out the same value twice within one process,
/// even across independent transport instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientHandle(pub u64);

impl fmt::Display for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Opaque topic handle bound to one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TopicHandle {
    // ---
    /// Client the topic was created on.
    pub client: ClientHandle,

    /// Transport-assigned topic identifier, unique within the client.
    pub id: u64,
}

/// Correlation value handed to [`Transport::produce`].
///
/// The transport must return it unmodified in the matching
/// [`DeliveryReport`]. It is never interpreted by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opaque(pub u64);

/// Broker coordinates of a successfully acknowledged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    pub partition: i32,
    pub offset: i64,
}

/// Terminal failure of a message that was accepted by the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The message was not acknowledged within `message.timeout.ms`.
    #[error("message timed out")]
    MessageTimedOut,

    /// The broker refused the message after it had been queued.
    #[error("rejected by broker: {0}")]
    Rejected(String),

    /// No broker was reachable for the message's partition.
    #[error("all brokers down")]
    AllBrokersDown,

    /// The partition disappeared after the message was queued.
    #[error("unknown partition {0}")]
    UnknownPartition(i32),
}

/// Immediate rejection reported by [`Transport::produce`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProduceFailure {
    /// The local send queue is at `queue.buffering.max.messages`.
    #[error("local queue full")]
    QueueFull,

    /// Payload exceeds `message.max.bytes`.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The requested partition does not exist.
    #[error("unknown partition {0}")]
    UnknownPartition(i32),

    /// The topic handle is not (or no longer) known to the transport.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// OS-level failure reported as an errno value.
    #[error("os error {0}")]
    Os(i32),
}

/// Reason a topic handle could not be created.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicFailure {
    /// Name is empty, too long, or contains illegal characters.
    #[error("invalid topic name: {0:?}")]
    InvalidName(String),

    /// The transport ran out of topic slots or memory.
    #[error("resource exhausted")]
    ResourceExhausted,

    /// The client handle is not known to the transport.
    #[error("unknown client {0}")]
    UnknownClient(ClientHandle),

    /// OS-level failure reported as an errno value.
    #[error("os error {0}")]
    Os(i32),
}

/// Terminal outcome of one produced message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    // ---
    /// The correlation value given to `produce`.
    pub opaque: Opaque,

    /// Acknowledgment coordinates, or the reason delivery failed.
    pub outcome: std::result::Result<Delivered, DeliveryFailure>,
}

impl DeliveryReport {
    /// Report for an acknowledged message.
    pub fn delivered(opaque: Opaque, partition: i32, offset: i64) -> Self {
        // ---
        Self {
            opaque,
            outcome: Ok(Delivered { partition, offset }),
        }
    }

    /// Report for a message that failed after acceptance.
    pub fn failed(opaque: Opaque, failure: DeliveryFailure) -> Self {
        // ---
        Self {
            opaque,
            outcome: Err(failure),
        }
    }
}

/// Per-client delivery callback.
///
/// Invoked by the transport once per completed message, from inside
/// [`Transport::poll`], with only the client handle and the report.
pub type DeliveryCallback = Arc<dyn Fn(ClientHandle, DeliveryReport) + Send + Sync>;

/// Transport abstraction.
///
/// A `Transport` accepts payloads for asynchronous transmission and later
/// reports each message's terminal outcome. Delivery reports are only
/// dispatched while [`poll`](Transport::poll) is running, on the task that
/// called it.
///
/// Implementations must ensure that:
/// - The delivery callback is taken from the [`ClientConfig`] at
///   `create_client()` time and fires once per message the client accepted.
/// - `produce()` never invokes the delivery callback itself.
/// - `poll()` is cancel-safe: dropping its future never loses a report that
///   was already removed from the transport's queue.
/// - After `destroy_client()` returns, no further reports fire for that handle.
///
/// The in-memory transport serves as the reference implementation of these
/// semantics.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Identifier of this transport instance, used for logging.
    fn transport_id(&self) -> &str;

    /// Create a client of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`](crate::Error::Connection) if the client
    /// cannot be constructed.
    fn create_client(&self, kind: ClientKind, config: &ClientConfig) -> Result<ClientHandle>;

    /// Create a topic handle bound to `client`.
    ///
    /// `config` of `None` selects transport defaults.
    fn create_topic(
        &self,
        client: ClientHandle,
        name: &str,
        config: Option<&TopicConfig>,
    ) -> std::result::Result<TopicHandle, TopicFailure>;

    /// Queue a message for asynchronous transmission.
    ///
    /// On `Ok` the transport owns `payload` until the matching delivery
    /// report has fired.
    fn produce(
        &self,
        topic: TopicHandle,
        payload: Bytes,
        key: Option<Bytes>,
        opaque: Opaque,
    ) -> std::result::Result<(), ProduceFailure>;

    /// Drive I/O and fire the delivery callback for completed messages.
    ///
    /// Waits at most `max_wait`, returning early once at least one report
    /// has fired. Returns the number of reports dispatched.
    async fn poll(&self, client: ClientHandle, max_wait: Duration) -> usize;

    /// Add a comma-separated list of `host[:port]` brokers to the client.
    ///
    /// Returns the number of brokers that were added.
    fn add_brokers(&self, client: ClientHandle, brokers: &str) -> usize;

    /// Human readable client name, e.g. `orders-app#producer-3`.
    fn client_name(&self, client: ClientHandle) -> String;

    /// Release a topic handle. Messages already queued may still complete.
    fn destroy_topic(&self, topic: TopicHandle);

    /// Release a client, discarding any reports that have not fired yet.
    fn destroy_client(&self, client: ClientHandle);
}

/// Shared transport pointer.
///
/// This is an `Arc<dyn Transport>`, which means:
/// - `.clone()` is cheap (only increments a reference count)
/// - Multiple producers may share the same underlying engine
/// - Used to erase concrete transport types behind a stable domain interface.
pub type TransportPtr = Arc<dyn Transport>;
