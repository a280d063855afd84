//! Producer with delivery correlation and bounded flush.
//!
//! Every accepted message is tracked by a [`DeliveryToken`] until the
//! transport reports its terminal outcome. Reports arrive through a single
//! per-client callback that knows only the client handle, so each producer
//! registers itself in the process-wide [`CorrelationRegistry`] under that
//! handle and the callback routes reports back through it.
//!
//! Lifecycle of a token:
//!
//! ```text
//! allocate ──produce ok──▶ outstanding ──report──▶ retired
//!     │
//!     └──produce rejected──▶ freed
//! ```
//!
//! Teardown deregisters the producer first, then releases the topic and
//! client handles, then drops whatever tokens are still outstanding. A
//! report that fires after deregistration is ignored.

mod registry;
mod token;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::Notify;

use crate::sync::lock_ignore_poison;
use crate::{
    // ---
    log_debug,
    log_info,
    log_warn,
    ClientConfig,
    ClientHandle,
    ClientKind,
    DeliveryError,
    DeliveryReport,
    Error,
    Opaque,
    ProduceFailure,
    Result,
    TopicConfig,
    TopicHandle,
    TransportPtr,
};

use registry::CorrelationRegistry;
use token::{DeliveryToken, OutstandingSet};

/// Longest single poll issued by [`Producer::flush`].
pub const FLUSH_POLL_SLICE: Duration = Duration::from_millis(100);

/// Observer notified of messages that failed after being accepted.
///
/// Runs on whichever task is polling the transport, inside the delivery
/// callback. It must not block.
pub type ErrorObserver = Arc<dyn Fn(&DeliveryError) + Send + Sync>;

/// State shared between a [`Producer`] and the delivery callback.
pub(crate) struct ProducerCore {
    // ---
    topic: String,
    outstanding: Mutex<OutstandingSet>,
    drained: Notify,
    observer: Mutex<Option<ErrorObserver>>,
}

impl ProducerCore {
    // ---
    fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            outstanding: Mutex::new(OutstandingSet::new()),
            drained: Notify::new(),
            observer: Mutex::new(None),
        }
    }

    fn outstanding(&self) -> usize {
        lock_ignore_poison(&self.outstanding).len()
    }

    /// Track `token` and hand it to `produce`, withdrawing it again if the
    /// transport rejects the message.
    ///
    /// The token is tracked before `produce` runs so that a report polled
    /// on another task always finds it. No lock is held across `produce`.
    fn accept<F>(
        &self,
        token: DeliveryToken,
        produce: F,
    ) -> std::result::Result<(), ProduceFailure>
    where
        F: FnOnce(Opaque) -> std::result::Result<(), ProduceFailure>,
    {
        // ---
        let opaque = token.opaque();
        let fresh = lock_ignore_poison(&self.outstanding).insert(token);
        debug_assert!(fresh, "sequence numbers are never reused");

        if let Err(reason) = produce(opaque) {
            let drained = {
                let mut outstanding = lock_ignore_poison(&self.outstanding);
                outstanding.take(opaque);
                outstanding.is_empty()
            };
            if drained {
                self.drained.notify_waiters();
            }
            return Err(reason);
        }
        Ok(())
    }

    #[cfg(test)]
    fn track(&self, token: DeliveryToken) {
        lock_ignore_poison(&self.outstanding).insert(token);
    }

    /// Retire the token named by `report`.
    ///
    /// Reports for tokens that are not outstanding (duplicates, or tokens
    /// abandoned at teardown) are ignored. Returns true if a token was
    /// retired.
    fn retire(&self, report: DeliveryReport) -> bool {
        // ---
        let (token, drained) = {
            let mut outstanding = lock_ignore_poison(&self.outstanding);
            let token = outstanding.take(report.opaque);
            (token, outstanding.is_empty())
        };

        let Some(token) = token else {
            log_debug!(
                "{}: ignoring report for token {} (not outstanding)",
                self.topic,
                report.opaque.0
            );
            return false;
        };

        let sequence = token.retire();

        if let Err(failure) = report.outcome {
            log_warn!("{}: delivery of message {sequence} failed: {failure}", self.topic);

            let observer = lock_ignore_poison(&self.observer).clone();
            if let Some(observer) = observer {
                observer(&DeliveryError {
                    topic: self.topic.clone(),
                    sequence,
                    failure,
                });
            }
        }

        if drained {
            self.drained.notify_waiters();
        }
        true
    }
}

/// Producer bound to a single topic.
///
/// `send` hands messages to the transport without waiting; `flush` waits, up
/// to a deadline, for every accepted message to be acknowledged or to fail.
/// Failures that happen after a message was accepted are never returned
/// from `send`: they reach the [`ErrorObserver`], if one is set, and the
/// message simply stops counting as outstanding.
///
/// `Producer` is `Send + Sync`; wrap it in an `Arc` to send from several
/// tasks while another one flushes.
///
/// # Example
///
/// ```
/// use mom_producer::{create_memory_transport, Producer};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> mom_producer::Result<()> {
/// let producer = Producer::new(create_memory_transport(), "orders", None, None)?;
///
/// producer.send("hello", None)?;
/// let remaining = producer.flush(Duration::from_secs(1)).await;
/// assert_eq!(remaining, 0);
/// # Ok(())
/// # }
/// ```
pub struct Producer {
    // ---
    core: Arc<ProducerCore>,
    transport: TransportPtr,
    client: ClientHandle,
    topic_handle: TopicHandle,
    sequence: AtomicU64,
}

impl Producer {
    /// Create a producer for `topic`.
    ///
    /// Both configurations are cloned; later changes by the caller do not
    /// affect the producer. `None` selects defaults.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if the transport client cannot be created
    /// - [`Error::Topic`] if the topic handle cannot be created
    pub fn new(
        transport: TransportPtr,
        topic: &str,
        topic_config: Option<&TopicConfig>,
        client_config: Option<&ClientConfig>,
    ) -> Result<Self> {
        // ---
        let mut client_config = client_config.cloned().unwrap_or_default();
        client_config.set_delivery_callback(registry::delivery_callback());
        let topic_config = topic_config.cloned();

        let client = transport
            .create_client(ClientKind::Producer, &client_config)
            .map_err(|err| match err {
                Error::Connection(reason) => Error::Connection(reason),
                other => Error::Connection(other.to_string()),
            })?;

        let topic_handle = match transport.create_topic(client, topic, topic_config.as_ref()) {
            Ok(handle) => handle,
            Err(reason) => {
                transport.destroy_client(client);
                return Err(Error::Topic {
                    topic: topic.to_string(),
                    reason,
                });
            }
        };

        let core = Arc::new(ProducerCore::new(topic));
        CorrelationRegistry::global().register(client, &core);

        log_info!(
            "{}: producer for {topic} created ({client})",
            transport.transport_id()
        );

        Ok(Self {
            core,
            transport,
            client,
            topic_handle,
            sequence: AtomicU64::new(0),
        })
    }

    /// Queue one message, optionally keyed.
    ///
    /// On success the message is outstanding until its delivery report is
    /// processed by [`flush`](Self::flush) or [`poll`](Self::poll).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Send`] with the transport's reason if the message was
    /// rejected immediately. The outstanding count is unchanged in that case.
    pub fn send(&self, payload: impl Into<Bytes>, key: Option<Bytes>) -> Result<()> {
        // ---
        let payload = payload.into();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let token = DeliveryToken::allocate(sequence);

        self.core
            .accept(token, |opaque| {
                self.transport
                    .produce(self.topic_handle, payload, key, opaque)
            })
            .map_err(|reason| {
                log_warn!("{}: message {sequence} rejected: {reason}", self.core.topic);
                Error::Send(reason)
            })
    }

    /// Queue several messages in order.
    ///
    /// Rejected messages are logged and skipped. Returns how many messages
    /// were accepted.
    pub fn send_batch<I, P>(&self, messages: I) -> usize
    where
        I: IntoIterator<Item = (P, Option<Bytes>)>,
        P: Into<Bytes>,
    {
        // ---
        messages
            .into_iter()
            .map(|(payload, key)| self.send(payload, key))
            .filter(Result::is_ok)
            .count()
    }

    /// Poll the transport once, waiting at most `max_wait` for reports.
    ///
    /// Returns the number of reports the transport dispatched.
    pub async fn poll(&self, max_wait: Duration) -> usize {
        self.transport.poll(self.client, max_wait).await
    }

    /// Wait until every accepted message has been reported, or `timeout`
    /// has elapsed.
    ///
    /// Polls the transport in slices of at most [`FLUSH_POLL_SLICE`] and wakes
    /// early when the last outstanding token is retired from another task.
    /// A zero timeout returns immediately without polling.
    ///
    /// Never fails: returns the number of messages still outstanding, which
    /// is zero when everything was confirmed.
    pub async fn flush(&self, timeout: Duration) -> usize {
        // ---
        let deadline = Instant::now().checked_add(timeout);

        loop {
            let drained = self.core.drained.notified();

            let remaining = self.outstanding();
            if remaining == 0 {
                return 0;
            }

            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        log_warn!(
                            "{}: flush timed out with {remaining} message(s) outstanding",
                            self.core.topic
                        );
                        return remaining;
                    }
                    (deadline - now).min(FLUSH_POLL_SLICE)
                }
                None => FLUSH_POLL_SLICE,
            };

            tokio::select! {
                _ = self.transport.poll(self.client, slice) => {}
                _ = drained => {}
            }
        }
    }

    /// Number of accepted messages not yet reported.
    pub fn outstanding(&self) -> usize {
        self.core.outstanding()
    }

    pub fn topic(&self) -> &str {
        &self.core.topic
    }

    /// Client name assigned by the transport.
    pub fn name(&self) -> String {
        self.transport.client_name(self.client)
    }

    pub fn client_handle(&self) -> ClientHandle {
        self.client
    }

    /// Sequence number issued to the most recent `send`, accepted or not.
    /// Zero before the first send.
    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Add a comma-separated list of `host[:port]` brokers.
    ///
    /// Returns the number of brokers added.
    pub fn connect(&self, brokers: &str) -> usize {
        // ---
        let added = self.transport.add_brokers(self.client, brokers);
        log_info!("{}: {added} broker(s) added from {brokers:?}", self.name());
        added
    }

    /// Install the observer for failures of accepted messages, replacing any
    /// previous one.
    pub fn set_error_observer<F>(&self, observer: F)
    where
        F: Fn(&DeliveryError) + Send + Sync + 'static,
    {
        self.replace_error_observer(Some(Arc::new(observer)));
    }

    pub fn clear_error_observer(&self) {
        self.replace_error_observer(None);
    }

    pub(crate) fn replace_error_observer(&self, observer: Option<ErrorObserver>) {
        *lock_ignore_poison(&self.core.observer) = observer;
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        // ---
        // Deregister before releasing anything the callback could reach.
        CorrelationRegistry::global().deregister(self.client);

        self.transport.destroy_topic(self.topic_handle);
        self.transport.destroy_client(self.client);

        let abandoned = lock_ignore_poison(&self.core.outstanding).abandon_all();
        if abandoned > 0 {
            log_warn!(
                "{}: producer dropped with {abandoned} message(s) unconfirmed",
                self.core.topic
            );
        }
        self.core.drained.notify_waiters();

        log_info!("{}: producer for {} destroyed", self.client, self.core.topic);
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // ---
        f.debug_struct("Producer")
            .field("topic", &self.core.topic)
            .field("client", &self.client)
            .field("outstanding", &self.outstanding())
            .field("last_sequence", &self.last_sequence())
            .finish()
    }
}
