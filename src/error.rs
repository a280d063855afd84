use thiserror::Error;

use crate::{DeliveryFailure, ProduceFailure, TopicFailure};

/// Errors surfaced synchronously by producer operations.
///
/// Failures of messages that were already accepted by the transport are
/// not represented here; they reach the caller through the error observer
/// as [`DeliveryError`](crate::DeliveryError) values.
#[derive(Error, Debug)]
pub enum Error {
    /// The transport client could not be constructed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The topic handle could not be constructed.
    #[error("topic {topic:?} unavailable: {reason}")]
    Topic { topic: String, reason: TopicFailure },

    /// The transport refused to queue the message.
    #[error("send rejected: {0}")]
    Send(#[from] ProduceFailure),

    /// Property get or set on an unrecognized key.
    #[error("unknown configuration property: {0}")]
    ConfigKey(String),

    /// Property value does not fit the key's type or range.
    #[error("invalid value {value:?} for {key}: {reason}")]
    ConfigValidation {
        key: String,
        value: String,
        reason: String,
    },

    /// JSON configuration could not be parsed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A required builder field was not provided.
    #[error("missing required configuration: {0}")]
    MissingConfig(String),
}

/// Result type alias for producer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a message after the transport had accepted it.
///
/// Delivered to the producer's error observer from inside the delivery
/// callback; never returned from `send`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("delivery of message {sequence} to {topic:?} failed: {failure}")]
pub struct DeliveryError {
    /// Topic the message was sent to.
    pub topic: String,

    /// Sequence number the producer assigned to the message.
    pub sequence: u64,

    /// Reason reported by the transport.
    pub failure: DeliveryFailure,
}
