//! Producer-side client for publish/acknowledge messaging brokers
//!
//! This library accepts application messages, hands them to an asynchronous
//! transport for transmission, and lets the caller learn through a bounded
//! `flush` that every accepted message has been acknowledged or has failed,
//! without writing any callback code.
//!
//! Each accepted message is tracked by a correlation token until the
//! transport's delivery callback reports its outcome. The callback receives
//! only an opaque client handle, so producers register in a process-wide
//! registry keyed by that handle, and deregister before releasing it.
//!

// Import all sub modules once...
mod config;
mod domain;
mod macros;
mod producer;
mod producer_builder;
mod sync;
mod transport;

mod error;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use producer::{ErrorObserver, Producer, FLUSH_POLL_SLICE};
pub use producer_builder::ProducerBuilder;

pub use config::{ClientConfig, TopicConfig};

pub use error::{DeliveryError, Error, Result};

pub use transport::{
    //
    create_memory_transport,
    create_memory_transport_with_hub,
    AckMode,
    MemoryHub,
};

// --- public re-exports
pub use domain::{
    //
    ClientHandle,
    ClientKind,
    Delivered,
    DeliveryCallback,
    DeliveryFailure,
    DeliveryReport,
    Opaque,
    ProduceFailure,
    TopicFailure,
    TopicHandle,
    Transport,
    TransportPtr,
};
