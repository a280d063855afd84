//! Property-based configuration handed to the transport.
//!
//! Both stores are plain string key/value maps validated against a table of
//! recognized keys. They carry no transport state of their own; the
//! transport reads them once, when a client or topic handle is created.

mod client;
mod properties;
mod topic;

pub use client::ClientConfig;
pub use topic::TopicConfig;
