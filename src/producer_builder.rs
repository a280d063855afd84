//! Producer builder.
//!
//! Provides a fluent builder API for configuring a [`Producer`] with optional
//! topic and client configuration and an error observer.

use crate::{
    // ---
    ClientConfig,
    DeliveryError,
    Error,
    ErrorObserver,
    Producer,
    Result,
    TopicConfig,
    TransportPtr,
};
use std::sync::Arc;

/// Builder for creating producer instances.
///
/// # Examples
///
/// ```
/// use mom_producer::{create_memory_transport, ClientConfig, ProducerBuilder};
///
/// # fn example() -> mom_producer::Result<()> {
/// let producer = ProducerBuilder::new(create_memory_transport())
///     .topic("orders")
///     .client_config(ClientConfig::new().with("client.id", "checkout")?)
///     .on_error(|err| eprintln!("{err}"))
///     .build()?;
///
/// assert_eq!(producer.topic(), "orders");
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
pub struct ProducerBuilder {
    // ---
    transport: TransportPtr,
    topic: Option<String>,
    topic_config: Option<TopicConfig>,
    client_config: Option<ClientConfig>,
    on_error: Option<ErrorObserver>,
}

impl ProducerBuilder {
    /// Create a new producer builder on `transport`.
    pub fn new(transport: TransportPtr) -> Self {
        // ---
        Self {
            transport,
            topic: None,
            topic_config: None,
            client_config: None,
            on_error: None,
        }
    }

    /// Set the topic (required).
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Topic configuration. Default: transport defaults.
    pub fn topic_config(mut self, config: TopicConfig) -> Self {
        self.topic_config = Some(config);
        self
    }

    /// Client configuration. Default: [`ClientConfig::new`].
    pub fn client_config(mut self, config: ClientConfig) -> Self {
        self.client_config = Some(config);
        self
    }

    /// Observer for failures of messages after they were accepted.
    pub fn on_error<F>(mut self, observer: F) -> Self
    where
        F: Fn(&DeliveryError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(observer));
        self
    }

    /// Build the producer (consumes self).
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingConfig`] if no topic was set, otherwise any
    /// error of [`Producer::new`].
    pub fn build(self) -> Result<Producer> {
        // ---
        let topic = self
            .topic
            .ok_or_else(|| Error::MissingConfig("topic".into()))?;

        let producer = Producer::new(
            self.transport,
            &topic,
            self.topic_config.as_ref(),
            self.client_config.as_ref(),
        )?;

        producer.replace_error_observer(self.on_error);

        Ok(producer)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{create_memory_transport_with_hub, MemoryHub, TopicFailure};

    #[test]
    fn test_missing_topic() {
        // ---
        let transport = create_memory_transport_with_hub(MemoryHub::new());
        let result = ProducerBuilder::new(transport).build();
        assert!(matches!(result, Err(Error::MissingConfig(field)) if field == "topic"));
    }

    #[test]
    fn test_build_with_configs() {
        // ---
        let hub = MemoryHub::new();
        let transport = create_memory_transport_with_hub(hub.clone());
        let producer = ProducerBuilder::new(transport)
            .topic("payments")
            .client_config(ClientConfig::new().with("client.id", "billing").unwrap())
            .topic_config(TopicConfig::new().with("request.timeout.ms", "4000").unwrap())
            .build()
            .unwrap();

        assert_eq!(producer.topic(), "payments");
        assert_eq!(producer.name(), "billing#producer-1");
    }

    #[test]
    fn test_invalid_topic_name() {
        // ---
        let transport = create_memory_transport_with_hub(MemoryHub::new());
        let result = ProducerBuilder::new(transport).topic("no spaces").build();
        assert!(matches!(
            result,
            Err(Error::Topic {
                reason: TopicFailure::InvalidName(_),
                ..
            })
        ));
    }
}
