//! Client-level configuration.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};

use super::properties::{Properties, PropertySpec, ValueKind};
use crate::{DeliveryCallback, Result};

static CLIENT_PROPERTIES: &[PropertySpec] = &[
    PropertySpec {
        key: "client.id",
        default: "mom-producer",
        kind: ValueKind::Text,
    },
    PropertySpec {
        key: "bootstrap.servers",
        default: "",
        kind: ValueKind::Text,
    },
    PropertySpec {
        key: "queue.buffering.max.messages",
        default: "100000",
        kind: ValueKind::Int {
            min: 1,
            max: 10_000_000,
        },
    },
    PropertySpec {
        key: "message.max.bytes",
        default: "1000000",
        kind: ValueKind::Int {
            min: 1000,
            max: 1_000_000_000,
        },
    },
    PropertySpec {
        key: "linger.ms",
        default: "5",
        kind: ValueKind::Int { min: 0, max: 900_000 },
    },
    PropertySpec {
        key: "fetch.wait.max.ms",
        default: "500",
        kind: ValueKind::Int { min: 0, max: 300_000 },
    },
    PropertySpec {
        key: "socket.timeout.ms",
        default: "60000",
        kind: ValueKind::Int {
            min: 10,
            max: 300_000,
        },
    },
    PropertySpec {
        key: "enable.idempotence",
        default: "false",
        kind: ValueKind::Bool,
    },
    PropertySpec {
        key: "compression.codec",
        default: "none",
        kind: ValueKind::OneOf(&["none", "gzip", "snappy", "lz4", "zstd"]),
    },
];

/// Client configuration property store.
///
/// Holds string properties such as `client.id` or `message.max.bytes`,
/// plus the delivery callback slot read by the transport when the client
/// is created. Clones are independent: changing a clone never affects the
/// original, and a producer clones the configuration it is given.
///
/// # Example
///
/// ```
/// use mom_producer::ClientConfig;
///
/// let mut config = ClientConfig::new();
/// config.set("fetch.wait.max.ms", "200")?;
/// assert_eq!(config.get("fetch.wait.max.ms")?, "200");
/// # Ok::<(), mom_producer::Error>(())
/// ```
#[derive(Clone)]
pub struct ClientConfig {
    // ---
    properties: Properties,
    delivery_callback: Option<DeliveryCallback>,
}

impl ClientConfig {
    /// Create a configuration holding the default of every property.
    pub fn new() -> Self {
        // ---
        Self {
            properties: Properties::with_defaults(CLIENT_PROPERTIES),
            delivery_callback: None,
        }
    }

    /// Create a configuration from a flat JSON object of properties.
    ///
    /// ```
    /// let config = mom_producer::ClientConfig::from_json(
    ///     r#"{"client.id": "billing", "linger.ms": 20}"#,
    /// )?;
    /// assert_eq!(config.get("linger.ms")?, "20");
    /// # Ok::<(), mom_producer::Error>(())
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        // ---
        let mut config = Self::new();
        config.properties.merge_json(json)?;
        Ok(config)
    }

    /// Read a property.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigKey`](crate::Error::ConfigKey) for unknown keys.
    pub fn get(&self, key: &str) -> Result<String> {
        self.properties.get(key)
    }

    /// Read an integer property.
    pub fn get_int(&self, key: &str) -> Result<i64> {
        self.properties.get_int(key)
    }

    /// Set a property.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigKey`](crate::Error::ConfigKey) for unknown keys
    /// and [`Error::ConfigValidation`](crate::Error::ConfigValidation) for
    /// values of the wrong shape. The previous value is kept on error.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.properties.set(key, value)
    }

    /// Chaining form of [`set`](Self::set).
    pub fn with(mut self, key: &str, value: &str) -> Result<Self> {
        // ---
        self.properties.set(key, value)?;
        Ok(self)
    }

    /// Snapshot of every property and its current value.
    pub fn properties(&self) -> BTreeMap<String, String> {
        self.properties.snapshot()
    }

    /// Install the callback the transport invokes for every delivery report
    /// of a client created from this configuration.
    pub fn set_delivery_callback(&mut self, callback: DeliveryCallback) {
        self.delivery_callback = Some(callback);
    }

    /// The installed delivery callback, if any.
    pub fn delivery_callback(&self) -> Option<&DeliveryCallback> {
        self.delivery_callback.as_ref()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        f.debug_struct("ClientConfig")
            .field("properties", &self.properties.snapshot())
            .field("delivery_callback", &self.delivery_callback.is_some())
            .finish()
    }
}

impl Serialize for ClientConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.properties.serialize(serializer)
    }
}
