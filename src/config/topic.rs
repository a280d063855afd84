//! Topic-level configuration.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use super::properties::{Properties, PropertySpec, ValueKind};
use crate::Result;

static TOPIC_PROPERTIES: &[PropertySpec] = &[
    PropertySpec {
        key: "request.required.acks",
        default: "-1",
        kind: ValueKind::Int { min: -1, max: 1000 },
    },
    PropertySpec {
        key: "request.timeout.ms",
        default: "30000",
        kind: ValueKind::Int {
            min: 1,
            max: 900_000,
        },
    },
    PropertySpec {
        key: "message.timeout.ms",
        default: "300000",
        kind: ValueKind::Int {
            min: 0,
            max: i32::MAX as i64,
        },
    },
    PropertySpec {
        key: "partitioner",
        default: "consistent_random",
        kind: ValueKind::OneOf(&[
            "random",
            "consistent",
            "consistent_random",
            "murmur2",
            "murmur2_random",
        ]),
    },
];

/// Topic configuration property store.
///
/// Same contract as [`ClientConfig`](crate::ClientConfig) for a smaller set
/// of per-topic keys. `message.timeout.ms` of `0` means no local delivery
/// timeout.
#[derive(Debug, Clone)]
pub struct TopicConfig {
    properties: Properties,
}

impl TopicConfig {
    pub fn new() -> Self {
        // ---
        Self {
            properties: Properties::with_defaults(TOPIC_PROPERTIES),
        }
    }

    /// Create a configuration from a flat JSON object of properties.
    pub fn from_json(json: &str) -> Result<Self> {
        // ---
        let mut config = Self::new();
        config.properties.merge_json(json)?;
        Ok(config)
    }

    pub fn get(&self, key: &str) -> Result<String> {
        self.properties.get(key)
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        self.properties.get_int(key)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.properties.set(key, value)
    }

    pub fn with(mut self, key: &str, value: &str) -> Result<Self> {
        // ---
        self.properties.set(key, value)?;
        Ok(self)
    }

    pub fn properties(&self) -> BTreeMap<String, String> {
        self.properties.snapshot()
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Serialize for TopicConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.properties.serialize(serializer)
    }
}
