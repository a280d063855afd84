//! String-keyed property store shared by client and topic configuration.
//!
//! Every store is backed by a static table of recognized keys. Unknown keys
//! are rejected on both `get` and `set`, and values are validated against the
//! key's declared shape before they are stored.

use std::collections::BTreeMap;

use serde::ser::{Serialize, Serializer};

use crate::{Error, Result};

/// Shape of a property value.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ValueKind {
    /// Decimal integer within an inclusive range.
    Int { min: i64, max: i64 },
    /// `true` or `false`.
    Bool,
    /// Free-form text.
    Text,
    /// One of a fixed set of words.
    OneOf(&'static [&'static str]),
}

#[derive(Debug)]
pub(crate) struct PropertySpec {
    pub key: &'static str,
    pub default: &'static str,
    pub kind: ValueKind,
}

#[derive(Debug, Clone)]
pub(crate) struct Properties {
    // ---
    specs: &'static [PropertySpec],
    values: BTreeMap<&'static str, String>,
}

impl Properties {
    // ---

    /// Create a store holding the default value of every known key.
    pub fn with_defaults(specs: &'static [PropertySpec]) -> Self {
        // ---
        let values = specs
            .iter()
            .map(|spec| (spec.key, spec.default.to_string()))
            .collect();

        Self { specs, values }
    }

    fn spec(&self, key: &str) -> Result<&'static PropertySpec> {
        // ---
        self.specs
            .iter()
            .find(|spec| spec.key == key)
            .ok_or_else(|| Error::ConfigKey(key.to_string()))
    }

    pub fn get(&self, key: &str) -> Result<String> {
        // ---
        let spec = self.spec(key)?;
        Ok(self
            .values
            .get(spec.key)
            .cloned()
            .unwrap_or_else(|| spec.default.to_string()))
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        // ---
        let value = self.get(key)?;
        value.parse().map_err(|_| Error::ConfigValidation {
            key: key.to_string(),
            value,
            reason: "not an integer property".into(),
        })
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        // ---
        let spec = self.spec(key)?;
        let normalized = validate(spec, value)?;
        self.values.insert(spec.key, normalized);
        Ok(())
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        // ---
        self.values
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    /// Apply every entry of a flat JSON object through [`set`](Self::set).
    ///
    /// Strings are taken verbatim; numbers and booleans are rendered with
    /// their JSON spelling.
    pub fn merge_json(&mut self, json: &str) -> Result<()> {
        // ---
        let entries: BTreeMap<String, serde_json::Value> = serde_json::from_str(json)?;

        for (key, value) in entries {
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                other => {
                    return Err(Error::ConfigValidation {
                        key,
                        value: other.to_string(),
                        reason: "expected a string, number or boolean".into(),
                    })
                }
            };
            self.set(&key, &text)?;
        }

        Ok(())
    }
}

impl Serialize for Properties {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.values.iter())
    }
}

fn validate(spec: &PropertySpec, value: &str) -> Result<String> {
    // ---
    let invalid = |reason: String| Error::ConfigValidation {
        key: spec.key.to_string(),
        value: value.to_string(),
        reason,
    };

    match spec.kind {
        ValueKind::Int { min, max } => {
            let parsed: i64 = value
                .trim()
                .parse()
                .map_err(|_| invalid("expected an integer".into()))?;
            if parsed < min || parsed > max {
                return Err(invalid(format!("must be within {min}..={max}")));
            }
            Ok(parsed.to_string())
        }
        ValueKind::Bool => match value.trim().to_ascii_lowercase().as_str() {
            "true" => Ok("true".into()),
            "false" => Ok("false".into()),
            _ => Err(invalid("expected true or false".into())),
        },
        ValueKind::Text => Ok(value.to_string()),
        ValueKind::OneOf(choices) => {
            if choices.contains(&value) {
                Ok(value.to_string())
            } else {
                Err(invalid(format!("expected one of {}", choices.join(", "))))
            }
        }
    }
}
