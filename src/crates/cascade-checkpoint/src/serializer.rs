//! Serialization protocol for checkpoints, plus the defensive serializer
//!
//! Every state snapshot passes through [`snapshot`] / [`sanitize`] before it
//! is handed to a storage backend. Values that cannot be serialized are
//! replaced with a stable textual placeholder instead of failing the write;
//! if the underlying store still rejects the payload, [`dumps_traced`] logs
//! which field path was unserializable before returning the error.

use crate::error::{CheckpointError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum nesting depth the sanitizer will walk before truncating
const MAX_DEPTH: usize = 64;

/// Protocol for serializing and deserializing checkpoint data
///
/// Implementations can provide custom serialization strategies
/// (JSON, bincode, etc.)
pub trait SerializerProtocol: Send + Sync {
    /// Serialize a value to bytes
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize a value from bytes
    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T>;

    /// Serialize to JSON value (for compatibility)
    fn dumps_json<T: Serialize>(&self, value: &T) -> Result<Value> {
        Ok(serde_json::to_value(value)?)
    }

    /// Deserialize from JSON value (for compatibility)
    fn loads_json<T: for<'de> Deserialize<'de>>(&self, value: &Value) -> Result<T> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// JSON-based serializer (default)
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for JsonSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Binary serializer using bincode
#[derive(Debug, Clone, Default)]
pub struct BincodeSerializer;

impl BincodeSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for BincodeSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(data)?)
    }
}

/// Convert any serializable value into a JSON snapshot, never failing
///
/// If the value's `Serialize` implementation errors (bound closures, handles,
/// poisoned locks, maps with non-string keys), the result is a stable textual
/// placeholder naming the value's type rather than an error. This is the
/// total-coverage guarantee the checkpoint write path relies on.
pub fn snapshot<T: Serialize>(value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(v) => sanitize(&v),
        Err(e) => Value::String(format!(
            "<unserializable {}: {}>",
            std::any::type_name::<T>(),
            e
        )),
    }
}

/// Recursively sanitize a JSON value for storage
///
/// Walks objects and arrays, truncating subtrees deeper than [`MAX_DEPTH`]
/// with a placeholder string. Scalars pass through untouched. The output is
/// always storable by any [`SerializerProtocol`] implementation.
pub fn sanitize(value: &Value) -> Value {
    sanitize_at(value, 0)
}

fn sanitize_at(value: &Value, depth: usize) -> Value {
    if depth >= MAX_DEPTH {
        return Value::String("<truncated: max depth exceeded>".to_string());
    }
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_at(v, depth + 1)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items.iter().map(|v| sanitize_at(v, depth + 1)).collect(),
        ),
        other => other.clone(),
    }
}

/// Serialize a state snapshot, locating the offending field path on failure
///
/// When the backend serializer rejects a snapshot despite sanitization, the
/// deepest failing field path is located, logged, and returned inside
/// [`CheckpointError::Unserializable`]. A half-serialized record is never
/// produced: either the whole snapshot encodes, or the caller gets the
/// failure with its path.
pub fn dumps_traced<S: SerializerProtocol>(serializer: &S, state: &Value) -> Result<Vec<u8>> {
    serializer.dumps(state).map_err(|e| {
        let path = first_failing_path(serializer, state, String::new())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "<root>".to_string());
        tracing::error!(
            path = %path,
            error = %e,
            "state snapshot rejected by serializer"
        );
        CheckpointError::Unserializable {
            path,
            reason: e.to_string(),
        }
    })
}

/// Locate the deepest subtree the serializer rejects, as a dotted path
fn first_failing_path<S: SerializerProtocol>(
    serializer: &S,
    value: &Value,
    prefix: String,
) -> Option<String> {
    if serializer.dumps(value).is_ok() {
        return None;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                if let Some(found) = first_failing_path(serializer, child, path) {
                    return Some(found);
                }
            }
            Some(prefix)
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                let path = format!("{}[{}]", prefix, index);
                if let Some(found) = first_failing_path(serializer, child, path) {
                    return Some(found);
                }
            }
            Some(prefix)
        }
        _ => Some(prefix),
    }
}
