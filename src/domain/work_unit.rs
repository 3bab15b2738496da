//! Work units: the items the loop controller processes one at a time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One item of work to process (e.g. one ticket).
///
/// Immutable once enqueued: the controller only ever reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Unique key (e.g. "SPEND-101")
    key: String,
    /// Opaque payload handed to every step as part of its input
    payload: Value,
}

impl WorkUnit {
    /// Create a work unit with the given key and payload.
    pub fn new(key: impl Into<String>, payload: Value) -> Self {
        Self {
            key: key.into(),
            payload,
        }
    }

    /// Create a work unit with a null payload.
    pub fn keyed(key: impl Into<String>) -> Self {
        Self::new(key, Value::Null)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// JSON form embedded into every step input.
    pub fn to_input(&self) -> Value {
        serde_json::json!({
            "key": self.key,
            "payload": self.payload,
        })
    }
}
