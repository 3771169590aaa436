//! Event model received from the broker.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Errors raised while decoding a broker message into an [`Event`].
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// Message body is not valid JSON
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field is absent or empty
    #[error("missing field: {0}")]
    MissingField(&'static str),
}

/// A domain event published by an external producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier, used for idempotency.
    pub event_id: String,
    /// Dotted event type, e.g. `trade.profit`.
    pub event_type: String,
    /// Low-cardinality grouping key; empty defaults to the event type.
    #[serde(default)]
    pub context_key: String,
    /// Event timestamp (UTC).
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Event {
    /// Decode an event from a raw broker payload.
    ///
    /// `event_id` and `event_type` must be present and non-empty. An empty
    /// `context_key` is defaulted to the event type.
    pub fn from_json(payload: &[u8]) -> Result<Self, EventError> {
        let mut event: Event = serde_json::from_slice(payload)?;
        if event.event_id.is_empty() {
            return Err(EventError::MissingField("event_id"));
        }
        if event.event_type.is_empty() {
            return Err(EventError::MissingField("event_type"));
        }
        if event.context_key.is_empty() {
            event.context_key = event.event_type.clone();
        }
        Ok(event)
    }

    /// Serialize the event into the compact form stored in context windows
    /// and batch accumulators.
    pub fn to_context_entry(&self) -> String {
        serde_json::json!({
            "event_id": self.event_id,
            "event_type": self.event_type,
            "timestamp": self.timestamp.to_rfc3339(),
            "data": self.data,
        })
        .to_string()
    }

    /// Rebuild an event from a context-window entry.
    pub fn from_context_entry(entry: &str, context_key: &str) -> Result<Self, EventError> {
        #[derive(Deserialize)]
        struct Entry {
            event_id: String,
            event_type: String,
            timestamp: DateTime<Utc>,
            #[serde(default)]
            data: Map<String, Value>,
        }

        let entry: Entry = serde_json::from_str(entry)?;
        Ok(Event {
            event_id: entry.event_id,
            event_type: entry.event_type,
            context_key: context_key.to_string(),
            timestamp: entry.timestamp,
            data: entry.data,
        })
    }

    /// Millisecond timestamp used as the context-window score.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Flatten nested payload maps for expression evaluation.
    ///
    /// Nested keys are joined with `_`; leaf keys are also exposed directly
    /// so `profit_rate` resolves whether the payload nests or not.
    pub fn flattened_data(&self) -> HashMap<String, Value> {
        let mut flat = HashMap::new();
        flatten_into(&mut flat, &self.data, "");
        flat
    }
}

fn flatten_into(out: &mut HashMap<String, Value>, map: &Map<String, Value>, prefix: &str) {
    for (key, value) in map {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}_{key}")
        };
        match value {
            Value::Object(inner) => flatten_into(out, inner, &full),
            other => {
                out.entry(key.clone()).or_insert_with(|| other.clone());
                out.insert(full, other.clone());
            }
        }
    }
}
