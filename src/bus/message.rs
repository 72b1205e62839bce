//! The unit of communication between services.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BusError, BusResult};

/// One published event.
///
/// Messages are immutable once published and are shared between every
/// mailbox and waiter that receives them as `Arc<Message>`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Name of the publishing service.
    pub source: String,
    /// Topic the message was published under (e.g. "keyPressed").
    pub topic: String,
    /// Ordered arguments.
    pub args: Vec<Value>,
    /// Per-publisher sequence number, starting at 1.
    pub sequence: u64,
    /// Publish time.
    pub timestamp: DateTime<Utc>,
}

/// Compact binary form. Arguments travel as JSON text because the binary
/// codec cannot carry self-describing values.
#[derive(Serialize, Deserialize)]
struct WireMessage {
    source: String,
    topic: String,
    args: Vec<String>,
    sequence: u64,
    timestamp_micros: i64,
}

impl Message {
    /// Create a message stamped with the current time.
    pub fn new(
        source: impl Into<String>,
        topic: impl Into<String>,
        args: Vec<Value>,
        sequence: u64,
    ) -> Self {
        Self {
            source: source.into(),
            topic: topic.into(),
            args,
            sequence,
            timestamp: Utc::now(),
        }
    }

    /// Number of arguments.
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// Raw argument at `index`.
    pub fn arg_value(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Decode the argument at `index` into a typed value.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> BusResult<T> {
        let value = self.args.get(index).ok_or_else(|| {
            BusError::Decode(format!(
                "{}.{} has no argument {} (arity {})",
                self.source,
                self.topic,
                index,
                self.args.len()
            ))
        })?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// The argument at `index` as a string slice, if it is a JSON string.
    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(Value::as_str)
    }

    /// True if this message came from `source` under `topic`.
    pub fn is(&self, source: &str, topic: &str) -> bool {
        self.source == source && self.topic == topic
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> BusResult<String> {
        serde_json::to_string(self).map_err(|e| BusError::Encode(e.to_string()))
    }

    /// Parse from JSON.
    pub fn from_json(raw: &str) -> BusResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Serialize to the compact binary form.
    pub fn to_bytes(&self) -> BusResult<Vec<u8>> {
        let args = self
            .args
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| BusError::Encode(e.to_string()))?;
        let wire = WireMessage {
            source: self.source.clone(),
            topic: self.topic.clone(),
            args,
            sequence: self.sequence,
            timestamp_micros: self.timestamp.timestamp_micros(),
        };
        bitcode::serialize(&wire).map_err(|e| BusError::Encode(e.to_string()))
    }

    /// Parse the compact binary form.
    pub fn from_bytes(bytes: &[u8]) -> BusResult<Self> {
        let wire: WireMessage = bitcode::deserialize(bytes)?;
        let args = wire
            .args
            .iter()
            .map(|raw| serde_json::from_str(raw))
            .collect::<Result<Vec<Value>, _>>()?;
        let timestamp = DateTime::<Utc>::from_timestamp_micros(wire.timestamp_micros)
            .ok_or_else(|| BusError::Decode(format!("timestamp {} out of range", wire.timestamp_micros)))?;
        Ok(Self {
            source: wire.source,
            topic: wire.topic,
            args,
            sequence: wire.sequence,
            timestamp,
        })
    }
}
