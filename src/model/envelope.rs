use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PulseError;

/// The wire unit exchanged with the gateway.
///
/// `timestamp` is stamped with the decode time when the sender omitted it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Build an outbound envelope stamped with the current time.
    pub fn new(kind: &str, data: Value) -> Self {
        Self {
            id: None,
            kind: kind.to_string(),
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Parse a raw text frame.
    pub fn parse(raw: &str) -> Result<Self, PulseError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json(&self) -> Result<String, PulseError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode `data` into a typed payload, tagging failures with the message type.
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<T, PulseError> {
        T::deserialize(&self.data).map_err(|e| PulseError::payload(&self.kind, e))
    }
}
