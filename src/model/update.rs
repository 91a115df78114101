//! Timestamped partial patches for a single entity.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::envelope::Envelope;
use crate::error::PulseError;

/// How a patch is folded into the stored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Replace every field of the entity.
    #[serde(alias = "snapshot")]
    Full,
    /// Overwrite only the fields present in the patch.
    #[default]
    #[serde(alias = "partial")]
    Fields,
}

/// A partial, timestamped patch for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainUpdate<P> {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub mode: UpdateMode,
    pub patch: P,
}

// `id`, `timestamp` and `mode` are lifted out; everything else belongs to the patch.
#[derive(Deserialize)]
struct WireUpdate<P> {
    #[serde(alias = "entity_id")]
    id: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default, alias = "update_type")]
    mode: UpdateMode,
    #[serde(flatten)]
    patch: P,
}

impl<P> DomainUpdate<P> {
    pub fn fields(id: &str, timestamp: DateTime<Utc>, patch: P) -> Self {
        Self {
            id: id.to_string(),
            timestamp,
            mode: UpdateMode::Fields,
            patch,
        }
    }

    pub fn full(id: &str, timestamp: DateTime<Utc>, patch: P) -> Self {
        Self {
            id: id.to_string(),
            timestamp,
            mode: UpdateMode::Full,
            patch,
        }
    }

    pub fn with_mode(mut self, mode: UpdateMode) -> Self {
        self.mode = mode;
        self
    }
}

impl<P: DeserializeOwned> DomainUpdate<P> {
    /// Decode the envelope payload; the envelope timestamp stands in when the
    /// payload carries none.
    pub fn decode(env: &Envelope) -> Result<Self, PulseError> {
        Self::from_value(&env.kind, &env.data, env.timestamp)
    }

    pub fn from_value(
        kind: &str,
        data: &Value,
        fallback: DateTime<Utc>,
    ) -> Result<Self, PulseError> {
        let wire = WireUpdate::<P>::deserialize(data).map_err(|e| PulseError::payload(kind, e))?;
        Ok(Self {
            id: wire.id,
            timestamp: wire.timestamp.unwrap_or(fallback),
            mode: wire.mode,
            patch: wire.patch,
        })
    }
}
