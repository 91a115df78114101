use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde_json::{Map, Value};

use crate::error::PulseError;

pub const SAMPLE_TRACKING: &str = "sample_tracking";
pub const ORDER_TRACKING: &str = "order_tracking";
pub const ORDER_LINE: &str = "order_line";
pub const DASHBOARD_METRICS: &str = "dashboard_metrics";

const NO_PARAMS: [(&str, &str); 0] = [];

/// A logical server-side update stream, e.g. `sample_tracking:123`.
///
/// Equality and hashing use the key only.
#[derive(Debug, Clone)]
pub struct Topic {
    key: String,
    channel: String,
    params: BTreeMap<String, String>,
}

impl Topic {
    /// Build a topic from a channel and its key parameters.
    ///
    /// The key is the channel followed by each parameter value, `:` separated.
    pub fn new<'a, I>(channel: &str, params: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let params: Vec<(String, String)> = params
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut key = channel.to_string();
        for (_, value) in &params {
            key.push(':');
            key.push_str(value);
        }

        Self {
            key,
            channel: channel.to_string(),
            params: params.into_iter().collect(),
        }
    }

    pub fn sample_tracking(sample_id: &str) -> Self {
        Self::new(SAMPLE_TRACKING, [("sample_id", sample_id)])
    }

    pub fn order_tracking(order_id: &str) -> Self {
        Self::new(ORDER_TRACKING, [("order_id", order_id)])
    }

    pub fn order_line(line_id: &str) -> Self {
        Self::new(ORDER_LINE, [("line_id", line_id)])
    }

    pub fn dashboard_metrics() -> Self {
        Self::new(DASHBOARD_METRICS, NO_PARAMS)
    }

    /// Parse a `channel[:id]` key. Known channels get their usual parameter
    /// name, anything else uses `id`.
    pub fn parse(key: &str) -> Result<Self, PulseError> {
        let (channel, id) = match key.split_once(':') {
            Some((channel, id)) => (channel, Some(id)),
            None => (key, None),
        };

        if channel.is_empty() || id.is_some_and(str::is_empty) {
            return Err(PulseError::InvalidTopic(key.to_string()));
        }

        let Some(id) = id else {
            return Ok(Self::new(channel, NO_PARAMS));
        };

        let param = match channel {
            SAMPLE_TRACKING => "sample_id",
            ORDER_TRACKING => "order_id",
            ORDER_LINE => "line_id",
            _ => "id",
        };
        Ok(Self::new(channel, [(param, id)]))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Payload of subscribe/unsubscribe frames: `{channel, ...params}`.
    pub fn frame_data(&self) -> Value {
        let mut map = Map::new();
        map.insert("channel".to_string(), Value::String(self.channel.clone()));
        for (k, v) in &self.params {
            map.insert(k.clone(), Value::String(v.clone()));
        }
        Value::Object(map)
    }
}

impl PartialEq for Topic {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Topic {}

impl Hash for Topic {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key)
    }
}
