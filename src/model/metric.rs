use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    #[serde(alias = "stable")]
    Flat,
}

/// A dashboard KPI tile.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Metric {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
}

/// Ordering follows importance: `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightPriority {
    Low,
    Medium,
    High,
}

/// A ranked recommendation or alert shown in the insight feed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AiInsight {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<InsightPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InsightRemoval {
    #[serde(alias = "insight_id")]
    pub id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    #[default]
    Warning,
    #[serde(alias = "error")]
    Critical,
}

/// Raw operational alert pushed by the platform (outage, sync failure, ...).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SystemAlert {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub severity: AlertSeverity,
    #[serde(default)]
    pub title: Option<String>,
    pub message: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub action_url: Option<String>,
}

impl SystemAlert {
    /// Stable identifier: the alert's own id, else the envelope id, else the time.
    pub fn key(&self, envelope_id: Option<&str>, timestamp: DateTime<Utc>) -> String {
        self.id
            .as_deref()
            .or(envelope_id)
            .map(|id| id.to_string())
            .unwrap_or_else(|| timestamp.timestamp_millis().to_string())
    }

    pub fn title_or_default(&self) -> String {
        self.title.clone().unwrap_or_else(|| match self.severity {
            AlertSeverity::Info => "System notice".to_string(),
            AlertSeverity::Warning => "System warning".to_string(),
            AlertSeverity::Critical => "System alert".to_string(),
        })
    }
}
