use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl NotificationLevel {
    /// Display priority, higher is more urgent.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Info => 0,
            Self::Success => 1,
            Self::Warning => 2,
            Self::Error => 3,
        }
    }
}

fn default_category() -> String {
    "general".to_string()
}

/// A user-facing alert, in the same shape the dashboard stores it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub level: NotificationLevel,
    #[serde(default = "default_category")]
    pub category: String,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Notification {
    pub fn new(
        id: &str,
        level: NotificationLevel,
        category: &str,
        title: &str,
        message: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.to_string(),
            level,
            category: category.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            timestamp,
            read: false,
            action_url: None,
            metadata: None,
        }
    }

    pub fn with_action_url(mut self, url: &str) -> Self {
        self.action_url = Some(url.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Read receipt for a single notification, in either direction.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReadMarker {
    #[serde(alias = "notification_id", alias = "notificationId")]
    pub id: String,
}
