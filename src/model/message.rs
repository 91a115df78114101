use chrono::{DateTime, Utc};
use serde_json::Value;

use super::envelope::Envelope;
use super::metric::{AiInsight, InsightRemoval, Metric, SystemAlert};
use super::notification::{Notification, ReadMarker};
use super::order::{Order, OrderLine};
use super::sample::{SampleShipment, TemperatureAlert};
use super::update::{DomainUpdate, UpdateMode};
use crate::error::PulseError;

/// Every message type the pipeline knows by name.
///
/// `Message` is the catch-all listener key; `Other` carries types this
/// build does not recognise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    Ping,
    Pong,
    Subscribe,
    Unsubscribe,
    Notification,
    OrderUpdate,
    OrderLineUpdate,
    FulfillmentUpdate,
    SampleUpdate,
    SampleLocationUpdate,
    TemperatureAlert,
    MetricsUpdate,
    MetricUpdate,
    AiInsightUpdate,
    AiInsightRemoval,
    SystemAlert,
    NotificationRead,
    NotificationsReadAll,
    InsightAction,
    MetricsRefresh,
    Message,
    Other(String),
}

impl MessageKind {
    /// Classify a wire `type` string.
    pub fn from_type(kind: &str) -> Self {
        match kind {
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "subscribe" => Self::Subscribe,
            "unsubscribe" => Self::Unsubscribe,
            "notification" => Self::Notification,
            "order_update" => Self::OrderUpdate,
            "order_line_update" => Self::OrderLineUpdate,
            "fulfillment_update" => Self::FulfillmentUpdate,
            "sample_update" => Self::SampleUpdate,
            "sample_location_update" => Self::SampleLocationUpdate,
            "temperature_alert" => Self::TemperatureAlert,
            "metrics_update" => Self::MetricsUpdate,
            "metric_update" => Self::MetricUpdate,
            "ai_insight_update" => Self::AiInsightUpdate,
            "ai_insight_removal" => Self::AiInsightRemoval,
            "system_alert" => Self::SystemAlert,
            "notification_read" => Self::NotificationRead,
            "notifications_read_all" => Self::NotificationsReadAll,
            "insight_action" => Self::InsightAction,
            "metrics_refresh" => Self::MetricsRefresh,
            "message" => Self::Message,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Notification => "notification",
            Self::OrderUpdate => "order_update",
            Self::OrderLineUpdate => "order_line_update",
            Self::FulfillmentUpdate => "fulfillment_update",
            Self::SampleUpdate => "sample_update",
            Self::SampleLocationUpdate => "sample_location_update",
            Self::TemperatureAlert => "temperature_alert",
            Self::MetricsUpdate => "metrics_update",
            Self::MetricUpdate => "metric_update",
            Self::AiInsightUpdate => "ai_insight_update",
            Self::AiInsightRemoval => "ai_insight_removal",
            Self::SystemAlert => "system_alert",
            Self::NotificationRead => "notification_read",
            Self::NotificationsReadAll => "notifications_read_all",
            Self::InsightAction => "insight_action",
            Self::MetricsRefresh => "metrics_refresh",
            Self::Message => "message",
            Self::Other(kind) => kind.as_str(),
        }
    }

    /// Types without a dedicated variant go to the catch-all listeners.
    #[inline]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Other(_))
    }

    /// Heartbeat traffic, never interesting to domain consumers.
    #[inline]
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Ping | Self::Pong)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A decoded inbound message, one variant per wire type.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeMessage {
    Ping,
    Pong,
    Notification(Notification),
    OrderUpdate(DomainUpdate<Order>),
    OrderLineUpdate(DomainUpdate<OrderLine>),
    FulfillmentUpdate(DomainUpdate<OrderLine>),
    SampleUpdate(DomainUpdate<SampleShipment>),
    SampleLocationUpdate(DomainUpdate<SampleShipment>),
    TemperatureAlert(TemperatureAlert),
    MetricsUpdate(Vec<DomainUpdate<Metric>>),
    MetricUpdate(DomainUpdate<Metric>),
    AiInsightUpdate(DomainUpdate<AiInsight>),
    AiInsightRemoval(InsightRemoval),
    SystemAlert(SystemAlert),
    NotificationRead(ReadMarker),
    NotificationsReadAll,
    /// Echoes of client-originated control types (subscribe acks and the like).
    Control(MessageKind),
    Unknown(Value),
}

impl RealtimeMessage {
    /// Decode the typed payload of an envelope.
    pub fn decode(env: &Envelope) -> Result<Self, PulseError> {
        let kind = MessageKind::from_type(&env.kind);

        let message = match kind {
            MessageKind::Ping => Self::Ping,
            MessageKind::Pong => Self::Pong,
            MessageKind::Notification => Self::Notification(decode_notification(env)?),
            MessageKind::OrderUpdate => Self::OrderUpdate(DomainUpdate::decode(env)?),
            MessageKind::OrderLineUpdate => Self::OrderLineUpdate(DomainUpdate::decode(env)?),
            MessageKind::FulfillmentUpdate => Self::FulfillmentUpdate(
                DomainUpdate::decode(env)?.with_mode(UpdateMode::Fields),
            ),
            MessageKind::SampleUpdate => Self::SampleUpdate(DomainUpdate::decode(env)?),
            MessageKind::SampleLocationUpdate => Self::SampleLocationUpdate(
                DomainUpdate::decode(env)?.with_mode(UpdateMode::Fields),
            ),
            MessageKind::TemperatureAlert => Self::TemperatureAlert(env.decode_data()?),
            MessageKind::MetricsUpdate => Self::MetricsUpdate(decode_metric_batch(env)?),
            MessageKind::MetricUpdate => Self::MetricUpdate(DomainUpdate::decode(env)?),
            MessageKind::AiInsightUpdate => Self::AiInsightUpdate(DomainUpdate::decode(env)?),
            MessageKind::AiInsightRemoval => Self::AiInsightRemoval(env.decode_data()?),
            MessageKind::SystemAlert => Self::SystemAlert(env.decode_data()?),
            MessageKind::NotificationRead => Self::NotificationRead(env.decode_data()?),
            MessageKind::NotificationsReadAll => Self::NotificationsReadAll,
            MessageKind::Subscribe
            | MessageKind::Unsubscribe
            | MessageKind::InsightAction
            | MessageKind::MetricsRefresh => Self::Control(kind),
            MessageKind::Message | MessageKind::Other(_) => Self::Unknown(env.data.clone()),
        };

        Ok(message)
    }
}

// Notifications may lean on the envelope for their id and timestamp.
fn decode_notification(env: &Envelope) -> Result<Notification, PulseError> {
    let mut data = env.data.clone();
    if let Value::Object(map) = &mut data {
        if !map.contains_key("id") {
            if let Some(id) = &env.id {
                map.insert("id".to_string(), Value::String(id.clone()));
            }
        }
        if !map.contains_key("timestamp") {
            map.insert(
                "timestamp".to_string(),
                Value::String(env.timestamp.to_rfc3339()),
            );
        }
    }
    serde_json::from_value(data).map_err(|e| PulseError::payload(&env.kind, e))
}

// Accepts either `{"metrics": [...], "timestamp": ..}` or a bare array.
fn decode_metric_batch(env: &Envelope) -> Result<Vec<DomainUpdate<Metric>>, PulseError> {
    let (items, batch_ts) = match &env.data {
        Value::Array(items) => (items, env.timestamp),
        Value::Object(map) => {
            let items = map.get("metrics").and_then(Value::as_array).ok_or_else(|| {
                PulseError::payload(
                    &env.kind,
                    serde::de::Error::custom("missing 'metrics' array"),
                )
            })?;
            let ts = map
                .get("timestamp")
                .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v.clone()).ok())
                .unwrap_or(env.timestamp);
            (items, ts)
        }
        _ => {
            return Err(PulseError::payload(
                &env.kind,
                serde::de::Error::custom("expected an object or array"),
            ))
        }
    };

    items
        .iter()
        .map(|item| {
            DomainUpdate::from_value(&env.kind, item, batch_ts)
                .map(|u| u.with_mode(UpdateMode::Full))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::sample::SampleStatus;
    use serde_json::json;

    #[test]
    fn test_kind_round_trip_names() {
        for name in [
            "ping",
            "sample_update",
            "fulfillment_update",
            "notifications_read_all",
            "ai_insight_removal",
        ] {
            assert_eq!(MessageKind::from_type(name).as_str(), name);
        }
        assert_eq!(
            MessageKind::from_type("inventory_update"),
            MessageKind::Other("inventory_update".to_string())
        );
        assert!(MessageKind::from_type("inventory_update").is_unknown());
    }

    #[test]
    fn test_decode_sample_update() {
        let env = Envelope::new(
            "sample_update",
            json!({"id": "1", "status": "in_transit", "carrier": "DHL"}),
        );
        match RealtimeMessage::decode(&env).unwrap() {
            RealtimeMessage::SampleUpdate(update) => {
                assert_eq!(update.id, "1");
                assert_eq!(update.patch.status, Some(SampleStatus::InTransit));
                assert_eq!(update.patch.carrier.as_deref(), Some("DHL"));
                assert!(update.patch.location.is_none());
            }
            other => panic!("Expected SampleUpdate, got {:?}", other),
        }
    }

    #[test]
    fn test_location_update_is_field_merge() {
        let env = Envelope::new(
            "sample_location_update",
            json!({"id": "1", "mode": "full", "location": {"lat": 52.5, "lng": 13.4}}),
        );
        match RealtimeMessage::decode(&env).unwrap() {
            RealtimeMessage::SampleLocationUpdate(update) => {
                assert_eq!(update.mode, UpdateMode::Fields);
                assert_eq!(update.patch.location.unwrap().latitude, 52.5);
            }
            other => panic!("Expected SampleLocationUpdate, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_metric_batch_forms() {
        let object = Envelope::new(
            "metrics_update",
            json!({
                "timestamp": "2024-05-01T08:00:00Z",
                "metrics": [{"id": "revenue", "name": "Revenue", "value": 1200.0},
                            {"id": "orders", "name": "Orders", "value": 31}]
            }),
        );
        match RealtimeMessage::decode(&object).unwrap() {
            RealtimeMessage::MetricsUpdate(batch) => {
                assert_eq!(batch.len(), 2);
                assert!(batch.iter().all(|u| u.mode == UpdateMode::Full));
                assert_eq!(batch[0].timestamp.to_rfc3339(), "2024-05-01T08:00:00+00:00");
                assert_eq!(batch[1].patch.value, Some(31.0));
            }
            other => panic!("Expected MetricsUpdate, got {:?}", other),
        }

        let array = Envelope::new("metrics_update", json!([{"id": "revenue", "value": 5}]));
        assert!(matches!(
            RealtimeMessage::decode(&array).unwrap(),
            RealtimeMessage::MetricsUpdate(batch) if batch.len() == 1
        ));

        let broken = Envelope::new("metrics_update", json!({"values": []}));
        assert!(RealtimeMessage::decode(&broken).is_err());
    }

    #[test]
    fn test_notification_borrows_envelope_id() {
        let env = Envelope::new(
            "notification",
            json!({"type": "success", "title": "Order shipped", "category": "order"}),
        )
        .with_id("env-9");

        match RealtimeMessage::decode(&env).unwrap() {
            RealtimeMessage::Notification(n) => {
                assert_eq!(n.id, "env-9");
                assert_eq!(n.timestamp, env.timestamp);
            }
            other => panic!("Expected Notification, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_keeps_payload() {
        let env = Envelope::new("inventory_update", json!({"sku": "A-1"}));
        assert_eq!(
            RealtimeMessage::decode(&env).unwrap(),
            RealtimeMessage::Unknown(json!({"sku": "A-1"}))
        );
    }

    #[test]
    fn test_malformed_payload_is_error() {
        let env = Envelope::new("temperature_alert", json!({"id": "1", "temperature": "hot"}));
        assert!(RealtimeMessage::decode(&env).is_err());
    }
}
