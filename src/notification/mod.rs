//! Deduplicated, bounded store of user-facing alerts.
//!
//! Records come from `notification` frames directly and from domain events
//! re-read as alerts: temperature breaches, platform alerts and delivered
//! order lines. Read state is local and optimistic.

pub mod cache;

pub use cache::NotificationCache;

use std::cmp::Reverse;
use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::NotificationConfig;
use crate::model::metric::{AlertSeverity, SystemAlert};
use crate::model::order::{FulfillmentStatus, OrderLine};
use crate::model::sample::TemperatureAlert;
use crate::model::{DomainUpdate, MessageKind, Notification, NotificationLevel, RealtimeMessage};
use crate::reconcile::{ApplyOutcome, Consumer};
use crate::router::Inbound;

pub struct NotificationSink {
    items: HashMap<String, Notification>,
    max_history: usize,
    retention: Duration,
    cache: Option<NotificationCache>,
}

impl NotificationSink {
    pub fn new(max_history: usize, retention: std::time::Duration) -> Self {
        Self {
            items: HashMap::new(),
            max_history,
            retention: Duration::from_std(retention).unwrap_or(Duration::MAX),
            cache: None,
        }
    }

    /// Build from config, seeding from the cache file when one is set.
    pub fn from_config(config: &NotificationConfig) -> Self {
        let mut sink = Self::new(config.max_history, config.retention);
        if let Some(path) = &config.cache_path {
            let cache = NotificationCache::new(path, config.cache_limit);
            for item in cache.load() {
                sink.insert(item, Utc::now());
            }
            sink.cache = Some(cache);
        }
        sink
    }

    /// Add a notification. Returns `false` for a duplicate id or a record
    /// already past retention.
    pub fn push(&mut self, notification: Notification) -> bool {
        let added = self.insert(notification, Utc::now());
        if added {
            self.persist();
        }
        added
    }

    pub fn mark_read(&mut self, id: &str) -> bool {
        let changed = match self.items.get_mut(id) {
            Some(n) if !n.read => {
                n.read = true;
                true
            }
            _ => false,
        };
        if changed {
            self.persist();
        }
        changed
    }

    /// Returns how many records changed.
    pub fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for n in self.items.values_mut().filter(|n| !n.read) {
            n.read = true;
            changed += 1;
        }
        if changed > 0 {
            self.persist();
        }
        changed
    }

    pub fn dismiss(&mut self, id: &str) -> Option<Notification> {
        let removed = self.items.remove(id);
        if removed.is_some() {
            self.persist();
        }
        removed
    }

    /// Drop records older than the retention window. Returns how many went.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now.checked_sub_signed(self.retention);
        let before = self.items.len();
        if let Some(cutoff) = cutoff {
            self.items.retain(|_, n| n.timestamp >= cutoff);
        }
        before - self.items.len()
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.items.get(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.items.values().filter(|n| !n.read).count()
    }

    /// Most severe first, then newest.
    pub fn by_priority(&self) -> Vec<&Notification> {
        let mut out: Vec<&Notification> = self.items.values().collect();
        out.sort_by_key(|n| (Reverse(n.level.rank()), Reverse(n.timestamp), n.id.as_str()));
        out
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<&Notification> {
        let mut out: Vec<&Notification> = self.items.values().collect();
        out.sort_by_key(|n| (Reverse(n.timestamp), n.id.as_str()));
        out
    }

    fn insert(&mut self, notification: Notification, now: DateTime<Utc>) -> bool {
        if self.items.contains_key(&notification.id) {
            debug!("Duplicate notification {}", notification.id);
            return false;
        }
        if let Some(cutoff) = now.checked_sub_signed(self.retention) {
            if notification.timestamp < cutoff {
                debug!("Notification {} is past retention", notification.id);
                return false;
            }
        }

        self.items.insert(notification.id.clone(), notification);
        self.prune(now);
        self.evict_overflow();
        true
    }

    fn evict_overflow(&mut self) {
        while self.items.len() > self.max_history {
            let oldest = self
                .items
                .values()
                .min_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)))
                .map(|n| n.id.clone());
            match oldest {
                Some(id) => {
                    self.items.remove(&id);
                }
                None => break,
            }
        }
    }

    fn persist(&self) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save(self.items.values()) {
                warn!("Failed to save notification cache: {}", e);
            }
        }
    }
}

/// Warning raised for a cold-chain breach.
pub fn from_temperature_alert(alert: &TemperatureAlert, inbound: &Inbound) -> Notification {
    let at = alert.timestamp.unwrap_or(inbound.envelope.timestamp);
    let id = inbound
        .envelope
        .id
        .clone()
        .unwrap_or_else(|| format!("temperature_alert:{}:{}", alert.id, at.timestamp_millis()));

    let message = alert.message.clone().unwrap_or_else(|| match alert.threshold {
        Some(threshold) => format!(
            "Sample {} reported {:.1}°C (threshold {:.1}°C)",
            alert.id, alert.temperature, threshold
        ),
        None => format!("Sample {} reported {:.1}°C", alert.id, alert.temperature),
    });

    Notification::new(
        &id,
        NotificationLevel::Warning,
        "sample",
        "Temperature alert",
        &message,
        at,
    )
    .with_action_url(&format!("/samples/{}", alert.id))
    .with_metadata(json!({
        "sample_id": alert.id,
        "temperature": alert.temperature,
        "threshold": alert.threshold,
    }))
}

pub fn from_system_alert(alert: &SystemAlert, inbound: &Inbound) -> Notification {
    let envelope = &inbound.envelope;
    let level = match alert.severity {
        AlertSeverity::Critical => NotificationLevel::Error,
        AlertSeverity::Warning => NotificationLevel::Warning,
        AlertSeverity::Info => NotificationLevel::Info,
    };
    let id = format!(
        "system_alert:{}",
        alert.key(envelope.id.as_deref(), envelope.timestamp)
    );

    let mut notification = Notification::new(
        &id,
        level,
        "system",
        &alert.title_or_default(),
        &alert.message,
        envelope.timestamp,
    );
    if let Some(url) = &alert.action_url {
        notification = notification.with_action_url(url);
    }
    if let Some(source) = &alert.source {
        notification = notification.with_metadata(json!({ "source": source }));
    }
    notification
}

/// Success notice for a delivered line; `None` for any other status.
pub fn from_fulfillment(update: &DomainUpdate<OrderLine>) -> Option<Notification> {
    if update.patch.fulfillment_status != Some(FulfillmentStatus::Delivered) {
        return None;
    }

    let line = &update.patch;
    let message = match &line.order_id {
        Some(order) => format!("Line {} of order {} was delivered", update.id, order),
        None => format!("Line {} was delivered", update.id),
    };
    let mut notification = Notification::new(
        &format!("fulfillment_delivered:{}", update.id),
        NotificationLevel::Success,
        "order",
        "Order line delivered",
        &message,
        update.timestamp,
    );
    if let Some(order) = &line.order_id {
        notification = notification.with_action_url(&format!("/orders/{}", order));
    }
    Some(notification)
}

impl Consumer for NotificationSink {
    fn kinds(&self) -> Vec<MessageKind> {
        vec![
            MessageKind::Notification,
            MessageKind::TemperatureAlert,
            MessageKind::SystemAlert,
            MessageKind::FulfillmentUpdate,
            MessageKind::NotificationRead,
            MessageKind::NotificationsReadAll,
        ]
    }

    fn handle(&mut self, inbound: &Inbound) -> Vec<ApplyOutcome> {
        let created = |added: bool| {
            if added {
                ApplyOutcome::Created
            } else {
                ApplyOutcome::Ignored
            }
        };

        let outcome = match &inbound.message {
            RealtimeMessage::Notification(n) => created(self.push(n.clone())),
            RealtimeMessage::TemperatureAlert(alert) => {
                created(self.push(from_temperature_alert(alert, inbound)))
            }
            RealtimeMessage::SystemAlert(alert) => {
                created(self.push(from_system_alert(alert, inbound)))
            }
            RealtimeMessage::FulfillmentUpdate(update) => match from_fulfillment(update) {
                Some(n) => created(self.push(n)),
                None => ApplyOutcome::Ignored,
            },
            // read markers from the server apply locally and are not echoed back
            RealtimeMessage::NotificationRead(marker) => {
                if self.mark_read(&marker.id) {
                    ApplyOutcome::Updated
                } else {
                    ApplyOutcome::Ignored
                }
            }
            RealtimeMessage::NotificationsReadAll => {
                if self.mark_all_read() > 0 {
                    ApplyOutcome::Updated
                } else {
                    ApplyOutcome::Ignored
                }
            }
            _ => return Vec::new(),
        };
        vec![outcome]
    }
}
