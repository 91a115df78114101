use std::cmp::Reverse;

use chrono::{DateTime, Utc};

use super::{
    merge_fields, ApplyOutcome, Consumer, EntityStore, FieldClock, MergeCount, Reconcile, Record,
};
use crate::model::metric::{AiInsight, AlertSeverity, InsightPriority, Metric, SystemAlert};
use crate::model::{DomainUpdate, MessageKind, RealtimeMessage, UpdateMode};
use crate::router::Inbound;

impl Reconcile for Metric {
    fn merge(
        &mut self,
        patch: Self,
        clock: &mut FieldClock,
        at: DateTime<Utc>,
        mode: UpdateMode,
    ) -> MergeCount {
        merge_fields!(
            self,
            patch,
            clock,
            at,
            mode,
            [name, value, previous_value, unit, change_percent, trend]
        )
    }

    fn is_complete(&self) -> bool {
        self.name.is_some() && self.value.is_some()
    }
}

impl Reconcile for AiInsight {
    fn merge(
        &mut self,
        patch: Self,
        clock: &mut FieldClock,
        at: DateTime<Utc>,
        mode: UpdateMode,
    ) -> MergeCount {
        merge_fields!(
            self,
            patch,
            clock,
            at,
            mode,
            [
                title,
                description,
                priority,
                category,
                action_label,
                action_url,
                confidence,
            ]
        )
    }

    fn is_complete(&self) -> bool {
        self.title.is_some() && self.priority.is_some()
    }
}

/// Turn a raw platform alert into an insight card.
pub fn insight_from_alert(
    alert: &SystemAlert,
    envelope_id: Option<&str>,
    timestamp: DateTime<Utc>,
) -> DomainUpdate<AiInsight> {
    let priority = match alert.severity {
        AlertSeverity::Critical => InsightPriority::High,
        AlertSeverity::Warning => InsightPriority::Medium,
        AlertSeverity::Info => InsightPriority::Low,
    };
    let insight = AiInsight {
        title: Some(alert.title_or_default()),
        description: Some(alert.message.clone()),
        priority: Some(priority),
        category: Some("system".to_string()),
        action_label: None,
        action_url: alert.action_url.clone(),
        confidence: None,
    };
    let id = format!("system_alert:{}", alert.key(envelope_id, timestamp));
    DomainUpdate::full(&id, timestamp, insight)
}

/// KPI tiles plus the ranked insight feed.
pub struct MetricsBoard {
    metrics: EntityStore<Metric>,
    insights: EntityStore<AiInsight>,
}

impl MetricsBoard {
    pub fn new(history: usize) -> Self {
        Self {
            metrics: EntityStore::new(history),
            insights: EntityStore::new(history),
        }
    }

    /// A batch carries full snapshots; each metric is judged on its own.
    pub fn apply_batch<I>(&mut self, batch: I) -> Vec<ApplyOutcome>
    where
        I: IntoIterator<Item = DomainUpdate<Metric>>,
    {
        batch.into_iter().map(|u| self.metrics.apply(u)).collect()
    }

    pub fn apply_metric(&mut self, update: DomainUpdate<Metric>) -> ApplyOutcome {
        self.metrics.apply(update)
    }

    pub fn apply_insight(&mut self, update: DomainUpdate<AiInsight>) -> ApplyOutcome {
        self.insights.apply(update)
    }

    pub fn remove_insight(&mut self, id: &str, timestamp: DateTime<Utc>) -> ApplyOutcome {
        self.insights.remove(id, timestamp)
    }

    pub fn metric(&self, id: &str) -> Option<&Metric> {
        self.metrics.get(id)
    }

    pub fn insight(&self, id: &str) -> Option<&AiInsight> {
        self.insights.get(id)
    }

    /// Metric tiles sorted by id.
    pub fn metrics(&self) -> Vec<(&str, &Metric)> {
        let mut out: Vec<(&str, &Metric)> =
            self.metrics.iter().map(|(id, r)| (id, &r.value)).collect();
        out.sort_unstable_by(|a, b| a.0.cmp(b.0));
        out
    }

    /// Highest priority first, then newest. Unprioritised insights rank low.
    pub fn ranked_insights(&self) -> Vec<(&str, &AiInsight)> {
        let mut ranked: Vec<(&str, &Record<AiInsight>)> = self.insights.iter().collect();
        ranked.sort_by_key(|(id, r)| {
            (
                Reverse(r.value.priority.unwrap_or(InsightPriority::Low)),
                Reverse(r.updated_at),
                *id,
            )
        });
        ranked.into_iter().map(|(id, r)| (id, &r.value)).collect()
    }

    pub fn metric_store(&self) -> &EntityStore<Metric> {
        &self.metrics
    }

    pub fn insight_store(&self) -> &EntityStore<AiInsight> {
        &self.insights
    }
}

impl Consumer for MetricsBoard {
    fn kinds(&self) -> Vec<MessageKind> {
        vec![
            MessageKind::MetricsUpdate,
            MessageKind::MetricUpdate,
            MessageKind::AiInsightUpdate,
            MessageKind::AiInsightRemoval,
            MessageKind::SystemAlert,
        ]
    }

    fn handle(&mut self, inbound: &Inbound) -> Vec<ApplyOutcome> {
        let envelope = &inbound.envelope;
        match &inbound.message {
            RealtimeMessage::MetricsUpdate(batch) => self.apply_batch(batch.iter().cloned()),
            RealtimeMessage::MetricUpdate(update) => vec![self.apply_metric(update.clone())],
            RealtimeMessage::AiInsightUpdate(update) => vec![self.apply_insight(update.clone())],
            RealtimeMessage::AiInsightRemoval(removal) => {
                let at = removal.timestamp.unwrap_or(envelope.timestamp);
                vec![self.remove_insight(&removal.id, at)]
            }
            RealtimeMessage::SystemAlert(alert) => {
                let update = insight_from_alert(alert, envelope.id.as_deref(), envelope.timestamp);
                vec![self.apply_insight(update)]
            }
            _ => Vec::new(),
        }
    }
}
