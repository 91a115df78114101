use chrono::{DateTime, Utc};

use super::{
    merge_fields, ApplyOutcome, Consumer, EntityPhase, EntityStore, FieldClock, MergeCount, Reconcile,
    Record,
};
use crate::model::sample::{SampleShipment, TemperatureAlert};
use crate::model::{DomainUpdate, MessageKind, RealtimeMessage, UpdateMode};
use crate::router::Inbound;

impl Reconcile for SampleShipment {
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
                status,
                product_name,
                location,
                temperature,
                humidity,
                carrier,
                tracking_number,
                estimated_delivery,
                temperature_breach,
            ]
        )
    }

    fn is_complete(&self) -> bool {
        self.status.is_some()
            && self.location.is_some()
            && self.carrier.is_some()
            && self.tracking_number.is_some()
    }
}

/// Latest known state of every tracked sample shipment.
pub struct SampleTracker {
    store: EntityStore<SampleShipment>,
}

impl SampleTracker {
    pub fn new(history: usize) -> Self {
        Self {
            store: EntityStore::new(history),
        }
    }

    pub fn apply_update(&mut self, update: DomainUpdate<SampleShipment>) -> ApplyOutcome {
        self.store.apply(update)
    }

    /// Location updates never touch anything but the location.
    pub fn apply_location(&mut self, update: DomainUpdate<SampleShipment>) -> ApplyOutcome {
        let DomainUpdate {
            id,
            timestamp,
            patch,
            ..
        } = update;
        let patch = SampleShipment {
            location: patch.location,
            ..Default::default()
        };
        self.store.apply(DomainUpdate::fields(&id, timestamp, patch))
    }

    pub fn apply_temperature_alert(
        &mut self,
        alert: &TemperatureAlert,
        fallback: DateTime<Utc>,
    ) -> ApplyOutcome {
        let patch = SampleShipment {
            temperature: Some(alert.temperature),
            temperature_breach: Some(true),
            ..Default::default()
        };
        let timestamp = alert.timestamp.unwrap_or(fallback);
        self.store
            .apply(DomainUpdate::fields(&alert.id, timestamp, patch))
    }

    pub fn bootstrap<I>(&mut self, snapshot: I) -> usize
    where
        I: IntoIterator<Item = DomainUpdate<SampleShipment>>,
    {
        self.store.bootstrap(snapshot)
    }

    pub fn get(&self, id: &str) -> Option<&SampleShipment> {
        self.store.get(id)
    }

    pub fn phase(&self, id: &str) -> Option<EntityPhase> {
        self.store.phase(id)
    }

    pub fn samples(&self) -> impl Iterator<Item = (&str, &Record<SampleShipment>)> {
        self.store.iter()
    }

    /// Shipments that have reported a temperature breach.
    pub fn breached(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .store
            .iter()
            .filter(|(_, r)| r.value.temperature_breach == Some(true))
            .map(|(id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn store(&self) -> &EntityStore<SampleShipment> {
        &self.store
    }
}

impl Consumer for SampleTracker {
    fn kinds(&self) -> Vec<MessageKind> {
        vec![
            MessageKind::SampleUpdate,
            MessageKind::SampleLocationUpdate,
            MessageKind::TemperatureAlert,
        ]
    }

    fn handle(&mut self, inbound: &Inbound) -> Vec<ApplyOutcome> {
        let outcome = match &inbound.message {
            RealtimeMessage::SampleUpdate(update) => self.apply_update(update.clone()),
            RealtimeMessage::SampleLocationUpdate(update) => self.apply_location(update.clone()),
            RealtimeMessage::TemperatureAlert(alert) => {
                self.apply_temperature_alert(alert, inbound.envelope.timestamp)
            }
            _ => return Vec::new(),
        };
        vec![outcome]
    }
}
