use chrono::{DateTime, Utc};

use super::{
    merge_fields, ApplyOutcome, Consumer, EntityPhase, EntityStore, FieldClock, MergeCount, Reconcile,
    Record,
};
use crate::model::order::{FulfillmentStatus, Order, OrderLine};
use crate::model::{DomainUpdate, MessageKind, RealtimeMessage, UpdateMode};
use crate::router::Inbound;

impl Reconcile for Order {
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
                customer_name,
                total_amount,
                currency,
                expected_ship_date,
                line_count,
            ]
        )
    }

    fn is_complete(&self) -> bool {
        self.status.is_some() && self.customer_name.is_some() && self.total_amount.is_some()
    }
}

impl Reconcile for OrderLine {
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
                order_id,
                sku,
                product_name,
                quantity,
                unit_price,
                fulfilled_quantity,
                fulfillment_status,
                carrier,
                tracking_number,
                shipped_at,
            ]
        )
    }

    fn is_complete(&self) -> bool {
        self.order_id.is_some()
            && self.sku.is_some()
            && self.quantity.is_some()
            && self.fulfillment_status.is_some()
    }
}

/// Order headers and their lines, kept in two independent stores.
pub struct OrderTracker {
    orders: EntityStore<Order>,
    lines: EntityStore<OrderLine>,
}

impl OrderTracker {
    pub fn new(history: usize) -> Self {
        Self {
            orders: EntityStore::new(history),
            lines: EntityStore::new(history),
        }
    }

    pub fn apply_order(&mut self, update: DomainUpdate<Order>) -> ApplyOutcome {
        self.orders.apply(update)
    }

    pub fn apply_line(&mut self, update: DomainUpdate<OrderLine>) -> ApplyOutcome {
        self.lines.apply(update)
    }

    /// Fold only the fulfillment progress of a line.
    pub fn apply_fulfillment(&mut self, update: DomainUpdate<OrderLine>) -> ApplyOutcome {
        let DomainUpdate {
            id,
            timestamp,
            patch,
            ..
        } = update;
        let patch = OrderLine {
            order_id: patch.order_id,
            fulfilled_quantity: patch.fulfilled_quantity,
            fulfillment_status: patch.fulfillment_status,
            carrier: patch.carrier,
            tracking_number: patch.tracking_number,
            shipped_at: patch.shipped_at,
            ..Default::default()
        };
        self.lines.apply(DomainUpdate::fields(&id, timestamp, patch))
    }

    pub fn order(&self, id: &str) -> Option<&Order> {
        self.orders.get(id)
    }

    pub fn line(&self, id: &str) -> Option<&OrderLine> {
        self.lines.get(id)
    }

    pub fn order_phase(&self, id: &str) -> Option<EntityPhase> {
        self.orders.phase(id)
    }

    pub fn line_phase(&self, id: &str) -> Option<EntityPhase> {
        self.lines.phase(id)
    }

    pub fn orders(&self) -> impl Iterator<Item = (&str, &Record<Order>)> {
        self.orders.iter()
    }

    /// Lines belonging to `order_id`, sorted by line id.
    pub fn lines_for_order(&self, order_id: &str) -> Vec<(&str, &OrderLine)> {
        let mut lines: Vec<(&str, &OrderLine)> = self
            .lines
            .iter()
            .filter(|(_, r)| r.value.order_id.as_deref() == Some(order_id))
            .map(|(id, r)| (id, &r.value))
            .collect();
        lines.sort_unstable_by(|a, b| a.0.cmp(b.0));
        lines
    }

    /// Whether every known line of the order has been delivered.
    pub fn is_fully_delivered(&self, order_id: &str) -> bool {
        let lines = self.lines_for_order(order_id);
        !lines.is_empty()
            && lines
                .iter()
                .all(|(_, l)| l.fulfillment_status == Some(FulfillmentStatus::Delivered))
    }

    pub fn order_store(&self) -> &EntityStore<Order> {
        &self.orders
    }

    pub fn line_store(&self) -> &EntityStore<OrderLine> {
        &self.lines
    }
}

impl Consumer for OrderTracker {
    fn kinds(&self) -> Vec<MessageKind> {
        vec![
            MessageKind::OrderUpdate,
            MessageKind::OrderLineUpdate,
            MessageKind::FulfillmentUpdate,
        ]
    }

    fn handle(&mut self, inbound: &Inbound) -> Vec<ApplyOutcome> {
        let outcome = match &inbound.message {
            RealtimeMessage::OrderUpdate(update) => self.apply_order(update.clone()),
            RealtimeMessage::OrderLineUpdate(update) => self.apply_line(update.clone()),
            RealtimeMessage::FulfillmentUpdate(update) => self.apply_fulfillment(update.clone()),
            _ => return Vec::new(),
        };
        vec![outcome]
    }
}
