//! Timestamp-ordered reducers that fold partial updates into entity maps.
//!
//! Every store follows the same rule, per field: a field is written only when
//! the update is at least as new as the last write to that field. `Full`
//! updates write every field (clearing the ones they leave unset), `Fields`
//! updates write just the fields they carry. Patches touching different
//! fields therefore commute, whatever order they arrive in. An update for an
//! unknown id creates the entity from whatever fields it has.

pub mod metrics;
pub mod orders;
pub mod samples;

pub use metrics::MetricsBoard;
pub use orders::OrderTracker;
pub use samples::SampleTracker;

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::model::{DomainUpdate, MessageKind, UpdateMode};
use crate::router::Inbound;

const MAX_TOMBSTONES: usize = 256;

/// An entity type that can absorb partial patches of itself.
pub trait Reconcile: Default + Clone {
    /// Write the fields of `patch` that `clock` lets through at `at`.
    fn merge(
        &mut self,
        patch: Self,
        clock: &mut FieldClock,
        at: DateTime<Utc>,
        mode: UpdateMode,
    ) -> MergeCount;

    /// Whether enough fields are known to show the entity as complete.
    fn is_complete(&self) -> bool;
}

/// Generates a timestamp-guarded merge over `Option` fields.
macro_rules! merge_fields {
    ($target:expr, $patch:expr, $clock:expr, $at:expr, $mode:expr, [$($field:ident),+ $(,)?]) => {{
        let mut count = $crate::reconcile::MergeCount::default();
        let full = matches!($mode, $crate::model::UpdateMode::Full);
        $(
            if full || $patch.$field.is_some() {
                if $clock.claim(stringify!($field), $at) {
                    $target.$field = $patch.$field;
                    count.written += 1;
                } else {
                    count.skipped += 1;
                }
            }
        )+
        count
    }};
}
pub(crate) use merge_fields;

/// A consumer folds the router messages it cares about into its own state.
pub trait Consumer {
    fn kinds(&self) -> Vec<MessageKind>;

    fn handle(&mut self, inbound: &Inbound) -> Vec<ApplyOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityPhase {
    Partial,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Removed,
    /// Older than the stored state; dropped.
    Stale,
    /// Accepted by the consumer without changing an entity.
    Ignored,
}

impl ApplyOutcome {
    #[inline]
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::Removed)
    }
}

/// Last write time of each field of one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldClock {
    stamps: HashMap<&'static str, DateTime<Utc>>,
}

impl FieldClock {
    pub fn stamp(&self, field: &str) -> Option<DateTime<Utc>> {
        self.stamps.get(field).copied()
    }

    /// Record a write of `field` at `at`, unless a newer write already holds it.
    pub fn claim(&mut self, field: &'static str, at: DateTime<Utc>) -> bool {
        match self.stamps.get(field) {
            Some(held) if *held > at => false,
            _ => {
                self.stamps.insert(field, at);
                true
            }
        }
    }
}

/// Fields written and fields refused by one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCount {
    pub written: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record<T> {
    pub value: T,
    /// Newest accepted update for this entity.
    pub updated_at: DateTime<Utc>,
    pub phase: EntityPhase,
    pub clock: FieldClock,
}

/// Entry of the recent-changes log.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedUpdate {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: ApplyOutcome,
}

pub struct EntityStore<T> {
    entities: HashMap<String, Record<T>>,
    // removal time per id, so late updates cannot resurrect the entity
    tombstones: HashMap<String, DateTime<Utc>>,
    tombstone_order: VecDeque<String>,
    recent: VecDeque<AppliedUpdate>,
    history: usize,
}

impl<T: Reconcile> EntityStore<T> {
    pub fn new(history: usize) -> Self {
        Self {
            entities: HashMap::new(),
            tombstones: HashMap::new(),
            tombstone_order: VecDeque::new(),
            recent: VecDeque::with_capacity(history.min(1024)),
            history,
        }
    }

    pub fn apply(&mut self, update: DomainUpdate<T>) -> ApplyOutcome {
        let DomainUpdate {
            id,
            timestamp,
            mode,
            patch,
        } = update;

        if let Some(removed_at) = self.tombstones.get(&id) {
            if timestamp <= *removed_at {
                trace!("Ignoring update for removed entity {}", id);
                return ApplyOutcome::Stale;
            }
            self.tombstones.remove(&id);
            self.tombstone_order.retain(|t| t != &id);
        }

        let outcome = match self.entities.get_mut(&id) {
            Some(record) => {
                let merged = record
                    .value
                    .merge(patch, &mut record.clock, timestamp, mode);
                if merged.written == 0 && merged.skipped > 0 {
                    debug!(
                        "Stale update for {} at {} (newest {})",
                        id, timestamp, record.updated_at
                    );
                    return ApplyOutcome::Stale;
                }
                if merged.skipped > 0 {
                    trace!("Kept {} newer fields of {}", merged.skipped, id);
                }
                record.updated_at = record.updated_at.max(timestamp);
                if record.value.is_complete() {
                    record.phase = EntityPhase::Complete;
                }
                ApplyOutcome::Updated
            }
            None => {
                let mut value = T::default();
                let mut clock = FieldClock::default();
                value.merge(patch, &mut clock, timestamp, mode);
                let phase = if value.is_complete() {
                    EntityPhase::Complete
                } else {
                    EntityPhase::Partial
                };
                self.entities.insert(
                    id.clone(),
                    Record {
                        value,
                        updated_at: timestamp,
                        phase,
                        clock,
                    },
                );
                ApplyOutcome::Created
            }
        };

        self.log(id, timestamp, outcome);
        outcome
    }

    /// Remove an entity unless it was updated after `timestamp`.
    pub fn remove(&mut self, id: &str, timestamp: DateTime<Utc>) -> ApplyOutcome {
        if let Some(record) = self.entities.get(id) {
            if record.updated_at > timestamp {
                debug!("Stale removal for {}", id);
                return ApplyOutcome::Stale;
            }
            self.entities.remove(id);
        }

        self.tombstone(id, timestamp);
        self.log(id.to_string(), timestamp, ApplyOutcome::Removed);
        ApplyOutcome::Removed
    }

    /// Seed from a snapshot through the normal merge rule. Returns how many
    /// entries were accepted.
    pub fn bootstrap<I>(&mut self, snapshot: I) -> usize
    where
        I: IntoIterator<Item = DomainUpdate<T>>,
    {
        snapshot
            .into_iter()
            .map(|update| self.apply(update))
            .filter(ApplyOutcome::is_change)
            .count()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.entities.get(id).map(|r| &r.value)
    }

    pub fn record(&self, id: &str) -> Option<&Record<T>> {
        self.entities.get(id)
    }

    pub fn phase(&self, id: &str) -> Option<EntityPhase> {
        self.entities.get(id).map(|r| r.phase)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Record<T>)> {
        self.entities.iter().map(|(id, r)| (id.as_str(), r))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn is_removed(&self, id: &str) -> bool {
        self.tombstones.contains_key(id)
    }

    /// Accepted changes, newest first.
    pub fn recent_updates(&self) -> impl Iterator<Item = &AppliedUpdate> {
        self.recent.iter().rev()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.recent.back().map(|u| u.timestamp)
    }

    fn tombstone(&mut self, id: &str, timestamp: DateTime<Utc>) {
        if self.tombstones.insert(id.to_string(), timestamp).is_none() {
            self.tombstone_order.push_back(id.to_string());
        }
        while self.tombstone_order.len() > MAX_TOMBSTONES {
            if let Some(oldest) = self.tombstone_order.pop_front() {
                self.tombstones.remove(&oldest);
            }
        }
    }

    fn log(&mut self, id: String, timestamp: DateTime<Utc>, outcome: ApplyOutcome) {
        if self.history == 0 {
            return;
        }
        if self.recent.len() >= self.history {
            self.recent.pop_front();
        }
        self.recent.push_back(AppliedUpdate {
            id,
            timestamp,
            outcome,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Probe {
        a: Option<i64>,
        b: Option<String>,
    }

    impl Reconcile for Probe {
        fn merge(
            &mut self,
            patch: Self,
            clock: &mut FieldClock,
            at: DateTime<Utc>,
            mode: UpdateMode,
        ) -> MergeCount {
            merge_fields!(self, patch, clock, at, mode, [a, b])
        }

        fn is_complete(&self) -> bool {
            self.a.is_some() && self.b.is_some()
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn a(value: i64) -> Probe {
        Probe {
            a: Some(value),
            b: None,
        }
    }

    #[test]
    fn test_stale_update_rejected() {
        let mut store = EntityStore::new(10);
        assert_eq!(store.apply(DomainUpdate::fields("x", ts(2), a(1))), ApplyOutcome::Created);
        assert_eq!(store.apply(DomainUpdate::fields("x", ts(1), a(2))), ApplyOutcome::Stale);
        assert_eq!(store.get("x").unwrap().a, Some(1));
    }

    #[test]
    fn test_equal_timestamp_wins() {
        let mut store = EntityStore::new(10);
        store.apply(DomainUpdate::fields("x", ts(1), a(1)));
        assert_eq!(store.apply(DomainUpdate::fields("x", ts(1), a(2))), ApplyOutcome::Updated);
        assert_eq!(store.get("x").unwrap().a, Some(2));
    }

    #[test]
    fn test_fields_merge_and_full_replace() {
        let mut store = EntityStore::new(10);
        store.apply(DomainUpdate::fields("x", ts(1), a(1)));
        store.apply(DomainUpdate::fields(
            "x",
            ts(2),
            Probe {
                a: None,
                b: Some("kept".into()),
            },
        ));
        assert_eq!(
            store.get("x"),
            Some(&Probe {
                a: Some(1),
                b: Some("kept".into())
            })
        );

        store.apply(DomainUpdate::full("x", ts(3), a(9)));
        assert_eq!(store.get("x"), Some(&a(9)));
    }

    #[test]
    fn test_partial_entity_from_unknown_id() {
        let mut store = EntityStore::new(10);
        store.apply(DomainUpdate::fields("new", ts(1), a(5)));

        assert_eq!(store.get("new"), Some(&a(5)));
        assert_eq!(store.phase("new"), Some(EntityPhase::Partial));
    }

    #[test]
    fn test_complete_never_regresses() {
        let mut store = EntityStore::new(10);
        store.apply(DomainUpdate::fields(
            "x",
            ts(1),
            Probe {
                a: Some(1),
                b: Some("b".into()),
            },
        ));
        assert_eq!(store.phase("x"), Some(EntityPhase::Complete));

        store.apply(DomainUpdate::full("x", ts(2), a(2)));
        assert_eq!(store.phase("x"), Some(EntityPhase::Complete));
    }

    #[test]
    fn test_out_of_order_delivery_converges() {
        let updates = vec![
            DomainUpdate::fields("x", ts(1), a(1)),
            DomainUpdate::fields("x", ts(2), a(2)),
            DomainUpdate::fields("x", ts(3), a(3)),
        ];

        let mut in_order = EntityStore::new(10);
        in_order.bootstrap(updates.clone());
        let mut reversed = EntityStore::new(10);
        reversed.bootstrap(updates.into_iter().rev());

        assert_eq!(in_order.get("x"), reversed.get("x"));
    }

    #[test]
    fn test_removal_blocks_older_updates() {
        let mut store = EntityStore::new(10);
        store.apply(DomainUpdate::fields("x", ts(1), a(1)));

        assert_eq!(store.remove("x", ts(5)), ApplyOutcome::Removed);
        assert!(store.get("x").is_none());
        assert_eq!(store.apply(DomainUpdate::fields("x", ts(4), a(2))), ApplyOutcome::Stale);
        assert!(store.get("x").is_none());

        assert_eq!(store.apply(DomainUpdate::fields("x", ts(6), a(3))), ApplyOutcome::Created);
        assert!(!store.is_removed("x"));
    }

    #[test]
    fn test_stale_removal_keeps_entity() {
        let mut store = EntityStore::new(10);
        store.apply(DomainUpdate::fields("x", ts(5), a(1)));
        assert_eq!(store.remove("x", ts(4)), ApplyOutcome::Stale);
        assert!(store.get("x").is_some());
    }

    #[test]
    fn test_recent_updates_bounded_newest_first() {
        let mut store = EntityStore::new(2);
        for n in 0..4 {
            store.apply(DomainUpdate::fields(&format!("e{}", n), ts(n), a(n)));
        }

        let ids: Vec<_> = store.recent_updates().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["e3", "e2"]);
        assert_eq!(store.last_updated(), Some(ts(3)));
    }

    fn b(value: &str) -> Probe {
        Probe {
            a: None,
            b: Some(value.to_string()),
        }
    }

    #[test]
    fn test_disjoint_fields_commute() {
        let updates = vec![
            DomainUpdate::fields("x", ts(1), a(5)),
            DomainUpdate::fields("x", ts(2), b("dhl")),
        ];

        let mut in_order = EntityStore::new(10);
        in_order.bootstrap(updates.clone());
        let mut reversed = EntityStore::new(10);
        let outcomes: Vec<_> = updates
            .into_iter()
            .rev()
            .map(|u| reversed.apply(u))
            .collect();

        assert_eq!(outcomes, vec![ApplyOutcome::Created, ApplyOutcome::Updated]);
        assert_eq!(
            in_order.get("x"),
            Some(&Probe {
                a: Some(5),
                b: Some("dhl".into())
            })
        );
        assert_eq!(in_order.get("x"), reversed.get("x"));
        assert_eq!(reversed.record("x").unwrap().updated_at, ts(2));
    }

    #[test]
    fn test_late_full_keeps_newer_fields() {
        let mut in_order = EntityStore::new(10);
        in_order.apply(DomainUpdate::full("x", ts(1), a(1)));
        in_order.apply(DomainUpdate::fields("x", ts(2), b("late")));

        let mut reversed = EntityStore::new(10);
        reversed.apply(DomainUpdate::fields("x", ts(2), b("late")));
        assert_eq!(reversed.apply(DomainUpdate::full("x", ts(1), a(1))), ApplyOutcome::Updated);

        assert_eq!(in_order.get("x"), reversed.get("x"));
        // b still carries its ts(2) write
        assert_eq!(reversed.apply(DomainUpdate::fields("x", ts(0), b("old"))), ApplyOutcome::Stale);
    }
}
