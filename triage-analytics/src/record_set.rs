//! The current set of raw records, one entry per patient id.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::normalize::record_id;

/// What happened to a record handed to [`RecordSet::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Replaced,
    /// An older version than the stored one; ignored.
    Stale,
    /// No usable id. Reported as ineligible by the next recompute only.
    Unkeyed,
}

/// A discharge from the external disposition feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DischargeEvent {
    /// Patient the discharge belongs to, when the feed supplies it.
    pub record_id: Option<String>,
    pub at: DateTime<Utc>,
}

impl From<DateTime<Utc>> for DischargeEvent {
    fn from(at: DateTime<Utc>) -> Self {
        Self { record_id: None, at }
    }
}

/// Discharges with a patient id are keyed by it; bare timestamps by the
/// timestamp itself, so a re-sent event replaces rather than adds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum DischargeKey {
    Record(String),
    At(DateTime<Utc>),
}

/// Raw records in first-seen order. A newer version of a record replaces
/// the stored one in place, so iteration order stays stable across
/// corrections.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    order: Vec<String>,
    entries: HashMap<String, Value>,
    unkeyed: Vec<Value>,
    discharges: BTreeMap<DischargeKey, DateTime<Utc>>,
    as_of: Option<DateTime<Utc>>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = Value>) -> Self {
        let mut set = Self::new();
        for record in records {
            set.upsert(record);
        }
        set
    }

    pub fn upsert(&mut self, raw: Value) -> Upsert {
        let Some(id) = record_id(&raw) else {
            self.unkeyed.push(raw);
            return Upsert::Unkeyed;
        };

        match self.entries.get_mut(&id) {
            Some(existing) => {
                let incoming = raw.get("version").and_then(Value::as_u64);
                let current = existing.get("version").and_then(Value::as_u64);
                if let (Some(incoming), Some(current)) = (incoming, current) {
                    if incoming < current {
                        tracing::debug!(record_id = %id, incoming, current, "ignoring stale record version");
                        return Upsert::Stale;
                    }
                }
                *existing = raw;
                Upsert::Replaced
            }
            None => {
                self.order.push(id.clone());
                self.entries.insert(id, raw);
                Upsert::Inserted
            }
        }
    }

    /// Returns false when the event replaced one already held.
    pub fn push_discharge(&mut self, event: DischargeEvent) -> bool {
        let key = match event.record_id {
            Some(id) => DischargeKey::Record(id),
            None => DischargeKey::At(event.at),
        };
        self.discharges.insert(key, event.at).is_none()
    }

    /// Drop discharges that happened before `cutoff`. Returns how many went.
    pub fn prune_discharges_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.discharges.len();
        self.discharges.retain(|_, at| *at >= cutoff);
        before - self.discharges.len()
    }

    /// Flow anchor for the next recompute; `None` falls back to the latest arrival.
    pub fn set_as_of(&mut self, as_of: Option<DateTime<Utc>>) {
        self.as_of = as_of;
    }

    pub fn as_of(&self) -> Option<DateTime<Utc>> {
        self.as_of
    }

    pub fn discharges(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.discharges.values().copied()
    }

    /// Copy of the set for one recompute. Records without an id cannot be
    /// corrected or matched later, so they are handed over and not kept.
    pub fn checkout(&mut self) -> RecordSet {
        let copy = self.clone();
        self.unkeyed.clear();
        copy
    }

    /// Keyed records in first-seen order, then records without an id.
    pub fn records(&self) -> impl Iterator<Item = &Value> + '_ {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .chain(self.unkeyed.iter())
    }

    pub fn len(&self) -> usize {
        self.order.len() + self.unkeyed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
