//! Snapshot Store: holds the published snapshot and serializes recomputes.
//!
//! Readers clone an `Arc` under a short read lock. A recompute builds a
//! whole new snapshot without holding that lock and publishes it with a
//! single pointer swap, so a reader sees either the old snapshot or the new
//! one, never a mix.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use triage_core::{AnalyticsConfig, AnalyticsError, AnalyticsSnapshot};

use crate::record_set::RecordSet;
use crate::{compute_record_set, AnalyticsInput};

/// Result of [`SnapshotStore::ingest`].
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// This call ran the recompute and published.
    Published(Arc<AnalyticsSnapshot>),
    /// A recompute was already running; it will pick this update up in its
    /// single follow-up pass.
    Coalesced,
}

#[derive(Debug, Default)]
struct PumpState {
    running: bool,
    dirty: bool,
}

pub struct SnapshotStore {
    config: AnalyticsConfig,
    published: RwLock<Arc<AnalyticsSnapshot>>,
    /// Held for the whole compute-and-publish of one recompute.
    writer: Mutex<()>,
    records: Mutex<RecordSet>,
    pump: Mutex<PumpState>,
    last_failure: RwLock<Option<String>>,
}

impl SnapshotStore {
    /// Starts with an empty snapshot at sequence 0.
    pub fn new(config: AnalyticsConfig) -> Result<Self, AnalyticsError> {
        config.validate()?;
        let initial = compute_record_set(&RecordSet::new(), &config)?;
        Ok(Self {
            config,
            published: RwLock::new(Arc::new(initial)),
            writer: Mutex::new(()),
            records: Mutex::new(RecordSet::new()),
            pump: Mutex::new(PumpState::default()),
            last_failure: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// The current snapshot. Always complete.
    pub fn snapshot(&self) -> Arc<AnalyticsSnapshot> {
        Arc::clone(&self.published.read())
    }

    pub fn version(&self) -> u64 {
        self.published.read().sequence
    }

    /// Message of the last failed recompute, cleared by the next publish.
    pub fn last_failure(&self) -> Option<String> {
        self.last_failure.read().clone()
    }

    /// Recompute from an explicit batch and publish it. The streaming record
    /// set used by [`SnapshotStore::ingest`] is left untouched.
    ///
    /// On failure the previously published snapshot stays current.
    #[tracing::instrument(skip_all, fields(records = input.records.len()))]
    pub fn recompute(&self, input: &AnalyticsInput) -> Result<Arc<AnalyticsSnapshot>, AnalyticsError> {
        self.recompute_set(&input.to_record_set())
    }

    /// Apply new or corrected records and discharge events, then recompute.
    ///
    /// The batch's `as_of` anchors the flow window until the next batch;
    /// a batch without one anchors on the latest arrival.
    ///
    /// While a recompute is in flight, updates only mark the set dirty; the
    /// running pass then does exactly one more recompute however many
    /// updates arrived.
    pub fn ingest(&self, batch: AnalyticsInput) -> Result<IngestOutcome, AnalyticsError> {
        {
            let mut records = self.records.lock();
            for record in batch.records {
                records.upsert(record);
            }
            for event in batch.discharges {
                records.push_discharge(event);
            }
            records.set_as_of(batch.as_of);
        }

        {
            let mut pump = self.pump.lock();
            if pump.running {
                pump.dirty = true;
                tracing::debug!("recompute in flight; coalescing update");
                return Ok(IngestOutcome::Coalesced);
            }
            pump.running = true;
        }

        self.drain().map(IngestOutcome::Published)
    }

    fn drain(&self) -> Result<Arc<AnalyticsSnapshot>, AnalyticsError> {
        loop {
            let set = self.records.lock().checkout();
            let outcome = self.recompute_set(&set);
            if let Ok(snapshot) = &outcome {
                self.prune_discharges(snapshot);
            }
            if !self.finish_run() {
                return outcome;
            }
        }
    }

    /// Discharges before the published window can no longer land in any bucket.
    fn prune_discharges(&self, snapshot: &AnalyticsSnapshot) {
        let Some(first) = snapshot.hourly_flow.first() else {
            return;
        };
        let pruned = self.records.lock().prune_discharges_before(first.start);
        if pruned > 0 {
            tracing::debug!(pruned, cutoff = %first.start, "dropped discharges outside the flow window");
        }
    }

    /// True if updates arrived during the last run and one more is owed.
    fn finish_run(&self) -> bool {
        let mut pump = self.pump.lock();
        if pump.dirty {
            pump.dirty = false;
            true
        } else {
            pump.running = false;
            false
        }
    }

    fn recompute_set(&self, set: &RecordSet) -> Result<Arc<AnalyticsSnapshot>, AnalyticsError> {
        let _writer = self.writer.lock();

        let computed = panic::catch_unwind(AssertUnwindSafe(|| compute_record_set(set, &self.config)))
            .unwrap_or_else(|payload| {
                Err(AnalyticsError::RecomputeFailure(format!(
                    "builder panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });

        match computed {
            Ok(snapshot) => Ok(self.publish(snapshot)),
            Err(err) => {
                tracing::error!(
                    error = %err,
                    current = self.version(),
                    "recompute failed; previous snapshot stays published"
                );
                *self.last_failure.write() = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn publish(&self, mut snapshot: AnalyticsSnapshot) -> Arc<AnalyticsSnapshot> {
        let snapshot = {
            let mut published = self.published.write();
            snapshot.sequence = published.sequence + 1;
            let snapshot = Arc::new(snapshot);
            *published = Arc::clone(&snapshot);
            snapshot
        };
        *self.last_failure.write() = None;

        tracing::info!(
            sequence = snapshot.sequence,
            eligible = snapshot.eligible_records,
            ineligible = snapshot.diagnostics.ineligible,
            "published analytics snapshot"
        );
        snapshot
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
