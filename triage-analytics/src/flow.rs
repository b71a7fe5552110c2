//! Trailing-window arrival flow in fixed-width buckets.

use chrono::{DateTime, Duration, Utc};
use triage_core::{AnalyticsError, FlowBucket, PatientRecord, RiskBucket, MAX_FLOW_BUCKETS};

/// A contiguous run of half-open buckets `[start, start + width)` whose last
/// bucket contains the anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowWindow {
    start: DateTime<Utc>,
    width: Duration,
    buckets: usize,
}

impl FlowWindow {
    pub fn ending_at(
        anchor: DateTime<Utc>,
        window_hours: u32,
        bucket_width_minutes: u32,
    ) -> Result<Self, AnalyticsError> {
        if window_hours == 0 || bucket_width_minutes == 0 {
            return Err(AnalyticsError::InvalidConfig(
                "flow window and bucket width must be positive".to_string(),
            ));
        }

        let width_secs = i64::from(bucket_width_minutes) * 60;
        let buckets = (i64::from(window_hours) * 60 / i64::from(bucket_width_minutes)).max(1);
        if buckets as u64 > MAX_FLOW_BUCKETS {
            return Err(AnalyticsError::InvalidConfig(format!(
                "flow window holds more than {MAX_FLOW_BUCKETS} buckets"
            )));
        }

        let floored = anchor.timestamp().div_euclid(width_secs) * width_secs;
        let last_start = DateTime::from_timestamp(floored, 0).ok_or_else(|| {
            AnalyticsError::RecomputeFailure(format!("flow anchor {anchor} is not representable"))
        })?;
        let width = Duration::seconds(width_secs);
        let start = last_start
            .checked_sub_signed(Duration::seconds(width_secs * (buckets - 1)))
            .ok_or_else(|| {
                AnalyticsError::RecomputeFailure(format!(
                    "flow window before {anchor} is not representable"
                ))
            })?;
        start.checked_add_signed(width * buckets as i32).ok_or_else(|| {
            AnalyticsError::RecomputeFailure(format!(
                "flow window after {anchor} is not representable"
            ))
        })?;

        Ok(Self {
            start,
            width,
            buckets: buckets as usize,
        })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.width * self.buckets as i32
    }

    pub fn len(&self) -> usize {
        self.buckets
    }

    pub fn is_empty(&self) -> bool {
        self.buckets == 0
    }

    /// Index of the bucket holding `at`, or `None` outside the window.
    pub fn bucket_index(&self, at: DateTime<Utc>) -> Option<usize> {
        if at < self.start || at >= self.end() {
            return None;
        }
        let offset = (at - self.start).num_seconds() / self.width.num_seconds();
        Some(offset as usize)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct FlowCounts {
    arrivals: usize,
    discharges: usize,
    high_risk_arrivals: usize,
}

/// Emits every bucket of the window, including empty ones.
#[derive(Debug, Clone)]
pub struct TemporalFlowAggregator {
    window: FlowWindow,
    counts: Vec<FlowCounts>,
}

impl TemporalFlowAggregator {
    pub fn new(window: FlowWindow) -> Self {
        Self {
            window,
            counts: vec![FlowCounts::default(); window.len()],
        }
    }

    /// Records with no arrival time or arriving outside the window are ignored.
    pub fn record_arrival(&mut self, record: &PatientRecord) {
        let Some(at) = record.arrival.arrived_at else {
            return;
        };
        if let Some(idx) = self.window.bucket_index(at) {
            let counts = &mut self.counts[idx];
            counts.arrivals += 1;
            if record.risk_bucket() == RiskBucket::High {
                counts.high_risk_arrivals += 1;
            }
        }
    }

    /// Discharge events come from an external disposition feed.
    pub fn record_discharge(&mut self, at: DateTime<Utc>) {
        if let Some(idx) = self.window.bucket_index(at) {
            self.counts[idx].discharges += 1;
        }
    }

    pub fn finish(self) -> Vec<FlowBucket> {
        let window = self.window;
        self.counts
            .into_iter()
            .enumerate()
            .map(|(idx, counts)| {
                let start = window.start + window.width * idx as i32;
                FlowBucket {
                    start,
                    end: start + window.width,
                    arrivals: counts.arrivals,
                    discharges: counts.discharges,
                    high_risk_arrivals: counts.high_risk_arrivals,
                }
            })
            .collect()
    }
}
