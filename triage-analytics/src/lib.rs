//! Triage records to `AnalyticsSnapshot` aggregation engine.
//!
//! Raw records arrive as loosely shaped JSON, are normalized into
//! [`PatientRecord`]s, then fed through independent builders whose results
//! are merged into one immutable snapshot.

use chrono::{DateTime, Utc};
use serde_json::Value;
use triage_core::{
    AnalyticsConfig, AnalyticsError, AnalyticsSnapshot, EsiHistogram, OutOfRangeValue,
    PatientRecord, RangeField, RecomputeDiagnostics, Totals,
};

mod department;
mod distribution;
mod flow;
mod keywords;
mod normalize;
mod record_set;
mod store;

pub use department::DepartmentAggregator;
pub use distribution::{ConfidenceHistogramBuilder, VitalsRadarBuilder};
pub use flow::{FlowWindow, TemporalFlowAggregator};
pub use keywords::{tokenize_complaint, KeywordFrequencyAnalyzer};
pub use normalize::normalize_record;
pub use record_set::{DischargeEvent, RecordSet, Upsert};
pub use store::{IngestOutcome, SnapshotStore};

use crate::distribution::MeanAccumulator;

/// Confidence scores live on a 0-100 scale.
const CONFIDENCE_DOMAIN: (f64, f64) = (0.0, 100.0);

/// One batch of input: raw records plus the external discharge feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyticsInput {
    pub records: Vec<Value>,
    pub discharges: Vec<DischargeEvent>,
    /// Flow window anchor for this batch; defaults to the latest arrival.
    pub as_of: Option<DateTime<Utc>>,
}

impl AnalyticsInput {
    pub fn from_records(records: Vec<Value>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    /// Parse either a bare array of records or
    /// `{ "records": [...], "discharges": [...], "as_of": "..." }`.
    /// A discharge is a timestamp or `{ "id": "...", "at": "..." }`.
    pub fn from_json_str(text: &str) -> Result<Self, AnalyticsError> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| AnalyticsError::Parse(err.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, AnalyticsError> {
        match value {
            Value::Array(records) => Ok(Self::from_records(records)),
            Value::Object(mut map) => {
                let records = match map.remove("records") {
                    Some(Value::Array(records)) => records,
                    Some(_) => {
                        return Err(AnalyticsError::Parse("records must be an array".to_string()))
                    }
                    None => return Err(AnalyticsError::MissingData),
                };

                let discharges = match map.get("discharges") {
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(parse_discharge)
                        .collect::<Result<Vec<_>, _>>()?,
                    Some(Value::Null) | None => Vec::new(),
                    Some(_) => {
                        return Err(AnalyticsError::Parse(
                            "discharges must be an array".to_string(),
                        ))
                    }
                };

                let as_of = match map.get("as_of").or_else(|| map.get("asOf")) {
                    Some(Value::Null) | None => None,
                    Some(raw) => Some(normalize::parse_timestamp(raw).ok_or_else(|| {
                        AnalyticsError::Parse(format!("invalid as_of {raw}"))
                    })?),
                };

                Ok(Self {
                    records,
                    discharges,
                    as_of,
                })
            }
            _ => Err(AnalyticsError::Parse(
                "expected an array of records or an object with `records`".to_string(),
            )),
        }
    }

    pub(crate) fn to_record_set(&self) -> RecordSet {
        let mut set = RecordSet::from_records(self.records.iter().cloned());
        for event in &self.discharges {
            set.push_discharge(event.clone());
        }
        set.set_as_of(self.as_of);
        set
    }
}

fn parse_discharge(item: &Value) -> Result<DischargeEvent, AnalyticsError> {
    let invalid = || AnalyticsError::Parse(format!("invalid discharge {item}"));
    match item {
        Value::Object(_) => {
            let at = ["at", "time", "timestamp", "dischargedAt"]
                .iter()
                .filter_map(|key| item.get(*key))
                .find_map(normalize::parse_timestamp)
                .ok_or_else(invalid)?;
            Ok(DischargeEvent {
                record_id: normalize::record_id(item),
                at,
            })
        }
        other => normalize::parse_timestamp(other)
            .map(DischargeEvent::from)
            .ok_or_else(invalid),
    }
}

/// Compute a snapshot from one batch. Pure: nothing is published.
///
/// Records sharing an id are collapsed to their latest version first.
#[tracing::instrument(skip_all, fields(records = input.records.len()))]
pub fn compute_snapshot(
    input: &AnalyticsInput,
    config: &AnalyticsConfig,
) -> Result<AnalyticsSnapshot, AnalyticsError> {
    compute_record_set(&input.to_record_set(), config)
}

pub(crate) fn compute_record_set(
    set: &RecordSet,
    config: &AnalyticsConfig,
) -> Result<AnalyticsSnapshot, AnalyticsError> {
    config.validate().map_err(into_recompute_failure)?;
    let (records, diagnostics) = normalize_records(set.records());
    let discharges: Vec<DateTime<Utc>> = set.discharges().collect();
    aggregate_records(&records, diagnostics, &discharges, set.as_of(), config)
        .map_err(into_recompute_failure)
}

fn into_recompute_failure(err: AnalyticsError) -> AnalyticsError {
    match err {
        AnalyticsError::RecomputeFailure(_) => err,
        other => AnalyticsError::RecomputeFailure(other.to_string()),
    }
}

/// Split raw records into the analytics-eligible set and per-record
/// diagnostics. Never fails as a whole.
pub fn normalize_records<'a>(
    raw: impl IntoIterator<Item = &'a Value>,
) -> (Vec<PatientRecord>, RecomputeDiagnostics) {
    let mut records = Vec::new();
    let mut diagnostics = RecomputeDiagnostics::default();

    for (index, value) in raw.into_iter().enumerate() {
        match normalize_record(value, index) {
            Ok(record) => {
                if let Some(warning) = record.acuity_warning() {
                    tracing::warn!(
                        record_id = %warning.record_id,
                        esi = %warning.esi,
                        supplied = ?warning.supplied,
                        expected = ?warning.expected,
                        "acuity color disagrees with ESI; using ESI"
                    );
                    diagnostics.integrity_warnings.push(warning);
                }
                records.push(record);
            }
            Err(AnalyticsError::OutOfRangeValue(err)) => {
                tracing::warn!(error = %err, "record excluded: value out of range");
                diagnostics.out_of_range.push(err);
            }
            Err(err) => {
                tracing::debug!(error = %err, "record not eligible for analytics");
                diagnostics.ineligible += 1;
            }
        }
    }

    (records, diagnostics)
}

/// Run every builder over already-normalized records and assemble the snapshot.
pub fn aggregate_records(
    records: &[PatientRecord],
    mut diagnostics: RecomputeDiagnostics,
    discharges: &[DateTime<Utc>],
    as_of: Option<DateTime<Utc>>,
    config: &AnalyticsConfig,
) -> Result<AnalyticsSnapshot, AnalyticsError> {
    let anchor = as_of
        .or_else(|| records.iter().filter_map(|r| r.arrival.arrived_at).max())
        .unwrap_or_else(Utc::now);

    let mut histogram = ConfidenceHistogramBuilder::new(&config.confidence_bucket_edges)?;
    let mut radar = VitalsRadarBuilder::new(config);
    let mut departments = DepartmentAggregator::new();
    let mut flow = TemporalFlowAggregator::new(FlowWindow::ending_at(
        anchor,
        config.flow_window_hours,
        config.flow_bucket_width_minutes,
    )?);
    let mut keywords = KeywordFrequencyAnalyzer::new(&config.stop_words);

    let mut totals = Totals::default();
    let mut esi_histogram = EsiHistogram::default();
    let mut overall_confidence = MeanAccumulator::default();

    for record in records {
        let bucket = record.risk_bucket();
        *totals.by_risk.get_mut(bucket) += 1;
        totals.by_acuity.increment(record.decision.effective_color());
        totals.by_arrival_mode.increment(record.arrival.mode);
        esi_histogram.increment(record.decision.esi);

        let confidence = usable_confidence(record, &mut diagnostics);
        if let Some(value) = confidence {
            overall_confidence.push(value);
            if let Err(err) = histogram.record(&record.id, value) {
                tracing::warn!(error = %err, "confidence excluded from histogram");
                diagnostics.out_of_range.push(err);
            }
        }

        radar.record(record);
        departments.record(record, confidence);
        flow.record_arrival(record);
        keywords.record(&record.chief_complaint);
    }

    for at in discharges {
        flow.record_discharge(*at);
    }

    totals.mean_confidence = overall_confidence.mean().unwrap_or(0.0);

    Ok(AnalyticsSnapshot {
        sequence: 0,
        generated_at: Utc::now(),
        as_of: anchor,
        eligible_records: records.len(),
        totals,
        esi_histogram,
        confidence_histogram: histogram.finish(),
        vitals_radar: radar.finish(),
        department_metrics: departments.finish(),
        hourly_flow: flow.finish(),
        keyword_frequency: keywords.top(config.keyword_top_n),
        diagnostics,
    })
}

/// The record's confidence if it lies on the 0-100 scale. Anything else is
/// reported once and kept out of every confidence view.
fn usable_confidence(record: &PatientRecord, diagnostics: &mut RecomputeDiagnostics) -> Option<f64> {
    let Some(value) = record.decision.confidence else {
        diagnostics.missing_confidence += 1;
        return None;
    };

    let (min, max) = CONFIDENCE_DOMAIN;
    if (min..=max).contains(&value) {
        return Some(value);
    }

    let err = OutOfRangeValue {
        record_id: record.id.clone(),
        field: RangeField::Confidence,
        value,
        min,
        max,
    };
    tracing::warn!(error = %err, "confidence outside its scale");
    diagnostics.out_of_range.push(err);
    None
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use triage_core::{Esi, RiskBucket, VitalKind};

    use super::*;

    #[test]
    fn empty_input_yields_zeroed_snapshot() {
        let input = AnalyticsInput {
            as_of: DateTime::parse_from_rfc3339("2026-03-14T10:00:00Z")
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            ..AnalyticsInput::default()
        };
        let snapshot = compute_snapshot(&input, &AnalyticsConfig::default()).unwrap();

        assert_eq!(snapshot.eligible_records, 0);
        assert_eq!(snapshot.totals, Totals::default());
        assert_eq!(snapshot.esi_histogram.total(), 0);
        assert_eq!(snapshot.confidence_histogram.buckets.len(), 7);
        assert_eq!(snapshot.confidence_histogram.total(), 0);
        assert!(snapshot.department_metrics.is_empty());
        assert!(snapshot.keyword_frequency.is_empty());
        assert_eq!(snapshot.hourly_flow.len(), 24);
        assert_eq!(snapshot.vitals_radar.len(), VitalKind::ALL.len());
        assert!(snapshot
            .vitals_radar
            .iter()
            .all(|radar| radar.buckets.high.normalized == 0.0 && radar.buckets.low.samples == 0));
    }

    #[test]
    fn single_critical_patient() {
        let input = AnalyticsInput::from_records(vec![json!({
            "id": "P-1",
            "arrival": { "time": "2026-03-14T09:10:00Z", "mode": "ambulance" },
            "decision": { "esi": 1, "confidence": 92, "specialists": ["Cardiology"] }
        })]);
        let snapshot = compute_snapshot(&input, &AnalyticsConfig::default()).unwrap();

        assert_eq!(snapshot.totals.by_risk.high, 1);
        assert_eq!(snapshot.totals.by_acuity.critical, 1);
        assert_eq!(snapshot.esi_histogram.get(Esi::ALL[0]), 1);
        assert_eq!(snapshot.confidence_histogram.count_for("90-95%"), Some(1));
        let cardiology = snapshot.department("Cardiology").unwrap();
        assert_eq!(cardiology.count, 1);
        assert_eq!(cardiology.high_risk_count, 1);
        assert_eq!(cardiology.mean_confidence, 92.0);
        assert_eq!(snapshot.department_metrics.len(), 1);
        assert_eq!(snapshot.hourly_flow.last().unwrap().high_risk_arrivals, 1);
    }

    #[test]
    fn out_of_range_confidence_still_counts_toward_esi() {
        let input = AnalyticsInput::from_records(vec![json!({
            "id": "P-2",
            "decision": { "esi": 3, "confidence": 150, "specialists": ["Surgery"] }
        })]);
        let snapshot = compute_snapshot(&input, &AnalyticsConfig::default()).unwrap();

        assert_eq!(snapshot.confidence_histogram.total(), 0);
        assert_eq!(snapshot.esi_histogram.get(Esi::ALL[2]), 1);
        assert_eq!(snapshot.diagnostics.out_of_range.len(), 1);
        assert_eq!(snapshot.diagnostics.out_of_range[0].field, RangeField::Confidence);
        assert_eq!(snapshot.department("Surgery").unwrap().mean_confidence, 0.0);
    }

    #[test]
    fn low_confidence_is_kept_in_means_but_not_histogram() {
        let input = AnalyticsInput::from_records(vec![json!({
            "id": "P-3",
            "decision": { "esi": 4, "confidence": 40, "specialists": ["Dermatology"] }
        })]);
        let snapshot = compute_snapshot(&input, &AnalyticsConfig::default()).unwrap();

        assert_eq!(snapshot.confidence_histogram.total(), 0);
        assert_eq!(snapshot.diagnostics.out_of_range.len(), 1);
        assert_eq!(snapshot.totals.mean_confidence, 40.0);
        assert_eq!(snapshot.department("Dermatology").unwrap().mean_confidence, 40.0);
    }

    #[test]
    fn per_record_anomalies_do_not_abort() {
        let input = AnalyticsInput::from_records(vec![
            json!({ "id": "ok", "decision": { "esi": 3, "confidence": 80, "acuityColor": "red" } }),
            json!({ "id": "no-decision" }),
            json!({ "id": "bad-esi", "decision": { "esi": 0 } }),
        ]);
        let snapshot = compute_snapshot(&input, &AnalyticsConfig::default()).unwrap();

        assert_eq!(snapshot.eligible_records, 1);
        assert_eq!(snapshot.diagnostics.ineligible, 1);
        assert_eq!(snapshot.diagnostics.out_of_range.len(), 1);
        assert_eq!(snapshot.diagnostics.integrity_warnings.len(), 1);
        assert_eq!(snapshot.totals.by_risk.medium, 1);
        assert_eq!(snapshot.totals.by_acuity.urgent, 1);
        assert_eq!(snapshot.totals.by_acuity.critical, 0);
    }

    #[test]
    fn duplicate_ids_keep_latest_version_only() {
        let input = AnalyticsInput::from_records(vec![
            json!({ "id": "a", "version": 1, "decision": { "esi": 4 } }),
            json!({ "id": "a", "version": 2, "decision": { "esi": 2 } }),
        ]);
        let snapshot = compute_snapshot(&input, &AnalyticsConfig::default()).unwrap();
        assert_eq!(snapshot.eligible_records, 1);
        assert_eq!(*snapshot.totals.by_risk.get(RiskBucket::High), 1);
        assert_eq!(snapshot.totals.by_risk.low, 0);
    }

    #[test]
    fn invalid_config_is_a_recompute_failure() {
        let config = AnalyticsConfig {
            keyword_top_n: 0,
            ..AnalyticsConfig::default()
        };
        let result = compute_snapshot(&AnalyticsInput::default(), &config);
        assert!(matches!(result, Err(AnalyticsError::RecomputeFailure(_))));
    }

    #[test]
    fn parses_batch_object_and_bare_array() {
        let batch = AnalyticsInput::from_json_str(
            r#"{
                "records": [{ "id": "a", "decision": { "esi": 2 } }],
                "discharges": ["2026-03-14T08:30:00Z"],
                "as_of": "2026-03-14T10:00:00Z"
            }"#,
        )
        .unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.discharges.len(), 1);
        assert!(batch.as_of.is_some());

        let bare = AnalyticsInput::from_json_str(r#"[{ "id": "a" }, { "id": "b" }]"#).unwrap();
        assert_eq!(bare.records.len(), 2);
        assert!(bare.as_of.is_none());

        assert!(AnalyticsInput::from_json_str(r#"{ "records": 3 }"#).is_err());
        assert!(AnalyticsInput::from_json_str("42").is_err());
    }

    #[test]
    fn parses_keyed_and_bare_discharges() {
        let batch = AnalyticsInput::from_json_str(
            r#"{
                "records": [],
                "discharges": [
                    "2026-03-14T08:30:00Z",
                    { "id": "P-1", "at": "2026-03-14T09:00:00Z" }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(batch.discharges[0].record_id, None);
        assert_eq!(batch.discharges[1].record_id.as_deref(), Some("P-1"));

        assert!(AnalyticsInput::from_json_str(r#"{ "records": [], "discharges": [{ "id": "P-1" }] }"#).is_err());
    }

    #[test]
    fn repeated_discharge_in_batch_counts_once() {
        let batch = AnalyticsInput::from_json_str(
            r#"{
                "records": [],
                "discharges": [
                    { "id": "P-1", "at": "2026-03-14T09:05:00Z" },
                    { "id": "P-1", "at": "2026-03-14T09:05:00Z" },
                    { "id": "P-2", "at": "2026-03-14T09:05:00Z" }
                ],
                "as_of": "2026-03-14T10:00:00Z"
            }"#,
        )
        .unwrap();
        let snapshot = compute_snapshot(&batch, &AnalyticsConfig::default()).unwrap();
        let discharges: usize = snapshot.hourly_flow.iter().map(|b| b.discharges).sum();
        assert_eq!(discharges, 2);
    }
}
