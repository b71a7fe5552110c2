//! Fixed-bucket confidence histogram and the vitals radar profile.

use std::collections::BTreeMap;

use triage_core::{
    AnalyticsConfig, AnalyticsError, ClinicalRange, ConfidenceHistogram, HistogramBucket,
    OutOfRangeValue, PatientRecord, RadarPoint, RangeField, RiskBreakdown, VitalKind, VitalRadar,
};

/// Counts confidence scores into contiguous `[lower, upper)` buckets; the
/// last bucket also holds its upper edge.
#[derive(Debug, Clone)]
pub struct ConfidenceHistogramBuilder {
    edges: Vec<f64>,
    counts: Vec<usize>,
}

impl ConfidenceHistogramBuilder {
    pub fn new(edges: &[f64]) -> Result<Self, AnalyticsError> {
        if edges.len() < 2
            || edges.iter().any(|edge| !edge.is_finite())
            || edges.windows(2).any(|pair| pair[0] >= pair[1])
        {
            return Err(AnalyticsError::InvalidConfig(format!(
                "confidence bucket edges must be finite and strictly increasing: {edges:?}"
            )));
        }

        Ok(Self {
            edges: edges.to_vec(),
            counts: vec![0; edges.len() - 1],
        })
    }

    /// Values outside `[first edge, last edge]` are rejected, never clipped.
    pub fn record(&mut self, record_id: &str, confidence: f64) -> Result<(), OutOfRangeValue> {
        match self.bucket_index(confidence) {
            Some(idx) => {
                self.counts[idx] += 1;
                Ok(())
            }
            None => Err(OutOfRangeValue {
                record_id: record_id.to_string(),
                field: RangeField::Confidence,
                value: confidence,
                min: self.edges[0],
                max: self.edges[self.edges.len() - 1],
            }),
        }
    }

    fn bucket_index(&self, value: f64) -> Option<usize> {
        let first = self.edges[0];
        let last = self.edges[self.edges.len() - 1];
        if !(value >= first && value <= last) {
            return None;
        }
        if value == last {
            return Some(self.counts.len() - 1);
        }
        Some(self.edges.partition_point(|edge| *edge <= value) - 1)
    }

    pub fn finish(self) -> ConfidenceHistogram {
        let last = self.counts.len() - 1;
        let buckets = self
            .edges
            .windows(2)
            .zip(self.counts)
            .enumerate()
            .map(|(idx, (pair, count))| HistogramBucket {
                label: format!("{}-{}%", format_edge(pair[0]), format_edge(pair[1])),
                lower: pair[0],
                upper: pair[1],
                upper_inclusive: idx == last,
                count,
            })
            .collect();
        ConfidenceHistogram { buckets }
    }
}

fn format_edge(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Running mean that never divides by zero.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MeanAccumulator {
    sum: f64,
    samples: usize,
}

impl MeanAccumulator {
    pub(crate) fn push(&mut self, value: f64) {
        self.sum += value;
        self.samples += 1;
    }

    pub(crate) fn samples(&self) -> usize {
        self.samples
    }

    pub(crate) fn mean(&self) -> Option<f64> {
        (self.samples > 0).then(|| self.sum / self.samples as f64)
    }
}

/// Mean of measured vitals per risk bucket, scaled into `[0, 100]` against
/// each vital's clinical range.
#[derive(Debug, Clone)]
pub struct VitalsRadarBuilder {
    ranges: BTreeMap<VitalKind, ClinicalRange>,
    sums: BTreeMap<VitalKind, RiskBreakdown<MeanAccumulator>>,
}

impl VitalsRadarBuilder {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            ranges: VitalKind::ALL
                .iter()
                .map(|kind| (*kind, config.clinical_range(*kind)))
                .collect(),
            sums: BTreeMap::new(),
        }
    }

    /// Unmeasured vitals are skipped, so they count in neither sum nor denominator.
    pub fn record(&mut self, record: &PatientRecord) {
        let bucket = record.risk_bucket();
        for (kind, value) in record.vitals.measured() {
            if !value.is_finite() {
                continue;
            }
            self.sums
                .entry(kind)
                .or_default()
                .get_mut(bucket)
                .push(value);
        }
    }

    pub fn finish(self) -> Vec<VitalRadar> {
        VitalKind::ALL
            .iter()
            .map(|kind| {
                let range = self.ranges[kind];
                let sums = self.sums.get(kind).copied().unwrap_or_default();
                VitalRadar {
                    kind: *kind,
                    range,
                    buckets: sums.map(|acc| radar_point(&range, acc)),
                }
            })
            .collect()
    }
}

fn radar_point(range: &ClinicalRange, acc: MeanAccumulator) -> RadarPoint {
    match acc.mean() {
        Some(mean) => RadarPoint {
            mean: Some(mean),
            normalized: range.normalize(mean),
            samples: acc.samples(),
        },
        None => RadarPoint::default(),
    }
}
