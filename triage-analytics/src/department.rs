//! Per-department workload: counts, high-risk share and mean confidence.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use triage_core::{DepartmentMetrics, PatientRecord, RiskBucket};

use crate::distribution::MeanAccumulator;

#[derive(Debug, Default)]
struct DepartmentAccumulator {
    count: usize,
    high_risk_count: usize,
    confidence: MeanAccumulator,
}

/// Fans each record out to every department it names. A record listing
/// three specialists adds one to each of the three departments.
#[derive(Debug, Default)]
pub struct DepartmentAggregator {
    departments: HashMap<String, DepartmentAccumulator>,
}

impl DepartmentAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `confidence` is the record's score if it lies inside its valid domain.
    pub fn record(&mut self, record: &PatientRecord, confidence: Option<f64>) {
        let high_risk = record.risk_bucket() == RiskBucket::High;
        let names: BTreeSet<&str> = record
            .decision
            .specialists
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .collect();

        for name in names {
            let entry = self.departments.entry(name.to_string()).or_default();
            entry.count += 1;
            if high_risk {
                entry.high_risk_count += 1;
            }
            if let Some(value) = confidence {
                entry.confidence.push(value);
            }
        }
    }

    /// Sorted by count desc, then high-risk count desc, then name asc.
    pub fn finish(self) -> Vec<DepartmentMetrics> {
        let mut metrics: Vec<DepartmentMetrics> = self
            .departments
            .into_iter()
            .map(|(name, acc)| DepartmentMetrics {
                name,
                count: acc.count,
                high_risk_count: acc.high_risk_count,
                mean_confidence: acc.confidence.mean().unwrap_or(0.0),
            })
            .collect();
        metrics.sort_by(rank_departments);
        metrics
    }
}

fn rank_departments(a: &DepartmentMetrics, b: &DepartmentMetrics) -> Ordering {
    b.count
        .cmp(&a.count)
        .then_with(|| b.high_risk_count.cmp(&a.high_risk_count))
        .then_with(|| a.name.cmp(&b.name))
}

#[cfg(test)]
mod tests {
    use triage_core::{Arrival, Demographics, Esi, TriageDecision, VitalSigns};

    use super::*;

    fn record(id: &str, esi: i64, confidence: Option<f64>, specialists: &[&str]) -> PatientRecord {
        PatientRecord {
            id: id.to_string(),
            version: None,
            demographics: Demographics::default(),
            chief_complaint: String::new(),
            vitals: VitalSigns::default(),
            arrival: Arrival::default(),
            decision: TriageDecision {
                esi: Esi::try_from(esi).unwrap(),
                confidence,
                acuity_color: None,
                specialists: specialists.iter().map(|s| s.to_string()).collect(),
                bay: None,
            },
        }
    }

    #[test]
    fn single_critical_patient() {
        let mut agg = DepartmentAggregator::new();
        agg.record(&record("a", 1, Some(92.0), &["Cardiology"]), Some(92.0));
        assert_eq!(
            agg.finish(),
            vec![DepartmentMetrics {
                name: "Cardiology".to_string(),
                count: 1,
                high_risk_count: 1,
                mean_confidence: 92.0,
            }]
        );
    }

    #[test]
    fn fans_out_to_every_named_department() {
        let mut agg = DepartmentAggregator::new();
        let r = record("a", 3, Some(80.0), &["Cardiology", "Neurology", "Radiology"]);
        agg.record(&r, Some(80.0));
        let metrics = agg.finish();
        assert_eq!(metrics.len(), 3);
        assert!(metrics.iter().all(|m| m.count == 1 && m.high_risk_count == 0));
    }

    #[test]
    fn ties_break_on_high_risk_then_name() {
        let mut agg = DepartmentAggregator::new();
        agg.record(&record("a", 4, Some(70.0), &["Orthopedics"]), Some(70.0));
        agg.record(&record("b", 2, Some(90.0), &["Neurology"]), Some(90.0));
        agg.record(&record("c", 5, Some(60.0), &["Dermatology"]), Some(60.0));

        let names: Vec<String> = agg.finish().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["Neurology", "Dermatology", "Orthopedics"]);
    }

    #[test]
    fn mean_confidence_ignores_records_without_usable_score() {
        let mut agg = DepartmentAggregator::new();
        agg.record(&record("a", 3, Some(80.0), &["Surgery"]), Some(80.0));
        agg.record(&record("b", 3, Some(150.0), &["Surgery"]), None);
        let metrics = agg.finish();
        assert_eq!(metrics[0].count, 2);
        assert_eq!(metrics[0].mean_confidence, 80.0);
    }

    #[test]
    fn duplicate_names_in_one_record_count_once() {
        let mut agg = DepartmentAggregator::new();
        agg.record(&record("a", 3, None, &["Surgery", " Surgery "]), None);
        let metrics = agg.finish();
        assert_eq!(metrics[0].count, 1);
        assert_eq!(metrics[0].mean_confidence, 0.0);
    }
}
