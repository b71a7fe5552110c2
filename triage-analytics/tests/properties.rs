use proptest::prelude::*;
use serde_json::{json, Value};
use triage_analytics::{compute_snapshot, AnalyticsInput, KeywordFrequencyAnalyzer};
use triage_core::{AnalyticsConfig, AnalyticsSnapshot, Esi, RangeField, RiskBucket};

const DEPARTMENTS: [&str; 6] = [
    "Cardiology",
    "Neurology",
    "Orthopedics",
    "Radiology",
    "Surgery",
    "Pediatrics",
];

fn snapshot_of(records: Vec<Value>) -> AnalyticsSnapshot {
    compute_snapshot(
        &AnalyticsInput::from_records(records),
        &AnalyticsConfig::default(),
    )
    .expect("recompute must succeed for well-formed batches")
}

fn with_decision(idx: usize, decision: Value) -> Value {
    json!({
        "id": format!("P-{idx}"),
        "arrival": { "time": "2026-03-14T09:00:00Z", "mode": "walk-in" },
        "decision": decision
    })
}

proptest! {
    #[test]
    fn prop_every_esi_lands_in_exactly_one_bucket(levels in proptest::collection::vec(-2i64..9, 0..40)) {
        let records = levels
            .iter()
            .enumerate()
            .map(|(idx, level)| with_decision(idx, json!({ "esi": level })))
            .collect();
        let snapshot = snapshot_of(records);

        let valid: Vec<i64> = levels.iter().copied().filter(|l| (1..=5).contains(l)).collect();
        let by_risk = &snapshot.totals.by_risk;
        prop_assert_eq!(snapshot.eligible_records, valid.len());
        prop_assert_eq!(by_risk.high + by_risk.medium + by_risk.low, valid.len());
        prop_assert_eq!(by_risk.high, valid.iter().filter(|l| **l <= 2).count());
        prop_assert_eq!(by_risk.medium, valid.iter().filter(|l| **l == 3).count());
        prop_assert_eq!(by_risk.low, valid.iter().filter(|l| **l >= 4).count());
        prop_assert_eq!(snapshot.esi_histogram.total(), valid.len());
        prop_assert_eq!(
            snapshot.diagnostics.out_of_range.len(),
            levels.len() - valid.len()
        );
    }

    #[test]
    fn prop_risk_buckets_match_totality(level in 1i64..=5) {
        let esi = Esi::try_from(level).unwrap();
        let hits = RiskBucket::ALL
            .iter()
            .filter(|bucket| **bucket == RiskBucket::from_esi(esi))
            .count();
        prop_assert_eq!(hits, 1);
    }

    #[test]
    fn prop_histogram_conserves_in_range_confidences(
        confidences in proptest::collection::vec(proptest::option::of(-50.0f64..200.0), 0..60)
    ) {
        let records = confidences
            .iter()
            .enumerate()
            .map(|(idx, confidence)| with_decision(idx, json!({ "esi": 3, "confidence": confidence })))
            .collect();
        let snapshot = snapshot_of(records);

        let in_range = confidences
            .iter()
            .flatten()
            .filter(|c| (60.0..=100.0).contains(*c))
            .count();
        let present = confidences.iter().flatten().count();

        prop_assert_eq!(snapshot.confidence_histogram.total(), in_range);
        prop_assert_eq!(snapshot.diagnostics.missing_confidence, confidences.len() - present);

        let reported = snapshot
            .diagnostics
            .out_of_range
            .iter()
            .filter(|err| err.field == RangeField::Confidence)
            .count();
        prop_assert_eq!(reported, present - in_range);
    }

    #[test]
    fn prop_radar_stays_within_scale(
        vitals in proptest::collection::vec(
            (1i64..=5, -1000.0f64..1000.0, -1000.0f64..1000.0, -50.0f64..300.0),
            0..30,
        )
    ) {
        let records = vitals
            .iter()
            .enumerate()
            .map(|(idx, (esi, hr, temp, spo2))| {
                json!({
                    "id": format!("P-{idx}"),
                    "vitals": { "heartRate": hr, "temperature": temp, "spo2": spo2 },
                    "decision": { "esi": esi }
                })
            })
            .collect();
        let snapshot = snapshot_of(records);

        for radar in &snapshot.vitals_radar {
            for bucket in RiskBucket::ALL {
                let point = radar.buckets.get(bucket);
                prop_assert!((0.0..=100.0).contains(&point.normalized));
                prop_assert_eq!(point.mean.is_none(), point.samples == 0);
            }
        }
    }

    #[test]
    fn prop_department_fan_out_counts_each_specialist_once(
        picks in proptest::sample::subsequence(DEPARTMENTS.to_vec(), 0..=DEPARTMENTS.len()),
        esi in 1i64..=5,
    ) {
        let snapshot = snapshot_of(vec![with_decision(
            0,
            json!({ "esi": esi, "confidence": 80, "specialists": picks }),
        )]);

        let total: usize = snapshot.department_metrics.iter().map(|m| m.count).sum();
        prop_assert_eq!(total, picks.len());
        prop_assert_eq!(snapshot.department_metrics.len(), picks.len());
        for name in &picks {
            let metrics = snapshot.department(name).unwrap();
            prop_assert_eq!(metrics.count, 1);
            prop_assert_eq!(metrics.high_risk_count, usize::from(esi <= 2));
        }
    }

    #[test]
    fn prop_keyword_ranking_is_deterministic(
        complaints in proptest::collection::vec("[a-z]{2,7}( [a-z]{2,7}){0,5}", 0..25)
    ) {
        let config = AnalyticsConfig::default();
        let rank = || {
            let mut analyzer = KeywordFrequencyAnalyzer::new(&config.stop_words);
            for complaint in &complaints {
                analyzer.record(complaint);
            }
            analyzer.top(config.keyword_top_n)
        };

        let first = rank();
        prop_assert_eq!(&first, &rank());
        prop_assert!(first.windows(2).all(|pair| pair[0].count >= pair[1].count));
        prop_assert!(first.len() <= config.keyword_top_n);
    }
}

#[test]
fn departments_with_equal_count_rank_by_high_risk() {
    let snapshot = snapshot_of(vec![
        with_decision(0, json!({ "esi": 4, "confidence": 80, "specialists": ["Alpha"] })),
        with_decision(1, json!({ "esi": 5, "confidence": 80, "specialists": ["Alpha"] })),
        with_decision(2, json!({ "esi": 1, "confidence": 80, "specialists": ["Zulu"] })),
        with_decision(3, json!({ "esi": 4, "confidence": 80, "specialists": ["Zulu"] })),
    ]);

    let order: Vec<(&str, usize, usize)> = snapshot
        .department_metrics
        .iter()
        .map(|m| (m.name.as_str(), m.count, m.high_risk_count))
        .collect();
    assert_eq!(order, vec![("Zulu", 2, 1), ("Alpha", 2, 0)]);
}

#[test]
fn single_critical_patient_matches_expected_views() {
    let snapshot = snapshot_of(vec![with_decision(
        0,
        json!({ "esi": 1, "confidence": 92, "specialists": ["Cardiology"] }),
    )]);

    assert_eq!(snapshot.totals.by_risk.high, 1);
    assert_eq!(snapshot.esi_histogram.get(Esi::ALL[0]), 1);
    assert_eq!(snapshot.confidence_histogram.count_for("90-95%"), Some(1));
    assert_eq!(snapshot.department_metrics.len(), 1);
    let cardiology = &snapshot.department_metrics[0];
    assert_eq!(cardiology.name, "Cardiology");
    assert_eq!(cardiology.count, 1);
    assert_eq!(cardiology.high_risk_count, 1);
    assert_eq!(cardiology.mean_confidence, 92.0);
}
