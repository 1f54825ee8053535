//! Property-based tests for the curation invariants
//!
//! Uses proptest to check that versioning, merging, classification and label
//! history behave for arbitrary inputs, not just the hand-picked fixtures.

use proptest::prelude::*;
use spikeqc_curation::{
    ClusterLabel, HistoryPolicy, LabelAssignment, MetricField, MetricRow, MetricSource,
    MetricTable, RuleSet, apply_stage, classify, merge, resolve, snapshot_history,
};
use tempfile::TempDir;

fn arb_label() -> impl Strategy<Value = ClusterLabel> {
    prop_oneof![
        Just(ClusterLabel::Unclassified),
        Just(ClusterLabel::Good),
        Just(ClusterLabel::Mua),
        Just(ClusterLabel::Noise),
        Just(ClusterLabel::Other("axon".to_string())),
    ]
}

fn arb_metric() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![
        1 => Just(None),
        4 => (0.0f64..50.0).prop_map(Some),
    ]
}

fn arb_row() -> impl Strategy<Value = MetricRow> {
    (
        0i64..64,
        proptest::collection::vec(arb_metric(), 8),
    )
        .prop_map(|(cluster_id, values)| {
            let fields = [
                MetricField::Snr,
                MetricField::Halfwidth,
                MetricField::FiringRate,
                MetricField::IsiViol,
                MetricField::NumViol,
                MetricField::ContamRate,
                MetricField::RepolarizationSlope,
                MetricField::Amplitude,
            ];
            let mut row = MetricRow::new(cluster_id);
            for (field, value) in fields.into_iter().zip(values) {
                row.set_field(field, value);
            }
            row
        })
}

fn arb_rules() -> impl Strategy<Value = RuleSet> {
    (
        proptest::option::of(0.0f64..5.0),
        proptest::option::of(0.0f64..1.0),
        proptest::option::of(0.0f64..2.0),
        proptest::option::of(0.0f64..5.0),
        proptest::option::of(0.0f64..1.0),
        proptest::option::of(0.0f64..10.0),
        proptest::option::of(0.0f64..30.0),
        proptest::option::of(0.0f64..5.0),
    )
        .prop_map(
            |(snr, hw, hw_wide, slope, isi, nviol, contam, fr_good)| RuleSet {
                snr_min: snr,
                halfwidth_max: hw,
                halfwidth_wide_max: hw_wide,
                repolarization_slope_min: slope,
                fr_min: Some(0.05),
                isi_viol_max: isi,
                n_viol_max: nviol,
                contam_rate_max: contam,
                fr_good_min: fr_good,
                ..RuleSet::empty("generated")
            },
        )
}

fn table_with_ids(ids: &[i64], field: MetricField) -> MetricTable {
    let mut table = MetricTable::with_fields(&[field]);
    for (i, id) in ids.iter().enumerate() {
        table.push(MetricRow::new(*id).with(field, i as f64));
    }
    table
}

proptest! {
    #[test]
    fn resolve_write_cycles_number_versions_without_gaps(cycles in 1usize..8) {
        let dir = TempDir::new().expect("tempdir");
        let canonical = dir.path().join("metrics.csv");

        for expected in 0..cycles {
            let next = resolve(&canonical).expect("resolve");
            prop_assert_eq!(next.version as usize, expected);
            std::fs::write(&next.path, b"cluster_id\n").expect("write");
        }
    }

    #[test]
    fn merge_preserves_primary_row_count(
        primary in proptest::collection::vec(0i64..40, 0..30),
        secondary in proptest::collection::vec(0i64..40, 0..30),
    ) {
        let merged = merge(
            table_with_ids(&primary, MetricField::FiringRate),
            MetricSource::Quality,
            &table_with_ids(&secondary, MetricField::Snr),
            MetricSource::Waveform,
        );
        prop_assert_eq!(merged.len(), primary.len());

        let ids: Vec<i64> = merged.rows().iter().map(MetricRow::cluster_id).collect();
        prop_assert_eq!(ids, primary);
    }

    #[test]
    fn merge_takes_first_secondary_duplicate(
        secondary in proptest::collection::vec(0i64..10, 1..30),
    ) {
        let duplicated = secondary[0];
        let merged = merge(
            table_with_ids(&[duplicated], MetricField::FiringRate),
            MetricSource::Quality,
            &table_with_ids(&secondary, MetricField::Snr),
            MetricSource::Waveform,
        );
        // Rows carry their position as the value, so the first match is 0
        prop_assert_eq!(merged.rows()[0].value(MetricField::Snr), Some(0.0));
    }

    #[test]
    fn labels_never_improve(row in arb_row(), prior in arb_label(), rules in arb_rules()) {
        let outcome = classify(&row, &prior, &rules);
        match (prior.rank(), outcome.label.rank()) {
            (None, _) => prop_assert_eq!(&outcome.label, &prior),
            (Some(0), after) => prop_assert!(after.is_some()),
            (Some(before), Some(after)) => prop_assert!(after >= before),
            (Some(_), None) => prop_assert!(false, "known label became unknown"),
        }
        if prior == ClusterLabel::Noise {
            prop_assert_eq!(outcome.label, ClusterLabel::Noise);
        }
    }

    #[test]
    fn classification_is_idempotent(row in arb_row(), prior in arb_label(), rules in arb_rules()) {
        let first = classify(&row, &prior, &rules);
        // Feeding the outcome back in is a fixed point for every label
        let second = classify(&row, &first.label, &rules);
        prop_assert_eq!(&second.label, &first.label);
        prop_assert_eq!(second.rule, None);
        prop_assert_eq!(classify(&row, &prior, &rules), first);
    }

    #[test]
    fn unaffected_clusters_keep_their_labels(
        labels in proptest::collection::vec(arb_label(), 1..20),
        rules in arb_rules(),
    ) {
        let entries: Vec<(i64, ClusterLabel)> = labels
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, l)| (i as i64, l))
            .collect();
        let mut assignment = LabelAssignment::new("KSLabel", entries);

        // Every metric comfortably inside every threshold
        let mut metrics = MetricTable::default();
        for i in 0..labels.len() {
            metrics.push(
                MetricRow::new(i as i64)
                    .with(MetricField::Snr, 100.0)
                    .with(MetricField::Halfwidth, 0.0)
                    .with(MetricField::FiringRate, 100.0)
                    .with(MetricField::IsiViol, 0.0)
                    .with(MetricField::NumViol, 0.0)
                    .with(MetricField::ContamRate, 0.0)
                    .with(MetricField::RepolarizationSlope, 100.0),
            );
        }

        apply_stage(&mut assignment, &metrics, &rules);
        for ((_, after), before) in assignment.iter().zip(&labels) {
            let expected = match before {
                ClusterLabel::Unclassified => ClusterLabel::Good,
                other => other.clone(),
            };
            prop_assert_eq!(after, &expected);
        }
    }

    #[test]
    fn history_snapshot_matches_pre_save_bytes(
        labels in proptest::collection::vec(arb_label(), 0..20),
        policy in prop_oneof![
            Just(HistoryPolicy::WriteOnce),
            Just(HistoryPolicy::Overwrite),
            Just(HistoryPolicy::Versioned),
        ],
    ) {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("cluster_KSLabel.tsv");
        let ids: Vec<i64> = (0..labels.len() as i64).collect();
        spikeqc_curation::labels::save(&ids, &labels, "KSLabel", &path).expect("seed");
        let before = std::fs::read(&path).expect("read");

        let snapshot = snapshot_history(&path, policy).expect("snapshot").expect("some");
        spikeqc_curation::labels::save(&ids, &vec![ClusterLabel::Noise; ids.len()], "KSLabel", &path)
            .expect("save");

        prop_assert_eq!(std::fs::read(&snapshot).expect("snapshot bytes"), before);
        prop_assert_eq!(snapshot.parent(), Some(dir.path()));
    }
}
