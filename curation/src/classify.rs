//! Heuristic cluster labeling.
//!
//! An ordered chain of threshold predicates, first match wins:
//!
//! 1. hard noise: low SNR, halfwidth above the ceiling, firing rate too low
//! 2. wide-but-flat noise, only when a wide halfwidth ceiling is configured
//! 3. multi-unit activity, only for clusters still `good` or `unclassified`
//!
//! Labels only ever move down `good -> mua -> noise`. `noise` is terminal
//! within a pass, and labels outside the known set are passed through.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::labels::LabelAssignment;
use crate::table::{MetricField, MetricRow, MetricTable};

/// Label of one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClusterLabel {
    Unclassified,
    Good,
    Mua,
    Noise,
    /// Any label the rules do not understand, kept verbatim
    Other(String),
}

impl ClusterLabel {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "good" => Self::Good,
            "mua" => Self::Mua,
            "noise" => Self::Noise,
            "unclassified" | "" => Self::Unclassified,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Unclassified => "unclassified",
            Self::Good => "good",
            Self::Mua => "mua",
            Self::Noise => "noise",
            Self::Other(s) => s,
        }
    }

    /// Position on the demotion ladder; `None` for pass-through labels.
    pub fn rank(&self) -> Option<u8> {
        match self {
            Self::Unclassified => Some(0),
            Self::Good => Some(1),
            Self::Mua => Some(2),
            Self::Noise => Some(3),
            Self::Other(_) => None,
        }
    }
}

impl std::fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds of one classification stage. `None` disables a predicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSet {
    pub stage: &'static str,
    pub snr_min: Option<f64>,
    /// Milliseconds
    pub halfwidth_max: Option<f64>,
    /// Milliseconds; enables the wide-but-not-flat exception when above
    /// `halfwidth_max`
    pub halfwidth_wide_max: Option<f64>,
    pub repolarization_slope_min: Option<f64>,
    /// Spikes/s, noise below
    pub fr_min: Option<f64>,
    pub isi_viol_max: Option<f64>,
    pub n_viol_max: Option<f64>,
    /// Percent
    pub contam_rate_max: Option<f64>,
    /// Spikes/s, mua below
    pub fr_good_min: Option<f64>,
}

/// Field-by-field replacement of a preset's thresholds
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RuleOverrides {
    pub snr_min: Option<f64>,
    pub halfwidth_max: Option<f64>,
    pub halfwidth_wide_max: Option<f64>,
    pub repolarization_slope_min: Option<f64>,
    pub fr_min: Option<f64>,
    pub isi_viol_max: Option<f64>,
    pub n_viol_max: Option<f64>,
    pub contam_rate_max: Option<f64>,
    pub fr_good_min: Option<f64>,
}

impl RuleSet {
    /// Nothing enabled
    pub fn empty(stage: &'static str) -> Self {
        Self {
            stage,
            snr_min: None,
            halfwidth_max: None,
            halfwidth_wide_max: None,
            repolarization_slope_min: None,
            fr_min: None,
            isi_viol_max: None,
            n_viol_max: None,
            contam_rate_max: None,
            fr_good_min: None,
        }
    }

    /// Contamination rules applied right after metrics are computed
    pub fn quality_metrics() -> Self {
        Self {
            isi_viol_max: Some(0.2),
            contam_rate_max: Some(15.0),
            ..Self::empty("quality_metrics")
        }
    }

    /// Noise and contamination filters applied before manual curation
    pub fn prephy_filters() -> Self {
        Self {
            snr_min: Some(1.0),
            halfwidth_max: Some(0.3),
            fr_min: Some(0.05),
            isi_viol_max: Some(0.2),
            n_viol_max: Some(1.0),
            ..Self::empty("prephy_filters")
        }
    }

    pub fn with_overrides(mut self, overrides: &RuleOverrides) -> Self {
        let pairs = [
            (&mut self.snr_min, overrides.snr_min),
            (&mut self.halfwidth_max, overrides.halfwidth_max),
            (&mut self.halfwidth_wide_max, overrides.halfwidth_wide_max),
            (
                &mut self.repolarization_slope_min,
                overrides.repolarization_slope_min,
            ),
            (&mut self.fr_min, overrides.fr_min),
            (&mut self.isi_viol_max, overrides.isi_viol_max),
            (&mut self.n_viol_max, overrides.n_viol_max),
            (&mut self.contam_rate_max, overrides.contam_rate_max),
            (&mut self.fr_good_min, overrides.fr_good_min),
        ];
        for (slot, value) in pairs {
            if value.is_some() {
                *slot = value;
            }
        }
        self
    }

    /// Wide ceiling, when it actually widens the normal one
    fn wide_ceiling(&self) -> Option<f64> {
        match (self.halfwidth_wide_max, self.halfwidth_max) {
            (Some(wide), Some(normal)) if wide > normal => Some(wide),
            _ => None,
        }
    }
}

/// Rule that decided a label change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    NoiseLowSnr,
    NoiseWideHalfwidth,
    NoiseLowFiringRate,
    NoiseWideFlat,
    MuaIsiViolations,
    MuaContamination,
    MuaLowFiringRate,
}

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoiseLowSnr => "noise_low_snr",
            Self::NoiseWideHalfwidth => "noise_wide_halfwidth",
            Self::NoiseLowFiringRate => "noise_low_firing_rate",
            Self::NoiseWideFlat => "noise_wide_flat",
            Self::MuaIsiViolations => "mua_isi_violations",
            Self::MuaContamination => "mua_contamination",
            Self::MuaLowFiringRate => "mua_low_firing_rate",
        }
    }
}

/// Result of classifying one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: ClusterLabel,
    /// Matching rule, `None` when nothing matched
    pub rule: Option<RuleId>,
    /// Fields a configured predicate needed but the row did not have
    pub skipped: Vec<MetricField>,
}

/// Evaluates predicates against one row, remembering unavailable fields.
struct Checks<'a> {
    row: &'a MetricRow,
    skipped: Vec<MetricField>,
}

impl Checks<'_> {
    /// `Some(true)` when the field is available and the predicate holds;
    /// `None` when the threshold is unset. An unavailable field with a set
    /// threshold is recorded and reads as not matched.
    fn test(
        &mut self,
        field: MetricField,
        threshold: Option<f64>,
        predicate: impl Fn(f64, f64) -> bool,
    ) -> Option<bool> {
        let threshold = threshold?;
        match self.row.value(field) {
            Some(value) => Some(predicate(value, threshold)),
            None => {
                if !self.skipped.contains(&field) {
                    self.skipped.push(field);
                }
                Some(false)
            }
        }
    }

    fn matches(
        &mut self,
        field: MetricField,
        threshold: Option<f64>,
        predicate: impl Fn(f64, f64) -> bool,
    ) -> bool {
        self.test(field, threshold, predicate).unwrap_or(false)
    }
}

/// Classify one cluster. Pure: same row, prior and rules give the same
/// outcome.
pub fn classify(row: &MetricRow, prior: &ClusterLabel, rules: &RuleSet) -> Classification {
    let unchanged = |skipped| Classification {
        label: prior.clone(),
        rule: None,
        skipped,
    };

    if matches!(prior, ClusterLabel::Noise | ClusterLabel::Other(_)) {
        return unchanged(Vec::new());
    }

    let mut checks = Checks {
        row,
        skipped: Vec::new(),
    };

    let rule = noise_rule(&mut checks, rules).or_else(|| {
        matches!(prior, ClusterLabel::Good | ClusterLabel::Unclassified)
            .then(|| mua_rule(&mut checks, rules))
            .flatten()
    });

    let label = match rule {
        Some(
            RuleId::NoiseLowSnr
            | RuleId::NoiseWideHalfwidth
            | RuleId::NoiseLowFiringRate
            | RuleId::NoiseWideFlat,
        ) => ClusterLabel::Noise,
        Some(RuleId::MuaIsiViolations | RuleId::MuaContamination | RuleId::MuaLowFiringRate) => {
            ClusterLabel::Mua
        }
        None if *prior == ClusterLabel::Unclassified => ClusterLabel::Good,
        None => return unchanged(checks.skipped),
    };

    Classification {
        label,
        rule,
        skipped: checks.skipped,
    }
}

fn noise_rule(checks: &mut Checks<'_>, rules: &RuleSet) -> Option<RuleId> {
    if checks.matches(MetricField::Snr, rules.snr_min, |snr, min| {
        snr > 0.0 && snr < min
    }) {
        return Some(RuleId::NoiseLowSnr);
    }

    let wide = rules.wide_ceiling();
    let ceiling = wide.or(rules.halfwidth_max);
    if checks.matches(MetricField::Halfwidth, ceiling, |hw, max| hw > max) {
        return Some(RuleId::NoiseWideHalfwidth);
    }

    if checks.matches(MetricField::FiringRate, rules.fr_min, |fr, min| fr < min) {
        return Some(RuleId::NoiseLowFiringRate);
    }

    if let (Some(wide), Some(normal)) = (wide, rules.halfwidth_max)
        && rules.repolarization_slope_min.is_some()
        && checks.matches(MetricField::Halfwidth, Some(normal), |hw, normal| {
            hw > normal && hw <= wide
        })
        && checks.matches(
            MetricField::RepolarizationSlope,
            rules.repolarization_slope_min,
            |slope, min| slope < min,
        )
    {
        return Some(RuleId::NoiseWideFlat);
    }

    None
}

fn mua_rule(checks: &mut Checks<'_>, rules: &RuleSet) -> Option<RuleId> {
    let isi = checks.test(MetricField::IsiViol, rules.isi_viol_max, |v, max| v > max);
    if isi == Some(true) {
        let enough = checks
            .test(MetricField::NumViol, rules.n_viol_max, |n, max| n > max)
            .unwrap_or(true);
        if enough {
            return Some(RuleId::MuaIsiViolations);
        }
    }

    if checks.matches(MetricField::ContamRate, rules.contam_rate_max, |c, max| {
        c > max
    }) {
        return Some(RuleId::MuaContamination);
    }

    if checks.matches(MetricField::FiringRate, rules.fr_good_min, |fr, min| {
        fr < min
    }) {
        return Some(RuleId::MuaLowFiringRate);
    }

    None
}

/// Counts reported for one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageSummary {
    pub stage: String,
    pub clusters: usize,
    pub newly_noise: usize,
    pub newly_mua: usize,
    pub newly_good: usize,
    pub untouched_good: usize,
    pub untouched_mua: usize,
    pub already_noise: usize,
    pub passthrough: usize,
    /// Clusters without a metric row
    pub gaps: Vec<i64>,
    /// Predicates skipped for unavailable fields, summed over clusters
    pub skipped_predicates: usize,
    pub rule_hits: BTreeMap<RuleId, usize>,
}

/// Apply `rules` to every cluster of `labels`, in place.
pub fn apply_stage(
    labels: &mut LabelAssignment,
    metrics: &MetricTable,
    rules: &RuleSet,
) -> StageSummary {
    let index = metrics.index();
    let mut summary = StageSummary {
        stage: rules.stage.to_string(),
        clusters: labels.len(),
        ..StageSummary::default()
    };

    for (cluster_id, label) in labels.iter_mut() {
        match label {
            ClusterLabel::Noise => {
                summary.already_noise += 1;
                continue;
            }
            ClusterLabel::Other(raw) => {
                tracing::debug!(
                    cluster_id = *cluster_id,
                    label = %raw,
                    "Passing through unknown label"
                );
                summary.passthrough += 1;
                continue;
            }
            _ => {}
        }

        let Some(row) = index.get(cluster_id) else {
            tracing::warn!(
                cluster_id = *cluster_id,
                stage = rules.stage,
                "No metric row for cluster; skipping classification"
            );
            summary.gaps.push(*cluster_id);
            continue;
        };

        let outcome = classify(row, label, rules);
        if !outcome.skipped.is_empty() {
            tracing::debug!(
                cluster_id = *cluster_id,
                fields = ?outcome.skipped,
                "Skipped predicates on unavailable fields"
            );
            summary.skipped_predicates += outcome.skipped.len();
        }

        if let Some(rule) = outcome.rule {
            *summary.rule_hits.entry(rule).or_default() += 1;
            tracing::debug!(
                cluster_id = *cluster_id,
                from = %label,
                to = %outcome.label,
                rule = rule.as_str(),
                "Relabeled cluster"
            );
        }

        match (&*label, &outcome.label) {
            (ClusterLabel::Good, ClusterLabel::Good) => summary.untouched_good += 1,
            (ClusterLabel::Mua, ClusterLabel::Mua) => summary.untouched_mua += 1,
            (_, ClusterLabel::Noise) => summary.newly_noise += 1,
            (_, ClusterLabel::Mua) => summary.newly_mua += 1,
            (_, ClusterLabel::Good) => summary.newly_good += 1,
            _ => {}
        }
        *label = outcome.label;
    }

    if !summary.gaps.is_empty() || summary.skipped_predicates > 0 {
        tracing::warn!(
            stage = rules.stage,
            gaps = summary.gaps.len(),
            skipped_predicates = summary.skipped_predicates,
            "Classification ran with incomplete metrics"
        );
    }
    tracing::info!(
        stage = rules.stage,
        clusters = summary.clusters,
        newly_noise = summary.newly_noise,
        newly_mua = summary.newly_mua,
        untouched_good = summary.untouched_good,
        "Applied classification stage"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(fields: &[(MetricField, f64)]) -> MetricRow {
        fields
            .iter()
            .fold(MetricRow::new(1), |row, &(field, value)| row.with(field, value))
    }

    #[test]
    fn low_snr_and_rate_is_noise() {
        let metrics = row(&[
            (MetricField::Snr, 0.8),
            (MetricField::Halfwidth, 0.25),
            (MetricField::FiringRate, 0.02),
        ]);
        let rules = RuleSet {
            snr_min: Some(1.0),
            halfwidth_max: Some(0.3),
            fr_min: Some(0.05),
            ..RuleSet::empty("scenario")
        };

        let outcome = classify(&metrics, &ClusterLabel::Good, &rules);
        assert_eq!(outcome.label, ClusterLabel::Noise);
        assert_eq!(outcome.rule, Some(RuleId::NoiseLowSnr));
    }

    #[test]
    fn low_firing_rate_alone_is_noise() {
        let metrics = row(&[
            (MetricField::Snr, 2.5),
            (MetricField::Halfwidth, 0.25),
            (MetricField::FiringRate, 0.02),
        ]);
        let outcome = classify(&metrics, &ClusterLabel::Good, &RuleSet::prephy_filters());
        assert_eq!(outcome.label, ClusterLabel::Noise);
        assert_eq!(outcome.rule, Some(RuleId::NoiseLowFiringRate));
        assert!(outcome.skipped.is_empty());

        let at_threshold = row(&[
            (MetricField::Snr, 1.0),
            (MetricField::Halfwidth, 0.25),
            (MetricField::FiringRate, 0.02),
        ]);
        let outcome = classify(&at_threshold, &ClusterLabel::Good, &RuleSet::prephy_filters());
        assert_eq!(outcome.rule, Some(RuleId::NoiseLowFiringRate));
    }

    #[test]
    fn isi_violations_demote_good_to_mua() {
        let metrics = row(&[
            (MetricField::Snr, 1.5),
            (MetricField::Halfwidth, 0.2),
            (MetricField::FiringRate, 1.0),
            (MetricField::IsiViol, 0.3),
            (MetricField::NumViol, 5.0),
        ]);
        let rules = RuleSet {
            isi_viol_max: Some(0.2),
            n_viol_max: Some(1.0),
            ..RuleSet::empty("scenario")
        };

        let outcome = classify(&metrics, &ClusterLabel::Good, &rules);
        assert_eq!(outcome.label, ClusterLabel::Mua);
        assert_eq!(outcome.rule, Some(RuleId::MuaIsiViolations));
    }

    #[test]
    fn isi_rule_needs_enough_violations_when_configured() {
        let metrics = row(&[(MetricField::IsiViol, 0.5), (MetricField::NumViol, 1.0)]);
        let mut rules = RuleSet::prephy_filters();
        rules.fr_min = None;
        rules.snr_min = None;
        rules.halfwidth_max = None;

        let outcome = classify(&metrics, &ClusterLabel::Good, &rules);
        assert_eq!(outcome.label, ClusterLabel::Good);

        rules.n_viol_max = None;
        let outcome = classify(&metrics, &ClusterLabel::Good, &rules);
        assert_eq!(outcome.label, ClusterLabel::Mua);
    }

    #[test]
    fn unavailable_snr_is_skipped_not_noise() {
        let metrics = row(&[(MetricField::FiringRate, 2.0), (MetricField::Halfwidth, 0.2)]);
        let outcome = classify(&metrics, &ClusterLabel::Good, &RuleSet::prephy_filters());
        assert_eq!(outcome.label, ClusterLabel::Good);
        assert!(outcome.skipped.contains(&MetricField::Snr));
    }

    #[test]
    fn zero_snr_does_not_trigger_low_snr_rule() {
        let metrics = row(&[
            (MetricField::Snr, 0.0),
            (MetricField::FiringRate, 2.0),
            (MetricField::Halfwidth, 0.2),
        ]);
        let outcome = classify(&metrics, &ClusterLabel::Good, &RuleSet::prephy_filters());
        assert_eq!(outcome.label, ClusterLabel::Good);
        assert!(!outcome.skipped.contains(&MetricField::Snr));
    }

    #[test]
    fn halfwidth_at_ceiling_is_tolerated() {
        let rules = RuleSet {
            halfwidth_max: Some(0.3),
            ..RuleSet::empty("t")
        };
        let at = classify(&row(&[(MetricField::Halfwidth, 0.3)]), &ClusterLabel::Good, &rules);
        assert_eq!(at.label, ClusterLabel::Good);
        let above = classify(&row(&[(MetricField::Halfwidth, 0.31)]), &ClusterLabel::Good, &rules);
        assert_eq!(above.rule, Some(RuleId::NoiseWideHalfwidth));
    }

    #[test]
    fn wide_exception_tolerates_sharp_wide_units() {
        let rules = RuleSet {
            halfwidth_max: Some(0.3),
            halfwidth_wide_max: Some(0.5),
            repolarization_slope_min: Some(1.0),
            ..RuleSet::empty("t")
        };

        let sharp = row(&[(MetricField::Halfwidth, 0.4), (MetricField::RepolarizationSlope, 3.0)]);
        assert_eq!(
            classify(&sharp, &ClusterLabel::Good, &rules).label,
            ClusterLabel::Good
        );

        let flat = row(&[(MetricField::Halfwidth, 0.4), (MetricField::RepolarizationSlope, 0.2)]);
        let outcome = classify(&flat, &ClusterLabel::Good, &rules);
        assert_eq!(outcome.rule, Some(RuleId::NoiseWideFlat));

        let too_wide = row(&[(MetricField::Halfwidth, 0.6), (MetricField::RepolarizationSlope, 3.0)]);
        assert_eq!(
            classify(&too_wide, &ClusterLabel::Good, &rules).rule,
            Some(RuleId::NoiseWideHalfwidth)
        );
    }

    #[test]
    fn wide_ceiling_not_above_normal_is_inert() {
        let rules = RuleSet {
            halfwidth_max: Some(0.3),
            halfwidth_wide_max: Some(0.2),
            repolarization_slope_min: Some(1.0),
            ..RuleSet::empty("t")
        };
        let metrics = row(&[(MetricField::Halfwidth, 0.35), (MetricField::RepolarizationSlope, 3.0)]);
        assert_eq!(
            classify(&metrics, &ClusterLabel::Good, &rules).rule,
            Some(RuleId::NoiseWideHalfwidth)
        );
    }

    #[test]
    fn mua_rules_do_not_touch_mua_but_noise_rules_do() {
        let contaminated = row(&[(MetricField::ContamRate, 40.0), (MetricField::FiringRate, 3.0)]);
        let rules = RuleSet::quality_metrics();
        let outcome = classify(&contaminated, &ClusterLabel::Mua, &rules);
        assert_eq!(outcome.label, ClusterLabel::Mua);
        assert_eq!(outcome.rule, None);

        let silent = row(&[(MetricField::FiringRate, 0.01)]);
        let outcome = classify(&silent, &ClusterLabel::Mua, &RuleSet::prephy_filters());
        assert_eq!(outcome.label, ClusterLabel::Noise);
    }

    #[test]
    fn noise_and_unknown_labels_are_never_reconsidered() {
        let pristine = row(&[(MetricField::Snr, 10.0), (MetricField::FiringRate, 5.0)]);
        let rules = RuleSet::prephy_filters();
        assert_eq!(
            classify(&pristine, &ClusterLabel::Noise, &rules).label,
            ClusterLabel::Noise
        );
        let other = ClusterLabel::Other("axon".to_string());
        let silent = row(&[(MetricField::FiringRate, 0.0)]);
        assert_eq!(classify(&silent, &other, &rules).label, other);
    }

    #[test]
    fn unclassified_without_match_becomes_good() {
        let metrics = row(&[(MetricField::ContamRate, 1.0), (MetricField::IsiViol, 0.0)]);
        let outcome = classify(&metrics, &ClusterLabel::Unclassified, &RuleSet::quality_metrics());
        assert_eq!(outcome.label, ClusterLabel::Good);
        assert_eq!(outcome.rule, None);
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let rules = RuleSet::prephy_filters().with_overrides(&RuleOverrides {
            snr_min: Some(2.0),
            contam_rate_max: Some(10.0),
            ..RuleOverrides::default()
        });
        assert_eq!(rules.snr_min, Some(2.0));
        assert_eq!(rules.contam_rate_max, Some(10.0));
        assert_eq!(rules.fr_min, Some(0.05));
        assert_eq!(rules.stage, "prephy_filters");
    }

    #[test]
    fn label_parsing_keeps_unknown_values() {
        assert_eq!(ClusterLabel::parse("good"), ClusterLabel::Good);
        assert_eq!(ClusterLabel::parse(" mua "), ClusterLabel::Mua);
        assert_eq!(
            ClusterLabel::parse("axon"),
            ClusterLabel::Other("axon".to_string())
        );
        assert_eq!(ClusterLabel::Other("axon".to_string()).rank(), None);
        assert!(ClusterLabel::Noise.rank() > ClusterLabel::Mua.rank());
    }

    #[test]
    fn stage_summary_counts_transitions_and_gaps() {
        let mut labels = LabelAssignment::new(
            "KSLabel",
            vec![
                (1, ClusterLabel::Good),
                (2, ClusterLabel::Good),
                (3, ClusterLabel::Noise),
                (4, ClusterLabel::Good),
                (5, ClusterLabel::Other("axon".to_string())),
                (6, ClusterLabel::Good),
            ],
        );
        let mut metrics = MetricTable::default();
        metrics.push(
            MetricRow::new(1)
                .with(MetricField::IsiViol, 0.0)
                .with(MetricField::ContamRate, 1.0),
        );
        metrics.push(
            MetricRow::new(2)
                .with(MetricField::IsiViol, 0.5)
                .with(MetricField::ContamRate, 50.0),
        );
        metrics.push(MetricRow::new(3).with(MetricField::ContamRate, 50.0));
        metrics.push(MetricRow::new(4).with(MetricField::ContamRate, 2.0));
        metrics.push(MetricRow::new(5).with(MetricField::ContamRate, 50.0));

        let summary = apply_stage(&mut labels, &metrics, &RuleSet::quality_metrics());

        assert_eq!(summary.stage, "quality_metrics");
        assert_eq!(summary.clusters, 6);
        assert_eq!(summary.newly_mua, 1);
        assert_eq!(summary.untouched_good, 2);
        assert_eq!(summary.already_noise, 1);
        assert_eq!(summary.passthrough, 1);
        assert_eq!(summary.gaps, vec![6]);
        assert_eq!(summary.skipped_predicates, 1);
        assert_eq!(summary.rule_hits.get(&RuleId::MuaIsiViolations), Some(&1));

        let after: Vec<&str> = labels.iter().map(|(_, l)| l.as_str()).collect();
        assert_eq!(after, vec!["good", "mua", "noise", "good", "axon", "good"]);
    }
}
