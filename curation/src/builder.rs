//! Per-cluster metric computation
//!
//! ```text
//! firing_rate      = N / duration
//! isi_viol         = #(ISI < t_ref) / #ISI          (after dropping ISI <= t_min)
//! contam_rate      = 100 * num_viol / (2 * N * (t_ref - t_min) * firing_rate)
//! presence_ratio   = #(bins with a spike) / #bins
//! amplitude_cutoff = mass of the smoothed amplitude pdf above the point where
//!                    it falls back to its lowest-bin density, capped at 0.5
//! snr              = ptp(best channel) / noise_std(best channel)
//! depth            = ptp-weighted mean y of channels with ptp >= max_ptp / 2
//! ```
//!
//! A cluster whose metric cannot be computed gets an unavailable cell and a
//! [`FieldGap`]; the rest of its row is still filled in.

use std::collections::BTreeMap;

use ndarray::{Array2, Array3, ArrayView1, ArrayView2, Axis};
use serde::Serialize;

use crate::config::CurationConfig;
use crate::errors::{CurationError, Result};
use crate::table::{MetricField, MetricRow, MetricTable};

/// A computed metric, or the reason it is unavailable
type FieldResult = std::result::Result<f64, String>;

/// Arrays produced by the spike sorter for one recording.
#[derive(Debug, Clone)]
pub struct SortingOutput {
    /// Spike times in seconds
    pub spike_times: Vec<f64>,
    /// Cluster id of each spike
    pub spike_clusters: Vec<i64>,
    /// Template id of each spike
    pub spike_templates: Vec<i64>,
    /// Template scaling amplitude of each spike
    pub amplitudes: Vec<f64>,
    /// templates × samples × channels
    pub templates: Array3<f64>,
    /// Hardware channel of each template channel
    pub channel_map: Vec<i64>,
    /// channels × (x, y) in micrometers
    pub channel_positions: Array2<f64>,
}

impl SortingOutput {
    /// Check that the per-spike arrays line up.
    pub fn validate(&self) -> Result<()> {
        let n = self.spike_times.len();
        for (name, len) in [
            ("spike_clusters", self.spike_clusters.len()),
            ("spike_templates", self.spike_templates.len()),
            ("amplitudes", self.amplitudes.len()),
        ] {
            if len != n {
                return Err(CurationError::format(
                    name,
                    format!("expected {n} entries to match spike_times, found {len}"),
                ));
            }
        }
        let channels = self.templates.len_of(Axis(2));
        for (name, len) in [
            ("channel_map", self.channel_map.len()),
            ("channel_positions", self.channel_positions.nrows()),
        ] {
            if len != channels {
                return Err(CurationError::format(
                    name,
                    format!("expected {channels} channels to match templates, found {len}"),
                ));
            }
        }
        if self.channel_positions.ncols() < 2 {
            return Err(CurationError::format(
                "channel_positions",
                format!(
                    "expected a channels x 2 array, found {} columns",
                    self.channel_positions.ncols()
                ),
            ));
        }
        Ok(())
    }

    /// Sorted unique cluster ids that own at least one spike
    pub fn cluster_ids(&self) -> Vec<i64> {
        let mut ids = self.spike_clusters.clone();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn spikes_by_cluster(&self) -> BTreeMap<i64, Vec<usize>> {
        let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (index, &cluster) in self.spike_clusters.iter().enumerate() {
            groups.entry(cluster).or_default().push(index);
        }
        groups
    }

    fn time_span(&self) -> Option<(f64, f64)> {
        let min = self.spike_times.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self
            .spike_times
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        (min.is_finite() && max.is_finite()).then_some((min, max))
    }
}

/// Mean waveform and noise summary of one unit.
#[derive(Debug, Clone)]
pub struct WaveformSummary {
    /// channels × samples
    pub mean_waveform: Array2<f64>,
    /// SNR computed upstream; takes precedence when present
    pub snr: Option<f64>,
    /// Per-channel noise standard deviation
    pub noise_std: Option<Vec<f64>>,
}

/// Waveform summaries for the clusters of one recording.
#[derive(Debug, Clone, Default)]
pub struct WaveformSet {
    pub units: BTreeMap<i64, WaveformSummary>,
}

/// A metric that could not be computed for one cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldGap {
    pub cluster_id: i64,
    pub field: &'static str,
    pub reason: String,
}

/// Output of a builder pass.
#[derive(Debug, Clone, Default)]
pub struct BuiltTable {
    pub table: MetricTable,
    pub gaps: Vec<FieldGap>,
}

impl BuiltTable {
    fn record(&mut self, row: &mut MetricRow, field: MetricField, value: FieldResult) {
        match value {
            Ok(v) => row.set_field(field, Some(v)),
            Err(reason) => {
                row.set_field(field, None);
                self.gaps.push(FieldGap {
                    cluster_id: row.cluster_id(),
                    field: field.column(),
                    reason,
                });
            }
        }
    }
}

/// Computes metric tables from sorter output.
pub struct MetricTableBuilder<'a> {
    cfg: &'a CurationConfig,
}

impl<'a> MetricTableBuilder<'a> {
    pub fn new(cfg: &'a CurationConfig) -> Self {
        Self { cfg }
    }

    /// Spike-train metrics plus depth, one row per cluster with spikes.
    pub fn build_quality(&self, sorting: &SortingOutput) -> Result<BuiltTable> {
        sorting.validate()?;

        let qm = &self.cfg.quality_metrics;
        let (start, end) = match (self.cfg.ephys.recording_duration_secs, sorting.time_span()) {
            (Some(duration), _) => (0.0, duration),
            (None, Some(span)) => span,
            (None, None) => (0.0, 0.0),
        };
        let duration = end - start;

        let mut built = BuiltTable {
            table: MetricTable::with_fields(&MetricField::QUALITY),
            gaps: Vec::new(),
        };

        for (cluster_id, indices) in sorting.spikes_by_cluster() {
            let mut row = MetricRow::new(cluster_id);
            let mut train: Vec<f64> = indices.iter().map(|&i| sorting.spike_times[i]).collect();
            train.sort_by(f64::total_cmp);
            let amplitudes: Vec<f64> = indices.iter().map(|&i| sorting.amplitudes[i]).collect();

            row.set_field(MetricField::NumSpikes, Some(train.len() as f64));
            built.record(
                &mut row,
                MetricField::FiringRate,
                firing_rate(train.len(), duration)
                    .ok_or_else(|| "recording duration is zero".to_string()),
            );
            built.record(
                &mut row,
                MetricField::PresenceRatio,
                presence_ratio(&train, start, end, qm.presence_bins)
                    .ok_or_else(|| "recording duration is zero".to_string()),
            );

            let isi = isi_violations(&train, qm.isi_threshold_secs, qm.min_isi_secs, duration);
            row.set_field(MetricField::NumViol, Some(isi.num_viol as f64));
            built.record(
                &mut row,
                MetricField::IsiViol,
                isi.isi_viol.ok_or_else(|| "fewer than two spikes".to_string()),
            );
            built.record(
                &mut row,
                MetricField::ContamRate,
                isi.contam_rate.ok_or_else(|| "firing rate undefined".to_string()),
            );

            built.record(
                &mut row,
                MetricField::AmplitudeCutoff,
                amplitude_cutoff(
                    &amplitudes,
                    qm.amplitude_histogram_bins,
                    qm.amplitude_smoothing_bins,
                )
                .ok_or_else(|| "amplitude distribution is degenerate".to_string()),
            );

            let depth = dominant_template(&indices, &sorting.spike_templates)
                .and_then(|t| (t >= 0).then_some(t as usize))
                .filter(|&t| t < sorting.templates.len_of(Axis(0)))
                .ok_or_else(|| "no template for cluster".to_string())
                .and_then(|t| {
                    let template = sorting.templates.index_axis(Axis(0), t);
                    template_depth(template, &sorting.channel_positions)
                        .ok_or_else(|| "template has no signal".to_string())
                });
            built.record(&mut row, MetricField::Depth, depth);

            built.table.push(row);
        }

        tracing::info!(
            clusters = built.table.len(),
            gaps = built.gaps.len(),
            duration_secs = duration,
            "Computed quality metrics"
        );
        Ok(built)
    }

    /// Waveform-shape metrics, one row per cluster with spikes. Clusters
    /// without a waveform summary get a fully unavailable row.
    pub fn build_waveform(&self, sorting: &SortingOutput, waveforms: &WaveformSet) -> BuiltTable {
        let sample_rate = self.cfg.ephys.sample_rate;
        let window = self.cfg.quality_metrics.repolarization_window;

        let mut built = BuiltTable {
            table: MetricTable::with_fields(&MetricField::WAVEFORM),
            gaps: Vec::new(),
        };

        for cluster_id in sorting.cluster_ids() {
            let mut row = MetricRow::new(cluster_id);
            let Some(unit) = waveforms.units.get(&cluster_id) else {
                for field in MetricField::WAVEFORM {
                    built.record(&mut row, field, Err("no mean waveform".to_string()));
                }
                built.table.push(row);
                continue;
            };

            let Some(best) = best_channel(unit.mean_waveform.view()) else {
                for field in MetricField::WAVEFORM {
                    built.record(&mut row, field, Err("mean waveform is empty".to_string()));
                }
                built.table.push(row);
                continue;
            };

            let trace: Vec<f64> = unit.mean_waveform.row(best).to_vec();
            let ptp = peak_to_peak(unit.mean_waveform.row(best)).unwrap_or(0.0);

            row.set_field(MetricField::PeakChannel, Some(best as f64));
            built.record(&mut row, MetricField::Snr, unit_snr(unit, best, ptp));
            row.set_field(MetricField::Amplitude, Some(ptp));
            built.record(
                &mut row,
                MetricField::Halfwidth,
                halfwidth_ms(&trace, sample_rate)
                    .ok_or_else(|| "no half-amplitude crossing".to_string()),
            );
            built.record(
                &mut row,
                MetricField::RepolarizationSlope,
                repolarization_slope(&trace, sample_rate, window)
                    .ok_or_else(|| "trough too close to the end of the waveform".to_string()),
            );

            built.table.push(row);
        }

        tracing::info!(
            clusters = built.table.len(),
            with_waveforms = waveforms.units.len(),
            gaps = built.gaps.len(),
            "Computed waveform metrics"
        );
        built
    }
}

fn unit_snr(unit: &WaveformSummary, best: usize, ptp: f64) -> FieldResult {
    if let Some(snr) = unit.snr {
        return if snr.is_finite() {
            Ok(snr)
        } else {
            Err("upstream SNR is not finite".to_string())
        };
    }
    let noise = unit
        .noise_std
        .as_ref()
        .and_then(|n| n.get(best).copied())
        .ok_or_else(|| "no noise estimate".to_string())?;
    if noise > 0.0 {
        Ok(ptp / noise)
    } else {
        Err("noise estimate is zero".to_string())
    }
}

/// Spikes per second, `None` for an empty recording.
pub fn firing_rate(spike_count: usize, duration_secs: f64) -> Option<f64> {
    (duration_secs > 0.0).then_some(spike_count as f64 / duration_secs)
}

/// Refractory-period violation statistics of one spike train.
#[derive(Debug, Clone, PartialEq)]
pub struct IsiViolations {
    /// Fraction of ISIs below the refractory threshold
    pub isi_viol: Option<f64>,
    /// Number of ISIs below the refractory threshold
    pub num_viol: u64,
    /// Observed / Poisson-expected violations, in percent
    pub contam_rate: Option<f64>,
}

/// Violation statistics for a sorted spike train.
///
/// Spikes following a gap of at most `min_isi` are duplicate detections and
/// are removed before counting.
pub fn isi_violations(
    train: &[f64],
    isi_threshold: f64,
    min_isi: f64,
    duration_secs: f64,
) -> IsiViolations {
    let mut kept: Vec<f64> = Vec::with_capacity(train.len());
    for (i, &t) in train.iter().enumerate() {
        if i > 0 && t - train[i - 1] <= min_isi {
            continue;
        }
        kept.push(t);
    }

    let num_isis = kept.len().saturating_sub(1);
    let num_viol = kept
        .windows(2)
        .filter(|pair| pair[1] - pair[0] < isi_threshold)
        .count() as u64;

    let isi_viol = (num_isis > 0).then_some(num_viol as f64 / num_isis as f64);

    let contam_rate = firing_rate(kept.len(), duration_secs)
        .filter(|&rate| rate > 0.0)
        .map(|rate| {
            let violation_time = 2.0 * kept.len() as f64 * (isi_threshold - min_isi);
            100.0 * (num_viol as f64 / violation_time) / rate
        });

    IsiViolations {
        isi_viol,
        num_viol,
        contam_rate,
    }
}

/// Fraction of `bins` equal slices of `[start, end]` holding a spike.
pub fn presence_ratio(train: &[f64], start: f64, end: f64, bins: usize) -> Option<f64> {
    if !(end > start) || bins == 0 {
        return None;
    }
    let width = (end - start) / bins as f64;
    let mut occupied = vec![false; bins];
    for &t in train {
        if !(start..=end).contains(&t) {
            continue;
        }
        let bin = (((t - start) / width) as usize).min(bins - 1);
        occupied[bin] = true;
    }
    Some(occupied.iter().filter(|&&o| o).count() as f64 / bins as f64)
}

/// Estimated fraction of spikes lost below the detection threshold.
///
/// Smooths the amplitude density, finds where the upper tail falls back to
/// the density of the lowest bin and integrates the tail beyond it. The
/// estimate is capped at 0.5.
pub fn amplitude_cutoff(amplitudes: &[f64], bins: usize, smoothing: f64) -> Option<f64> {
    let finite: Vec<f64> = amplitudes.iter().copied().filter(|a| a.is_finite()).collect();
    if finite.len() < 2 || bins == 0 {
        return None;
    }
    let lo = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(hi > lo) {
        return None;
    }

    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0.0; bins];
    for a in &finite {
        let bin = (((a - lo) / width) as usize).min(bins - 1);
        counts[bin] += 1.0;
    }
    let norm = finite.len() as f64 * width;
    let density: Vec<f64> = counts.iter().map(|c| c / norm).collect();
    let pdf = gaussian_smooth(&density, smoothing);

    let peak = argmax(&pdf)?;
    let floor = pdf[0];
    let tail_start = pdf[peak..]
        .iter()
        .enumerate()
        .min_by(|a, b| (a.1 - floor).abs().total_cmp(&(b.1 - floor).abs()))
        .map(|(i, _)| i + peak)?;

    let missing: f64 = pdf[tail_start..].iter().sum::<f64>() * width;
    Some(missing.min(0.5))
}

/// Gaussian filter with half-sample symmetric edges, truncated at 4 sigma.
fn gaussian_smooth(values: &[f64], sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 || values.is_empty() {
        return values.to_vec();
    }
    let radius = (4.0 * sigma + 0.5) as isize;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|x| (-0.5 * (x as f64 / sigma).powi(2)).exp())
        .collect();
    let total: f64 = kernel.iter().sum();

    let n = values.len();
    (0..n as isize)
        .map(|i| {
            kernel
                .iter()
                .zip(-radius..=radius)
                .map(|(w, offset)| w * values[reflect_index(i + offset, n)])
                .sum::<f64>()
                / total
        })
        .collect()
}

fn reflect_index(mut i: isize, n: usize) -> usize {
    let n = n as isize;
    loop {
        if i < 0 {
            i = -i - 1;
        } else if i >= n {
            i = 2 * n - i - 1;
        } else {
            return i as usize;
        }
    }
}

fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

fn argmin(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b <= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// max - min of the finite samples.
pub fn peak_to_peak(trace: ArrayView1<'_, f64>) -> Option<f64> {
    let (lo, hi) = trace
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    (hi >= lo).then_some(hi - lo)
}

/// Channel (row) with the largest peak-to-peak amplitude.
pub fn best_channel(mean_waveform: ArrayView2<'_, f64>) -> Option<usize> {
    let ptps: Vec<f64> = mean_waveform
        .outer_iter()
        .map(|row| peak_to_peak(row).unwrap_or(f64::NAN))
        .collect();
    argmax(&ptps)
}

/// Width of the dominant deflection at half its amplitude, in milliseconds.
pub fn halfwidth_ms(trace: &[f64], sample_rate: f64) -> Option<f64> {
    let trough = argmin(trace)?;
    let peak = argmax(trace)?;

    let (crossing_1, crossing_2) = if trace[peak] > trace[trough].abs() {
        let threshold = trace[peak] * 0.5;
        let first = trace[..peak].iter().position(|&v| v > threshold)?;
        let second = trace[peak..].iter().position(|&v| v < threshold)? + peak;
        (first, second)
    } else {
        let threshold = trace[trough] * 0.5;
        let first = trace[..trough].iter().position(|&v| v < threshold)?;
        let second = trace[trough..].iter().position(|&v| v > threshold)? + trough;
        (first, second)
    };

    Some((crossing_2 - crossing_1) as f64 / sample_rate * 1e3)
}

/// Least-squares slope of the trough-normalized waveform over `window`
/// samples starting at the trough, in normalized amplitude per millisecond.
pub fn repolarization_slope(trace: &[f64], sample_rate: f64, window: usize) -> Option<f64> {
    let trough = argmin(trace)?;
    let depth = trace[trough].abs();
    if depth == 0.0 {
        return None;
    }
    let end = (trough + window).min(trace.len());
    if end - trough < 2 {
        return None;
    }

    let points: Vec<(f64, f64)> = (trough..end)
        .map(|i| (i as f64 / sample_rate * 1e3, trace[i] / depth))
        .collect();
    let n = points.len() as f64;
    let mean_t = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_v = points.iter().map(|p| p.1).sum::<f64>() / n;
    let cov: f64 = points.iter().map(|p| (p.0 - mean_t) * (p.1 - mean_v)).sum();
    let var: f64 = points.iter().map(|p| (p.0 - mean_t).powi(2)).sum();
    (var > 0.0).then_some(cov / var)
}

/// Most frequent template among a cluster's spikes; ties go to the lower id.
fn dominant_template(indices: &[usize], spike_templates: &[i64]) -> Option<i64> {
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for &i in indices {
        if let Some(&t) = spike_templates.get(i) {
            *counts.entry(t).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .fold(None, |best: Option<(i64, usize)>, (t, c)| match best {
            Some((_, bc)) if bc >= c => best,
            _ => Some((t, c)),
        })
        .map(|(t, _)| t)
}

/// Vertical position of a template (samples × channels), in whole
/// micrometers.
pub fn template_depth(template: ArrayView2<'_, f64>, positions: &Array2<f64>) -> Option<f64> {
    let ptps: Vec<f64> = template
        .axis_iter(Axis(1))
        .map(|column| peak_to_peak(column).unwrap_or(0.0))
        .collect();
    let max = ptps.iter().copied().fold(0.0, f64::max);
    if max <= 0.0 || positions.nrows() < ptps.len() || positions.ncols() < 2 {
        return None;
    }

    let (weighted, total) = ptps
        .iter()
        .enumerate()
        .filter(|(_, p)| **p >= 0.5 * max)
        .fold((0.0, 0.0), |(w, t), (channel, &p)| {
            (w + p * positions[[channel, 1]], t + p)
        });
    Some((weighted / total).round())
}
