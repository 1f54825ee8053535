//! End-to-end runs over one sorter output directory.
//!
//! `quality_metrics` computes and persists a new metric table version and
//! demotes contaminated clusters. `prephy_filters` re-reads the newest
//! persisted tables and applies the pre-curation noise filters. Both leave
//! the label file's previous content in its history snapshot.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;

use crate::builder::MetricTableBuilder;
use crate::classify::{StageSummary, apply_stage};
use crate::config::CurationConfig;
use crate::errors::{CurationError, Result};
use crate::labels::{LabelAssignment, snapshot_history};
use crate::merge::{merge, merge_with_file};
use crate::sources::{SortingSource, WaveformSource};
use crate::table::{MetricField, MetricSource, MetricTable};
use crate::versioning::{VersionedPath, latest, resolve};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    QualityMetrics,
    PrephyFilters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// A required input was absent; nothing was written
    NotAvailable,
}

/// Outcome of one pipeline run, serialized as the run's JSON report.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub pipeline: PipelineKind,
    pub status: RunStatus,
    pub execution_time_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub quality_metrics_output_file: Option<VersionedPath>,
    pub waveform_metrics_output_file: Option<VersionedPath>,
    pub label_file: Option<PathBuf>,
    pub label_history_file: Option<PathBuf>,
    pub stages: Vec<StageSummary>,
    pub field_gaps: usize,
}

impl ExecutionSummary {
    fn new(pipeline: PipelineKind) -> Self {
        Self {
            pipeline,
            status: RunStatus::Completed,
            execution_time_secs: 0.0,
            reason: None,
            quality_metrics_output_file: None,
            waveform_metrics_output_file: None,
            label_file: None,
            label_history_file: None,
            stages: Vec::new(),
            field_gaps: 0,
        }
    }

    fn not_available(pipeline: PipelineKind, err: &CurationError) -> Self {
        Self {
            status: RunStatus::NotAvailable,
            reason: Some(err.to_string()),
            ..Self::new(pipeline)
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CurationError::internal(format!("summary encode: {e}")))
    }
}

/// Missing inputs become a `not_available` summary; every other error is
/// returned to the caller.
fn finish(
    pipeline: PipelineKind,
    started: Instant,
    result: Result<ExecutionSummary>,
) -> Result<ExecutionSummary> {
    let mut summary = match result {
        Ok(summary) => summary,
        Err(err) if err.category().is_not_available() => {
            tracing::warn!(pipeline = ?pipeline, error = %err, "Inputs not available; nothing written");
            ExecutionSummary::not_available(pipeline, &err)
        }
        Err(err) => return Err(err),
    };
    summary.execution_time_secs = started.elapsed().as_secs_f64();
    tracing::info!(
        pipeline = ?pipeline,
        status = ?summary.status,
        secs = summary.execution_time_secs,
        "Pipeline finished"
    );
    Ok(summary)
}

/// Compute metrics, persist them as a new version, then demote contaminated
/// `good` clusters to `mua`.
pub fn run_quality_metrics(
    cfg: &CurationConfig,
    sorter_dir: &Path,
    sorting: &dyn SortingSource,
    waveforms: &dyn WaveformSource,
) -> Result<ExecutionSummary> {
    let started = Instant::now();
    let result = quality_metrics(cfg, sorter_dir, sorting, waveforms);
    finish(PipelineKind::QualityMetrics, started, result)
}

fn quality_metrics(
    cfg: &CurationConfig,
    sorter_dir: &Path,
    sorting: &dyn SortingSource,
    waveforms: &dyn WaveformSource,
) -> Result<ExecutionSummary> {
    let mut summary = ExecutionSummary::new(PipelineKind::QualityMetrics);

    // Labels are validated before any table is resolved or written
    let label_path = cfg.files.label_path(sorter_dir);
    let labels = LabelAssignment::load(&label_path)?;
    let sorting = sorting.load_sorting()?;

    let metrics_target = resolve(&cfg.files.cluster_metrics_path(sorter_dir))?;
    let waveform_target = metrics_target.sibling(&cfg.files.waveform_metrics_path(sorter_dir));

    let builder = MetricTableBuilder::new(cfg);
    let quality = builder.build_quality(&sorting)?;
    summary.field_gaps += quality.gaps.len();

    let merged = if waveform_target.path.is_file() {
        // An existing shape table belongs to the waveform step; read it, never replace it
        tracing::info!(
            path = %waveform_target.path.display(),
            "Merging existing waveform metrics"
        );
        let merged = merge_with_file(
            quality.table,
            MetricSource::Quality,
            &waveform_target.path,
            MetricSource::Waveform,
        )?;
        summary.waveform_metrics_output_file = Some(waveform_target);
        merged
    } else {
        match waveforms.load_waveforms(metrics_target.version)? {
            Some(set) => {
                let shape = builder.build_waveform(&sorting, &set);
                summary.field_gaps += shape.gaps.len();
                shape.table.write_csv(&waveform_target.path)?;
                summary.waveform_metrics_output_file = Some(waveform_target);
                merge(
                    quality.table,
                    MetricSource::Quality,
                    &shape.table,
                    MetricSource::Waveform,
                )
            }
            None => {
                tracing::warn!(
                    version = metrics_target.version,
                    "No waveform metrics for this version; shape rules will not apply"
                );
                quality.table
            }
        }
    };

    merged.write_csv(&metrics_target.path)?;
    summary.quality_metrics_output_file = Some(metrics_target);

    relabel(cfg, &label_path, labels, &merged, PipelineKind::QualityMetrics, &mut summary)?;
    Ok(summary)
}

/// Reclassify with the pre-curation filters using the newest persisted
/// metric tables.
pub fn run_prephy_filters(cfg: &CurationConfig, sorter_dir: &Path) -> Result<ExecutionSummary> {
    let started = Instant::now();
    let result = prephy_filters(cfg, sorter_dir);
    finish(PipelineKind::PrephyFilters, started, result)
}

fn prephy_filters(cfg: &CurationConfig, sorter_dir: &Path) -> Result<ExecutionSummary> {
    let mut summary = ExecutionSummary::new(PipelineKind::PrephyFilters);

    let label_path = cfg.files.label_path(sorter_dir);
    let labels = LabelAssignment::load(&label_path)?;

    let metrics_canonical = cfg.files.cluster_metrics_path(sorter_dir);
    let metrics_version = latest(&metrics_canonical)?.ok_or_else(|| {
        CurationError::missing_input(&metrics_canonical, "no metric table version found")
    })?;
    let mut metrics = MetricTable::read_csv(&metrics_version.path)?;

    if !metrics.has_field(MetricField::Snr) || !metrics.has_field(MetricField::Halfwidth) {
        let waveform_canonical = cfg.files.waveform_metrics_path(sorter_dir);
        match latest(&waveform_canonical)? {
            Some(waveform_version) => {
                metrics = merge_with_file(
                    metrics,
                    MetricSource::Quality,
                    &waveform_version.path,
                    MetricSource::Waveform,
                )?;
                summary.waveform_metrics_output_file = Some(waveform_version);
            }
            None => tracing::warn!(
                path = %waveform_canonical.display(),
                "No waveform metrics to merge; shape filters will be skipped"
            ),
        }
    }
    summary.quality_metrics_output_file = Some(metrics_version);

    relabel(cfg, &label_path, labels, &metrics, PipelineKind::PrephyFilters, &mut summary)?;
    Ok(summary)
}

fn relabel(
    cfg: &CurationConfig,
    label_path: &Path,
    mut labels: LabelAssignment,
    metrics: &MetricTable,
    stage: PipelineKind,
    summary: &mut ExecutionSummary,
) -> Result<()> {
    let rules = match stage {
        PipelineKind::QualityMetrics => cfg.rules.quality_metrics_rules(),
        PipelineKind::PrephyFilters => cfg.rules.prephy_filters_rules(),
    };

    let history = snapshot_history(label_path, cfg.history.policy)?;
    let stage_summary = apply_stage(&mut labels, metrics, &rules);
    labels.save(label_path)?;

    summary.label_file = Some(label_path.to_path_buf());
    summary.label_history_file = history;
    summary.stages.push(stage_summary);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{SortingOutput, WaveformSet};
    use ndarray::{Array2, Array3};
    use tempfile::TempDir;

    struct Absent;

    impl SortingSource for Absent {
        fn load_sorting(&self) -> Result<SortingOutput> {
            Err(CurationError::missing_input("spike_times.npy", "required sorter output is missing"))
        }
    }

    impl WaveformSource for Absent {
        fn load_waveforms(&self, _version: u32) -> Result<Option<WaveformSet>> {
            Ok(None)
        }
    }

    struct Broken;

    impl SortingSource for Broken {
        fn load_sorting(&self) -> Result<SortingOutput> {
            Ok(SortingOutput {
                spike_times: vec![0.0, 1.0],
                spike_clusters: vec![0],
                spike_templates: vec![0, 0],
                amplitudes: vec![1.0, 1.0],
                templates: Array3::zeros((1, 2, 1)),
                channel_map: vec![0],
                channel_positions: Array2::zeros((1, 2)),
            })
        }
    }

    fn seed_labels(dir: &Path) {
        std::fs::write(dir.join("cluster_KSLabel.tsv"), "cluster_id\tKSLabel\n0\tgood\n")
            .expect("labels");
    }

    #[test]
    fn missing_sorter_output_is_not_available_and_writes_nothing() {
        let dir = TempDir::new().expect("tempdir");
        seed_labels(dir.path());
        let cfg = CurationConfig::default();

        let summary = run_quality_metrics(&cfg, dir.path(), &Absent, &Absent).expect("run");
        assert_eq!(summary.status, RunStatus::NotAvailable);
        assert!(summary.reason.as_deref().is_some_and(|r| r.contains("spike_times")));
        assert!(!dir.path().join("metrics.csv").exists());
        assert!(!dir.path().join("cluster_KSLabel_original.tsv").exists());
    }

    #[test]
    fn missing_label_file_is_not_available() {
        let dir = TempDir::new().expect("tempdir");
        let cfg = CurationConfig::default();
        let summary = run_prephy_filters(&cfg, dir.path()).expect("run");
        assert_eq!(summary.status, RunStatus::NotAvailable);
    }

    #[test]
    fn missing_metrics_for_filters_is_not_available() {
        let dir = TempDir::new().expect("tempdir");
        seed_labels(dir.path());
        let cfg = CurationConfig::default();
        let summary = run_prephy_filters(&cfg, dir.path()).expect("run");
        assert_eq!(summary.status, RunStatus::NotAvailable);
        assert!(!summary.is_completed());
    }

    #[test]
    fn malformed_sorter_output_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        seed_labels(dir.path());
        let cfg = CurationConfig::default();
        let err = run_quality_metrics(&cfg, dir.path(), &Broken, &Absent).unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::Format);
    }

    #[test]
    fn summary_serializes_status_in_snake_case() {
        let summary = ExecutionSummary::not_available(
            PipelineKind::PrephyFilters,
            &CurationError::missing_input("metrics.csv", "no metric table version found"),
        );
        let json = serde_json::to_value(&summary).expect("json");
        assert_eq!(json["status"], "not_available");
        assert_eq!(json["pipeline"], "prephy_filters");
    }
}
