//! Cluster quality metrics and heuristic labeling for spike-sorting output
//!
//! Post-processes a sorter output directory:
//! - computes per-cluster quality and waveform-shape metrics
//! - persists them as versioned CSV tables that never overwrite earlier runs
//! - merges independently produced metric tables on `cluster_id`
//! - demotes clusters `good -> mua -> noise` with ordered threshold rules,
//!   keeping the previous label file as a history snapshot

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod builder;
pub mod classify;
pub mod config;
pub mod errors;
pub mod labels;
pub mod merge;
pub mod persist;
pub mod pipeline;
pub mod sources;
pub mod table;
pub mod versioning;

use std::path::Path;

pub use builder::{
    BuiltTable, FieldGap, MetricTableBuilder, SortingOutput, WaveformSet, WaveformSummary,
};
pub use classify::{
    Classification, ClusterLabel, RuleId, RuleOverrides, RuleSet, StageSummary, apply_stage,
    classify,
};
pub use config::{CurationConfig, HistoryPolicy};
pub use errors::{CurationError, ErrorCategory, Result};
pub use labels::{LabelAssignment, snapshot_history};
pub use merge::{merge, merge_with_file};
pub use pipeline::{ExecutionSummary, PipelineKind, RunStatus};
pub use sources::{CWavesOutput, KilosortDir, SortingSource, WaveformSource};
pub use table::{Cell, MetricField, MetricRow, MetricSource, MetricTable};
pub use versioning::{VersionedPath, latest, resolve, versioned_path};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runs the curation pipelines against file-backed sorter output
pub struct CurationEngine {
    cfg: CurationConfig,
}

impl CurationEngine {
    /// Create an engine from the resolved on-disk configuration
    pub fn new() -> Result<Self> {
        let cfg = CurationConfig::load()?;
        Ok(Self::with_config(cfg))
    }

    pub fn with_config(cfg: CurationConfig) -> Self {
        tracing::debug!(
            version = VERSION,
            sample_rate = cfg.ephys.sample_rate,
            history = ?cfg.history.policy,
            "Curation engine initialized"
        );
        Self { cfg }
    }

    /// Compute, persist and apply quality metrics for `sorter_dir`.
    pub fn quality_metrics(&self, sorter_dir: &Path) -> Result<ExecutionSummary> {
        let sorting = KilosortDir::new(sorter_dir, self.cfg.ephys.sample_rate);
        let waveforms = CWavesOutput::from_files(&self.cfg.files, sorter_dir);
        pipeline::run_quality_metrics(&self.cfg, sorter_dir, &sorting, &waveforms)
    }

    /// Apply the pre-curation filters to the newest metrics of `sorter_dir`.
    pub fn prephy_filters(&self, sorter_dir: &Path) -> Result<ExecutionSummary> {
        pipeline::run_prephy_filters(&self.cfg, sorter_dir)
    }

    /// Path the next metric table of `sorter_dir` would be written to
    pub fn next_metrics_version(&self, sorter_dir: &Path) -> Result<VersionedPath> {
        resolve(&self.cfg.files.cluster_metrics_path(sorter_dir))
    }
}
