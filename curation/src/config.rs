//! Curation configuration loading
//!
//! Loads configuration from `~/.config/spikeqc/spikeqc.toml` (or the
//! `SPIKEQC_CONFIG` env var). Every section is optional; missing values fall
//! back to the defaults the recording pipeline has always used.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::classify::{RuleOverrides, RuleSet};
use crate::errors::{CurationError, Result};

/// Root configuration, one immutable value per pipeline invocation.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct CurationConfig {
    /// Recording parameters
    #[serde(default)]
    pub ephys: EphysConfig,

    /// Artifact file names inside the sorter output directory
    #[serde(default)]
    pub files: FilesConfig,

    /// Metric estimator parameters
    #[serde(default)]
    pub quality_metrics: QualityMetricsConfig,

    /// Label history snapshot behavior
    #[serde(default)]
    pub history: HistoryConfig,

    /// Per-stage classification thresholds
    #[serde(default)]
    pub rules: RulesConfig,
}

/// Recording parameters
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct EphysConfig {
    /// Sample rate of the AP band in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,

    /// Recording length in seconds. When unset, the span between the first
    /// and last spike of the whole recording is used.
    #[serde(default)]
    pub recording_duration_secs: Option<f64>,
}

fn default_sample_rate() -> f64 {
    30000.0
}

impl Default for EphysConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            recording_duration_secs: None,
        }
    }
}

/// Artifact file names. Relative names are joined onto the sorter output
/// directory, absolute paths are used as-is.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct FilesConfig {
    /// Canonical quality-metrics table
    #[serde(default = "default_cluster_metrics_file")]
    pub cluster_metrics_file: String,

    /// Canonical waveform-shape metrics table
    #[serde(default = "default_waveform_metrics_file")]
    pub waveform_metrics_file: String,

    /// Sorter-native label file, overwritten in place
    #[serde(default = "default_label_file")]
    pub label_file: String,

    /// Mean waveforms written by the waveform extractor
    #[serde(default = "default_mean_waveforms_file")]
    pub mean_waveforms_file: String,

    /// Per-cluster SNR written by the waveform extractor
    #[serde(default = "default_snr_file")]
    pub snr_file: String,
}

fn default_cluster_metrics_file() -> String {
    "metrics.csv".to_string()
}
fn default_waveform_metrics_file() -> String {
    "waveform_metrics.csv".to_string()
}
fn default_label_file() -> String {
    "cluster_KSLabel.tsv".to_string()
}
fn default_mean_waveforms_file() -> String {
    "mean_waveforms.npy".to_string()
}
fn default_snr_file() -> String {
    "cluster_snr.npy".to_string()
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            cluster_metrics_file: default_cluster_metrics_file(),
            waveform_metrics_file: default_waveform_metrics_file(),
            label_file: default_label_file(),
            mean_waveforms_file: default_mean_waveforms_file(),
            snr_file: default_snr_file(),
        }
    }
}

impl FilesConfig {
    /// Canonical quality-metrics path for a sorter output directory
    pub fn cluster_metrics_path(&self, sorter_dir: &Path) -> PathBuf {
        in_dir(sorter_dir, &self.cluster_metrics_file)
    }

    /// Canonical waveform-metrics path for a sorter output directory
    pub fn waveform_metrics_path(&self, sorter_dir: &Path) -> PathBuf {
        in_dir(sorter_dir, &self.waveform_metrics_file)
    }

    /// Label file path for a sorter output directory
    pub fn label_path(&self, sorter_dir: &Path) -> PathBuf {
        in_dir(sorter_dir, &self.label_file)
    }

    /// Canonical mean-waveform array path for a sorter output directory
    pub fn mean_waveforms_path(&self, sorter_dir: &Path) -> PathBuf {
        in_dir(sorter_dir, &self.mean_waveforms_file)
    }

    /// Canonical SNR array path for a sorter output directory
    pub fn snr_path(&self, sorter_dir: &Path) -> PathBuf {
        in_dir(sorter_dir, &self.snr_file)
    }
}

fn in_dir(dir: &Path, name: &str) -> PathBuf {
    let path = Path::new(name);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

/// Metric estimator parameters
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct QualityMetricsConfig {
    /// Refractory period: consecutive spikes closer than this violate it
    #[serde(default = "default_isi_threshold_secs")]
    pub isi_threshold_secs: f64,

    /// Spikes closer than this are duplicate detections and are dropped
    /// before violations are counted
    #[serde(default)]
    pub min_isi_secs: f64,

    /// Number of equal time bins for the presence ratio
    #[serde(default = "default_presence_bins")]
    pub presence_bins: usize,

    /// Histogram bins for the amplitude cutoff estimate
    #[serde(default = "default_amplitude_histogram_bins")]
    pub amplitude_histogram_bins: usize,

    /// Gaussian smoothing (in bins) of the amplitude histogram
    #[serde(default = "default_amplitude_smoothing_bins")]
    pub amplitude_smoothing_bins: f64,

    /// Samples after the trough used for the repolarization slope fit
    #[serde(default = "default_repolarization_window")]
    pub repolarization_window: usize,
}

fn default_isi_threshold_secs() -> f64 {
    0.0015
}
fn default_presence_bins() -> usize {
    100
}
fn default_amplitude_histogram_bins() -> usize {
    500
}
fn default_amplitude_smoothing_bins() -> f64 {
    3.0
}
fn default_repolarization_window() -> usize {
    20
}

impl Default for QualityMetricsConfig {
    fn default() -> Self {
        Self {
            isi_threshold_secs: default_isi_threshold_secs(),
            min_isi_secs: 0.0,
            presence_bins: default_presence_bins(),
            amplitude_histogram_bins: default_amplitude_histogram_bins(),
            amplitude_smoothing_bins: default_amplitude_smoothing_bins(),
            repolarization_window: default_repolarization_window(),
        }
    }
}

/// How the pre-reclassification label file is preserved
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryPolicy {
    /// Write `<label>_original` once, never overwrite it afterwards
    #[default]
    WriteOnce,
    /// Always replace `<label>_original` with the immediately prior content
    Overwrite,
    /// Add `<label>_original_n` whenever the content differs from the newest
    /// snapshot
    Versioned,
}

/// Label history settings
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct HistoryConfig {
    #[serde(default)]
    pub policy: HistoryPolicy,
}

/// Threshold overrides per classification stage, applied field by field on
/// top of each stage's preset.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct RulesConfig {
    /// Stage run right after metrics are computed
    #[serde(default)]
    pub quality_metrics: RuleOverrides,

    /// Stage run before manual curation
    #[serde(default)]
    pub prephy_filters: RuleOverrides,
}

impl RulesConfig {
    /// Effective rule set of the quality-metrics stage
    pub fn quality_metrics_rules(&self) -> RuleSet {
        RuleSet::quality_metrics().with_overrides(&self.quality_metrics)
    }

    /// Effective rule set of the pre-curation filter stage
    pub fn prephy_filters_rules(&self) -> RuleSet {
        RuleSet::prephy_filters().with_overrides(&self.prephy_filters)
    }
}

impl CurationConfig {
    /// Environment variable for config path override
    pub const ENV_CONFIG_PATH: &'static str = "SPIKEQC_CONFIG";

    /// Default config filename
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "spikeqc.toml";

    /// Load configuration from file
    ///
    /// Resolution order:
    /// 1. `SPIKEQC_CONFIG` environment variable
    /// 2. `~/.config/spikeqc/spikeqc.toml`
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let path = Self::resolve_config_path();

        if !path.exists() {
            tracing::info!(
                path = %path.display(),
                "Curation config not found, using defaults"
            );
            return Ok(Self::default());
        }

        Self::load_from_path(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CurationError::config_with_source(
                format!("failed to read config at {}", path.display()),
                e,
            )
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        let cfg: CurationConfig = toml::from_str(contents)
            .map_err(|e| CurationError::config_with_source("failed to parse config", e))?;

        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .map(|h| {
                h.join(".config")
                    .join("spikeqc")
                    .join(Self::DEFAULT_CONFIG_FILENAME)
            })
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.ephys.sample_rate > 0.0) {
            return Err(CurationError::config(format!(
                "ephys.sample_rate must be positive, got {}",
                self.ephys.sample_rate
            )));
        }

        if let Some(duration) = self.ephys.recording_duration_secs
            && !(duration > 0.0)
        {
            return Err(CurationError::config(format!(
                "ephys.recording_duration_secs must be positive, got {duration}"
            )));
        }

        let qm = &self.quality_metrics;
        if qm.min_isi_secs < 0.0 || !(qm.isi_threshold_secs > qm.min_isi_secs) {
            return Err(CurationError::config(format!(
                "quality_metrics.isi_threshold_secs ({}) must exceed min_isi_secs ({}) >= 0",
                qm.isi_threshold_secs, qm.min_isi_secs
            )));
        }

        if qm.presence_bins == 0 || qm.amplitude_histogram_bins == 0 {
            return Err(CurationError::config(
                "quality_metrics presence_bins and amplitude_histogram_bins must be non-zero",
            ));
        }

        if qm.repolarization_window < 2 {
            return Err(CurationError::config(
                "quality_metrics.repolarization_window needs at least 2 samples",
            ));
        }

        for (stage, rules) in [
            ("quality_metrics", self.rules.quality_metrics_rules()),
            ("prephy_filters", self.rules.prephy_filters_rules()),
        ] {
            if let (Some(wide), Some(normal)) = (rules.halfwidth_wide_max, rules.halfwidth_max)
                && wide <= normal
            {
                tracing::warn!(
                    stage,
                    halfwidth_wide_max = wide,
                    halfwidth_max = normal,
                    "Wide halfwidth ceiling is not above the normal ceiling; wide exception is inert"
                );
            }
            if rules.halfwidth_wide_max.is_some() && rules.repolarization_slope_min.is_none() {
                tracing::warn!(
                    stage,
                    "halfwidth_wide_max set without repolarization_slope_min; wide units are always tolerated"
                );
            }
        }

        Ok(())
    }
}
