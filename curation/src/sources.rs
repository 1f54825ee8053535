//! Readers for sorter output and per-unit waveform summaries.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, ArrayD, Ix2, Ix3};
use ndarray_npy::{ReadNpyError, ReadableElement, read_npy};

use crate::builder::{SortingOutput, WaveformSet, WaveformSummary};
use crate::config::FilesConfig;
use crate::errors::{CurationError, Result};
use crate::versioning::versioned_path;

/// Produces the spike-level arrays of one sorting run.
pub trait SortingSource {
    /// Fails with a missing-input error when expected files are absent.
    fn load_sorting(&self) -> Result<SortingOutput>;
}

/// Produces mean waveforms for the clusters of one run.
pub trait WaveformSource {
    /// Waveforms computed for metrics `version`, or `None` when none exist.
    fn load_waveforms(&self, version: u32) -> Result<Option<WaveformSet>>;
}

/// Kilosort-style output directory of `.npy` arrays.
#[derive(Debug, Clone)]
pub struct KilosortDir {
    dir: PathBuf,
    sample_rate: f64,
}

impl KilosortDir {
    pub const SPIKE_TIMES: &'static str = "spike_times.npy";
    pub const SPIKE_CLUSTERS: &'static str = "spike_clusters.npy";
    pub const SPIKE_TEMPLATES: &'static str = "spike_templates.npy";
    pub const AMPLITUDES: &'static str = "amplitudes.npy";
    pub const TEMPLATES: &'static str = "templates.npy";
    pub const CHANNEL_MAP: &'static str = "channel_map.npy";
    pub const CHANNEL_POSITIONS: &'static str = "channel_positions.npy";

    pub fn new(dir: impl Into<PathBuf>, sample_rate: f64) -> Self {
        Self {
            dir: dir.into(),
            sample_rate,
        }
    }

    fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl SortingSource for KilosortDir {
    fn load_sorting(&self) -> Result<SortingOutput> {
        if !self.dir.is_dir() {
            return Err(CurationError::missing_input(
                &self.dir,
                "sorter output directory does not exist",
            ));
        }
        // Check everything up front so a partial directory fails before any read
        for name in [
            Self::SPIKE_TIMES,
            Self::SPIKE_CLUSTERS,
            Self::SPIKE_TEMPLATES,
            Self::AMPLITUDES,
            Self::TEMPLATES,
            Self::CHANNEL_MAP,
            Self::CHANNEL_POSITIONS,
        ] {
            let path = self.file(name);
            if !path.is_file() {
                return Err(CurationError::missing_input(
                    path,
                    "required sorter output is missing",
                ));
            }
        }

        let spike_samples = read_integers(&self.file(Self::SPIKE_TIMES))?;
        let spike_times = spike_samples
            .into_iter()
            .map(|s| s as f64 / self.sample_rate)
            .collect();

        let templates_path = self.file(Self::TEMPLATES);
        let templates: Array3<f64> = read_floats(&templates_path)?
            .into_dimensionality::<Ix3>()
            .map_err(|e| {
                CurationError::format(
                    &templates_path,
                    format!("expected templates x samples x channels: {e}"),
                )
            })?;

        let positions_path = self.file(Self::CHANNEL_POSITIONS);
        let channel_positions: Array2<f64> = read_floats(&positions_path)?
            .into_dimensionality::<Ix2>()
            .map_err(|e| {
                CurationError::format(&positions_path, format!("expected channels x 2: {e}"))
            })?;

        let sorting = SortingOutput {
            spike_times,
            spike_clusters: read_integers(&self.file(Self::SPIKE_CLUSTERS))?,
            spike_templates: read_integers(&self.file(Self::SPIKE_TEMPLATES))?,
            amplitudes: read_floats(&self.file(Self::AMPLITUDES))?.iter().copied().collect(),
            templates,
            channel_map: read_integers(&self.file(Self::CHANNEL_MAP))?,
            channel_positions,
        };
        sorting.validate()?;

        tracing::info!(
            dir = %self.dir.display(),
            spikes = sorting.spike_times.len(),
            templates = sorting.templates.len_of(ndarray::Axis(0)),
            "Loaded sorter output"
        );
        Ok(sorting)
    }
}

/// Mean waveforms and SNR written by the waveform extraction step.
///
/// `mean_waveforms.npy` is clusters × channels × samples, row index is the
/// cluster id. `cluster_snr.npy` holds the SNR in its first column.
#[derive(Debug, Clone)]
pub struct CWavesOutput {
    mean_waveforms: PathBuf,
    snr: PathBuf,
}

impl CWavesOutput {
    pub fn new(mean_waveforms: impl Into<PathBuf>, snr: impl Into<PathBuf>) -> Self {
        Self {
            mean_waveforms: mean_waveforms.into(),
            snr: snr.into(),
        }
    }

    /// Files named by `files`, inside `sorter_dir`
    pub fn from_files(files: &FilesConfig, sorter_dir: &Path) -> Self {
        Self::new(files.mean_waveforms_path(sorter_dir), files.snr_path(sorter_dir))
    }
}

impl WaveformSource for CWavesOutput {
    fn load_waveforms(&self, version: u32) -> Result<Option<WaveformSet>> {
        let waveforms_path = versioned_path(&self.mean_waveforms, version);
        if !waveforms_path.is_file() {
            tracing::warn!(
                path = %waveforms_path.display(),
                version,
                "Mean waveforms not found; waveform metrics unavailable"
            );
            return Ok(None);
        }

        let mean: Array3<f64> = read_floats(&waveforms_path)?
            .into_dimensionality::<Ix3>()
            .map_err(|e| {
                CurationError::format(
                    &waveforms_path,
                    format!("expected clusters x channels x samples: {e}"),
                )
            })?;

        let snr_path = versioned_path(&self.snr, version);
        let snr: Option<Vec<f64>> = if snr_path.is_file() {
            let raw = read_floats(&snr_path)?;
            let column: Vec<f64> = match raw.ndim() {
                1 => raw.iter().copied().collect(),
                2 => raw
                    .outer_iter()
                    .map(|row| row.iter().next().copied().unwrap_or(f64::NAN))
                    .collect(),
                n => {
                    return Err(CurationError::format(
                        &snr_path,
                        format!("expected a 1-D or 2-D array, found {n} dimensions"),
                    ));
                }
            };
            Some(column)
        } else {
            tracing::warn!(path = %snr_path.display(), "Cluster SNR file not found");
            None
        };

        let mut units = BTreeMap::new();
        for (cluster, waveform) in mean.outer_iter().enumerate() {
            if waveform.iter().all(|v| *v == 0.0) {
                continue;
            }
            let snr = snr
                .as_ref()
                .and_then(|s| s.get(cluster).copied())
                .filter(|v| v.is_finite());
            units.insert(
                cluster as i64,
                WaveformSummary {
                    mean_waveform: waveform.to_owned(),
                    snr,
                    noise_std: None,
                },
            );
        }

        tracing::info!(
            path = %waveforms_path.display(),
            units = units.len(),
            "Loaded mean waveforms"
        );
        Ok(Some(WaveformSet { units }))
    }
}

/// Try each element type in turn; a dtype mismatch moves on to the next.
fn try_read<T: ReadableElement>(path: &Path) -> Result<Option<ArrayD<T>>> {
    match read_npy::<_, ArrayD<T>>(path) {
        Ok(array) => Ok(Some(array)),
        Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
        Err(ReadNpyError::Io(e)) => Err(CurationError::io(path, e)),
        Err(e) => Err(CurationError::format(path, format!("unreadable npy: {e}"))),
    }
}

/// Integer array of any width, flattened in logical order.
fn read_integers(path: &Path) -> Result<Vec<i64>> {
    if let Some(a) = try_read::<i64>(path)? {
        return Ok(a.iter().copied().collect());
    }
    if let Some(a) = try_read::<u64>(path)? {
        return a
            .iter()
            .map(|&v| {
                i64::try_from(v)
                    .map_err(|_| CurationError::format(path, format!("value {v} exceeds i64")))
            })
            .collect();
    }
    if let Some(a) = try_read::<i32>(path)? {
        return Ok(a.iter().map(|&v| i64::from(v)).collect());
    }
    if let Some(a) = try_read::<u32>(path)? {
        return Ok(a.iter().map(|&v| i64::from(v)).collect());
    }
    Err(CurationError::format(
        path,
        "expected an integer array (int64, uint64, int32 or uint32)",
    ))
}

/// Numeric array as f64, keeping its shape. Floats of either width are
/// preferred; integer arrays are widened.
fn read_floats(path: &Path) -> Result<ArrayD<f64>> {
    if let Some(a) = try_read::<f64>(path)? {
        return Ok(a);
    }
    if let Some(a) = try_read::<f32>(path)? {
        return Ok(a.mapv(f64::from));
    }
    if let Some(a) = try_read::<i64>(path)? {
        return Ok(a.mapv(|v| v as f64));
    }
    if let Some(a) = try_read::<i32>(path)? {
        return Ok(a.mapv(f64::from));
    }
    Err(CurationError::format(
        path,
        "expected a numeric array (float64, float32, int64 or int32)",
    ))
}
