//! Cluster label files and their pre-reclassification history.
//!
//! A label file is a two-column tab-separated table, `cluster_id` and the
//! sorter's label column (`KSLabel` for Kilosort, `group` once curated).
//! Before labels are overwritten the previous file is copied byte for byte
//! to `<stem>_original<ext>` next to it.

use std::io::Read;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};

use crate::classify::ClusterLabel;
use crate::config::HistoryPolicy;
use crate::errors::{CurationError, Result};
use crate::persist::write_atomic;
use crate::table::{CLUSTER_ID, parse_cluster_id};
use crate::versioning::{latest, resolve, tagged_path};

/// Label column written when none is known
pub const DEFAULT_LABEL_COLUMN: &str = "KSLabel";

/// Tag inserted before the extension of the history snapshot
pub const HISTORY_TAG: &str = "_original";

/// Ordered cluster → label mapping, in label-file order.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelAssignment {
    key_column: String,
    label_column: String,
    entries: Vec<(i64, ClusterLabel)>,
}

impl LabelAssignment {
    pub fn new(label_column: impl Into<String>, entries: Vec<(i64, ClusterLabel)>) -> Self {
        Self {
            key_column: CLUSTER_ID.to_string(),
            label_column: label_column.into(),
            entries,
        }
    }

    /// Pair ids with labels; both slices must be the same length.
    pub fn from_parts(
        label_column: impl Into<String>,
        cluster_ids: &[i64],
        labels: &[ClusterLabel],
    ) -> Result<Self> {
        if cluster_ids.len() != labels.len() {
            return Err(CurationError::internal(format!(
                "{} cluster ids but {} labels",
                cluster_ids.len(),
                labels.len()
            )));
        }
        Ok(Self::new(
            label_column,
            cluster_ids.iter().copied().zip(labels.iter().cloned()).collect(),
        ))
    }

    pub fn label_column(&self) -> &str {
        &self.label_column
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &ClusterLabel)> {
        self.entries.iter().map(|(id, label)| (*id, label))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&i64, &mut ClusterLabel)> {
        self.entries.iter_mut().map(|(id, label)| (&*id, label))
    }

    pub fn get(&self, cluster_id: i64) -> Option<&ClusterLabel> {
        self.entries
            .iter()
            .find(|(id, _)| *id == cluster_id)
            .map(|(_, label)| label)
    }

    pub fn cluster_ids(&self) -> Vec<i64> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    /// Read a label file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| CurationError::io(path, e))?;
        Self::from_reader(file, path)
    }

    pub fn from_reader<R: Read>(reader: R, origin: &Path) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);

        let headers = reader
            .headers()
            .map_err(|e| CurationError::format(origin, format!("unreadable header: {e}")))?
            .clone();
        if headers.len() != 2 {
            return Err(CurationError::format(
                origin,
                format!(
                    "expected two tab-separated columns (cluster_id, label), found {}",
                    headers.len()
                ),
            ));
        }

        let mut entries = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| {
                CurationError::format(
                    origin,
                    format!("row {}: expected two tab-separated columns: {e}", line + 1),
                )
            })?;
            let raw_id = record.get(0).unwrap_or_default();
            let cluster_id = parse_cluster_id(raw_id).ok_or_else(|| {
                CurationError::format(
                    origin,
                    format!("row {}: cluster id `{raw_id}` is not an integer", line + 1),
                )
            })?;
            entries.push((cluster_id, ClusterLabel::parse(record.get(1).unwrap_or_default())));
        }

        Ok(Self {
            key_column: headers.get(0).unwrap_or(CLUSTER_ID).trim().to_string(),
            label_column: headers.get(1).unwrap_or(DEFAULT_LABEL_COLUMN).trim().to_string(),
            entries,
        })
    }

    pub fn to_tsv_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(Vec::new());
        let to_internal = |e: csv::Error| CurationError::internal(format!("tsv encode: {e}"));

        writer
            .write_record([self.key_column.as_str(), self.label_column.as_str()])
            .map_err(to_internal)?;
        for (cluster_id, label) in &self.entries {
            writer
                .write_record([cluster_id.to_string().as_str(), label.as_str()])
                .map_err(to_internal)?;
        }
        writer
            .into_inner()
            .map_err(|e| CurationError::internal(format!("tsv flush: {e}")))
    }

    /// Replace the file at `path` with this assignment.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.to_tsv_bytes()?)?;
        tracing::info!(path = %path.display(), clusters = self.len(), "Wrote cluster labels");
        Ok(())
    }
}

/// Write `labels` for `cluster_ids` to `path`, in the given order.
pub fn save(
    cluster_ids: &[i64],
    labels: &[ClusterLabel],
    label_column: &str,
    path: &Path,
) -> Result<()> {
    LabelAssignment::from_parts(label_column, cluster_ids, labels)?.save(path)
}

/// Preserve the current content of `label_path` before it is overwritten.
///
/// Returns the snapshot that now holds the pre-save content, or `None` when
/// there is no label file yet.
pub fn snapshot_history(label_path: &Path, policy: HistoryPolicy) -> Result<Option<PathBuf>> {
    if !label_path.exists() {
        return Ok(None);
    }
    let current = std::fs::read(label_path).map_err(|e| CurationError::io(label_path, e))?;
    let snapshot = tagged_path(label_path, HISTORY_TAG);

    let target = match policy {
        HistoryPolicy::WriteOnce if snapshot.exists() => {
            tracing::debug!(
                snapshot = %snapshot.display(),
                "Label history already recorded; leaving it in place"
            );
            return Ok(Some(snapshot));
        }
        HistoryPolicy::WriteOnce | HistoryPolicy::Overwrite => snapshot,
        HistoryPolicy::Versioned => match latest(&snapshot)? {
            Some(newest) => {
                let previous =
                    std::fs::read(&newest.path).map_err(|e| CurationError::io(&newest.path, e))?;
                if previous == current {
                    return Ok(Some(newest.path));
                }
                resolve(&snapshot)?.path
            }
            None => snapshot,
        },
    };

    write_atomic(&target, &current)?;
    tracing::info!(
        source = %label_path.display(),
        snapshot = %target.display(),
        "Recorded label history"
    );
    Ok(Some(target))
}
