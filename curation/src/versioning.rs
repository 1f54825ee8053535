//! Versioned output paths.
//!
//! Version 0 of an artifact is the canonical path itself (`metrics.csv`);
//! version n > 0 carries an `_n` suffix before the extension
//! (`metrics_1.csv`). Resolution only looks at the filesystem, it never
//! creates, renames or removes anything. The numbering is a single-writer
//! convention: two processes resolving the same canonical path concurrently
//! can be handed the same version.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::errors::{CurationError, Result};

/// A concrete path for one version of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionedPath {
    pub path: PathBuf,
    pub version: u32,
}

impl VersionedPath {
    /// The same version of a different canonical artifact, e.g. the
    /// waveform-metrics table that belongs to metrics version n.
    pub fn sibling(&self, canonical: &Path) -> VersionedPath {
        VersionedPath {
            path: versioned_path(canonical, self.version),
            version: self.version,
        }
    }
}

/// Insert `tag` between the file stem and the extension.
///
/// `tagged_path("out/cluster_KSLabel.tsv", "_original")` is
/// `out/cluster_KSLabel_original.tsv`.
pub fn tagged_path(path: &Path, tag: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}{tag}.{}", ext.to_string_lossy()),
        None => format!("{stem}{tag}"),
    };
    path.with_file_name(name)
}

/// Path of `version` for a canonical artifact path. Pure path construction.
pub fn versioned_path(canonical: &Path, version: u32) -> PathBuf {
    if version == 0 {
        return canonical.to_path_buf();
    }
    tagged_path(canonical, &format!("_{version}"))
}

/// Resolve the path the next run should write for `canonical`.
///
/// - nothing on disk: `(canonical, 0)`
/// - only the canonical file: `(stem_1.ext, 1)`
/// - `stem_1 … stem_k` present: `(stem_{k+1}.ext, k + 1)`
///
/// Suffixed versions are scanned contiguously from 1.
pub fn resolve(canonical: &Path) -> Result<VersionedPath> {
    ensure_parent(canonical)?;

    let highest = highest_suffixed(canonical);
    let version = if highest > 0 {
        highest + 1
    } else if canonical.exists() {
        1
    } else {
        0
    };

    let resolved = VersionedPath {
        path: versioned_path(canonical, version),
        version,
    };
    tracing::debug!(
        canonical = %canonical.display(),
        resolved = %resolved.path.display(),
        version,
        "Resolved output version"
    );
    Ok(resolved)
}

/// Newest version of `canonical` that exists on disk, if any.
pub fn latest(canonical: &Path) -> Result<Option<VersionedPath>> {
    ensure_parent(canonical)?;

    let highest = highest_suffixed(canonical);
    if highest > 0 {
        return Ok(Some(VersionedPath {
            path: versioned_path(canonical, highest),
            version: highest,
        }));
    }
    if canonical.exists() {
        return Ok(Some(VersionedPath {
            path: canonical.to_path_buf(),
            version: 0,
        }));
    }
    Ok(None)
}

fn highest_suffixed(canonical: &Path) -> u32 {
    let mut version = 0;
    while versioned_path(canonical, version + 1).exists() {
        version += 1;
    }
    version
}

fn ensure_parent(canonical: &Path) -> Result<()> {
    if canonical.file_name().is_none() {
        return Err(CurationError::path(
            canonical,
            "canonical path has no file name",
        ));
    }
    match canonical.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => Err(
            CurationError::path(parent, "parent directory does not exist"),
        ),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        std::fs::write(path, b"cluster_id\n").expect("write fixture");
    }

    #[test]
    fn missing_canonical_resolves_to_version_zero() {
        let dir = TempDir::new().expect("tempdir");
        let canonical = dir.path().join("metrics.csv");

        let resolved = resolve(&canonical).expect("resolve");
        assert_eq!(
            resolved,
            VersionedPath {
                path: canonical,
                version: 0
            }
        );
    }

    #[test]
    fn existing_canonical_resolves_to_first_suffix() {
        let dir = TempDir::new().expect("tempdir");
        let canonical = dir.path().join("metrics.csv");
        touch(&canonical);

        let resolved = resolve(&canonical).expect("resolve");
        assert_eq!(resolved.version, 1);
        assert_eq!(resolved.path, dir.path().join("metrics_1.csv"));
        assert!(canonical.exists(), "version 0 must be left in place");
    }

    #[test]
    fn suffixed_versions_continue_the_sequence() {
        let dir = TempDir::new().expect("tempdir");
        let canonical = dir.path().join("metrics.csv");
        touch(&canonical);
        touch(&dir.path().join("metrics_1.csv"));
        touch(&dir.path().join("metrics_2.csv"));

        let resolved = resolve(&canonical).expect("resolve");
        assert_eq!(resolved.version, 3);
        assert_eq!(resolved.path, dir.path().join("metrics_3.csv"));
    }

    #[test]
    fn suffix_scan_stops_at_first_hole() {
        let dir = TempDir::new().expect("tempdir");
        let canonical = dir.path().join("metrics.csv");
        touch(&dir.path().join("metrics_1.csv"));
        touch(&dir.path().join("metrics_3.csv"));

        let resolved = resolve(&canonical).expect("resolve");
        assert_eq!(resolved.version, 2);
    }

    #[test]
    fn missing_parent_is_path_error() {
        let dir = TempDir::new().expect("tempdir");
        let canonical = dir.path().join("no_such_dir").join("metrics.csv");

        let err = resolve(&canonical).unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::Path);
        assert!(!dir.path().join("no_such_dir").exists());
    }

    #[test]
    fn relative_path_without_parent_resolves() {
        let resolved = resolve(Path::new("spikeqc_no_such_metrics_file.csv")).expect("resolve");
        assert_eq!(resolved.version, 0);
    }

    #[test]
    fn repeated_runs_produce_gapless_versions() {
        let dir = TempDir::new().expect("tempdir");
        let canonical = dir.path().join("metrics.csv");

        let versions: Vec<u32> = (0..5)
            .map(|_| {
                let resolved = resolve(&canonical).expect("resolve");
                touch(&resolved.path);
                resolved.version
            })
            .collect();
        assert_eq!(versions, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn latest_tracks_newest_existing_version() {
        let dir = TempDir::new().expect("tempdir");
        let canonical = dir.path().join("waveform_metrics.csv");
        assert_eq!(latest(&canonical).expect("latest"), None);

        touch(&canonical);
        assert_eq!(latest(&canonical).expect("latest").map(|v| v.version), Some(0));

        touch(&dir.path().join("waveform_metrics_1.csv"));
        let newest = latest(&canonical).expect("latest").expect("some version");
        assert_eq!(newest.version, 1);
        assert_eq!(newest.path, dir.path().join("waveform_metrics_1.csv"));
    }

    #[test]
    fn sibling_keeps_version_number() {
        let metrics = VersionedPath {
            path: PathBuf::from("/run/metrics_2.csv"),
            version: 2,
        };
        let sibling = metrics.sibling(Path::new("/run/waveform_metrics.csv"));
        assert_eq!(sibling.path, PathBuf::from("/run/waveform_metrics_2.csv"));

        let zero = VersionedPath {
            path: PathBuf::from("/run/metrics.csv"),
            version: 0,
        };
        assert_eq!(
            zero.sibling(Path::new("/run/waveform_metrics.csv")).path,
            PathBuf::from("/run/waveform_metrics.csv")
        );
    }

    #[test]
    fn tagged_path_handles_missing_extension() {
        assert_eq!(
            tagged_path(Path::new("out/labels"), "_original"),
            PathBuf::from("out/labels_original")
        );
        assert_eq!(
            tagged_path(Path::new("out/cluster_KSLabel.tsv"), "_original"),
            PathBuf::from("out/cluster_KSLabel_original.tsv")
        );
    }
}
