//! Crash-safe file replacement.
//!
//! Uses the temp-file + fsync + rename pattern so a reader never sees a
//! half-written metric table or label file. The rename is atomic on POSIX
//! only with respect to the file itself; the read-modify-write cycle around
//! it is not.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::{CurationError, Result};

/// Write `contents` to `target` atomically. The parent directory must exist.
pub fn write_atomic(target: &Path, contents: &[u8]) -> Result<()> {
    let temp_path = temp_path_for(target)?;

    let mut file = std::fs::File::create(&temp_path).map_err(|e| CurationError::Io {
        path: temp_path.clone(),
        source: e,
    })?;

    file.write_all(contents).map_err(|e| CurationError::Io {
        path: temp_path.clone(),
        source: e,
    })?;

    file.sync_all().map_err(|e| CurationError::Io {
        path: temp_path.clone(),
        source: e,
    })?;

    std::fs::rename(&temp_path, target).map_err(|e| CurationError::Io {
        path: target.to_path_buf(),
        source: e,
    })?;

    Ok(())
}

fn temp_path_for(target: &Path) -> Result<PathBuf> {
    let name = target
        .file_name()
        .ok_or_else(|| CurationError::path(target, "target has no file name"))?;
    Ok(target.with_file_name(format!(".{}.tmp", name.to_string_lossy())))
}
