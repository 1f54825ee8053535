//! Curation error types
//!
//! Per-cluster gaps (a metric that could not be computed for one unit) are not
//! errors: they travel as unavailable values plus a [`crate::builder::FieldGap`].
//! Everything here is fatal for the file or run it names.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Error category for structured logging and exit-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Required upstream file or directory is absent
    MissingInput,
    /// Label or metric file does not have the expected layout
    Format,
    /// Unexpected directory state during version resolution
    Path,
    /// `spikeqc.toml` or env misconfigured
    Config,
    /// Other filesystem failures
    Io,
    /// Unexpected logic bugs
    Internal,
}

impl ErrorCategory {
    /// Machine-readable code for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingInput => "MISSING_INPUT",
            Self::Format => "FORMAT",
            Self::Path => "PATH",
            Self::Config => "CONFIG",
            Self::Io => "IO",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether the pipeline reports this as "not available" instead of failing
    pub fn is_not_available(&self) -> bool {
        matches!(self, Self::MissingInput)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Curation error with category and context
#[derive(Debug, Error)]
pub enum CurationError {
    #[error("missing input {path}: {message}")]
    MissingInput { path: PathBuf, message: String },

    #[error("format error in {path}: {message}")]
    Format { path: PathBuf, message: String },

    #[error("path error at {path}: {message}")]
    Path { path: PathBuf, message: String },

    #[error("config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl CurationError {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingInput { .. } => ErrorCategory::MissingInput,
            Self::Format { .. } => ErrorCategory::Format,
            Self::Path { .. } => ErrorCategory::Path,
            Self::Config { .. } => ErrorCategory::Config,
            Self::Io { .. } => ErrorCategory::Io,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Create a missing-input error
    pub fn missing_input(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::MissingInput {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Create a format error
    pub fn format(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Create a path error
    pub fn path(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Path {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Wrap an I/O error with the path it happened on.
    ///
    /// `NotFound` is promoted to [`CurationError::MissingInput`] so readers of
    /// upstream files surface the right category without checking first.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::MissingInput {
                path,
                message: source.to_string(),
            };
        }
        Self::Io { path, source }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type for curation operations
pub type Result<T> = std::result::Result<T, CurationError>;
