//! Error types for configuration operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File system operation failed.
    #[error("filesystem operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// A YAML document could not be parsed.
    #[error("invalid yaml configuration")]
    Yaml {
        /// Offending document.
        path: PathBuf,
        /// Source parse error.
        source: serde_yaml::Error,
    },
    /// A JSON document could not be parsed.
    #[error("invalid json configuration")]
    Json {
        /// Offending document.
        path: PathBuf,
        /// Source parse error.
        source: serde_json::Error,
    },
    /// The file extension does not name a supported format.
    #[error("unsupported configuration format")]
    UnsupportedFormat {
        /// Offending document.
        path: PathBuf,
    },
    /// Field contained an invalid value.
    #[error("invalid value for '{field}' in '{section}': {reason}")]
    InvalidField {
        /// Section that failed validation.
        section: String,
        /// Field that failed validation.
        field: &'static str,
        /// Offending value when available.
        value: Option<String>,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// Two folders normalise to the same name.
    #[error("duplicate folder name '{name}'")]
    DuplicateFolder {
        /// Normalised folder name.
        name: String,
    },
    /// A parameter refers to a folder that is not configured.
    #[error("unknown folder '{name}' referenced by '{section}'")]
    UnknownFolder {
        /// Section holding the reference.
        section: String,
        /// Normalised folder name that could not be resolved.
        name: String,
    },
}

impl ConfigError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(
        section: impl Into<String>,
        field: &'static str,
        value: Option<String>,
        reason: &'static str,
    ) -> Self {
        Self::InvalidField {
            section: section.into(),
            field,
            value,
            reason,
        }
    }
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
