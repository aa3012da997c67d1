//! # Design
//!
//! - `StateError` carries the failure kind that decides recovery: retry, block, or park.
//! - `PollerError` covers start-up and wiring failures with constant messages and context fields.
//! - Source errors are preserved rather than interpolated.

use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::lockfile::LockError;

/// How a failed state transition is recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unrecoverable for this attempt chain. The file is parked in the error folder.
    Abort,
    /// An invariant was violated. Handled like `Abort` and flagged for diagnosis.
    Internal,
    /// Transient failure. The file is rescheduled after a delay.
    Retry,
    /// Transient failure that also holds back new files from the same folder.
    RetryBlockInput,
}

impl ErrorKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Internal => "internal",
            Self::Retry => "retry",
            Self::RetryBlockInput => "retry_block_input",
        }
    }

    /// Whether the scheduler may try the file again.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Retry | Self::RetryBlockInput)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal => formatter.write_str("internal error"),
            other => formatter.write_str(other.as_str()),
        }
    }
}

/// Failure raised by a state transition.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct StateError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

/// Result alias for state transitions.
pub type StateResult<T> = Result<T, StateError>;

impl StateError {
    /// Build an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Unrecoverable failure.
    pub fn abort(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Abort, message)
    }

    /// Violated invariant.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Transient failure.
    pub fn retry(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Retry, message)
    }

    /// Transient failure that blocks the input folder.
    pub fn retry_block_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RetryBlockInput, message)
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Failure kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Message without the cause chain.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Message followed by every cause, one per line.
    #[must_use]
    pub fn detail(&self) -> String {
        let mut detail = self.to_string();
        let mut cause = StdError::source(self);
        while let Some(err) = cause {
            detail.push_str("\ncaused by: ");
            detail.push_str(&err.to_string());
            cause = err.source();
        }
        detail
    }
}

/// Result alias for poller wiring.
pub type PollerResult<T> = Result<T, PollerError>;

/// Errors raised while building or running the poller.
#[derive(Debug, Error)]
pub enum PollerError {
    /// IO failure outside of a file's state machine.
    #[error("poller io failure")]
    Io {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Folder lock could not be taken.
    #[error("poller lock failure")]
    Lock {
        /// Underlying lock error.
        source: LockError,
    },
    /// A folder definition is unusable.
    #[error("invalid folder definition")]
    InvalidFolder {
        /// Normalised folder name.
        folder: String,
        /// Field that failed.
        field: &'static str,
        /// Static reason.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// A folder names an error handler that is not registered.
    #[error("unknown error handler")]
    UnknownErrorHandler {
        /// Normalised folder name.
        folder: String,
        /// Requested handler name.
        name: String,
    },
    /// Glob filter did not compile.
    #[error("invalid glob filter")]
    Glob {
        /// Pattern text.
        pattern: String,
        /// Underlying globset error.
        source: globset::Error,
    },
    /// Regex filter did not compile.
    #[error("invalid regex filter")]
    Regex {
        /// Pattern text.
        pattern: String,
        /// Underlying regex error.
        source: regex::Error,
    },
    /// Worker limits were rejected.
    #[error("invalid worker limits")]
    PoolLimits {
        /// Underlying validation error.
        source: filedrop_config::ConfigError,
    },
    /// No tokio runtime was available.
    #[error("poller requires a tokio runtime")]
    Runtime {
        /// Underlying runtime lookup error.
        source: tokio::runtime::TryCurrentError,
    },
    /// A background task panicked or was cancelled.
    #[error("poller task failed")]
    Join {
        /// Operation that awaited the task.
        operation: &'static str,
        /// Underlying join error.
        source: tokio::task::JoinError,
    },
}

impl PollerError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}
