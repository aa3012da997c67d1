//! # Design
//!
//! - Centralize daemon errors raised while wiring and running the poller.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Environment configuration was missing.
    #[error("missing environment configuration")]
    MissingEnv {
        /// Name of the missing environment variable.
        name: &'static str,
    },
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: filedrop_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: filedrop_telemetry::TelemetryError,
    },
    /// Poller wiring or execution failed.
    #[error("poller operation failed")]
    Poller {
        /// Operation identifier.
        operation: &'static str,
        /// Source poller error.
        source: filedrop_poller::PollerError,
    },
    /// HTTP client operations failed.
    #[error("http operation failed")]
    Http {
        /// Operation identifier.
        operation: &'static str,
        /// URL used for the request.
        url: String,
        /// Source HTTP client error.
        source: reqwest::Error,
    },
    /// No tokio runtime was available.
    #[error("tokio runtime unavailable")]
    Runtime {
        /// Operation identifier.
        operation: &'static str,
        /// Source runtime lookup error.
        source: tokio::runtime::TryCurrentError,
    },
    /// A background task panicked or was cancelled.
    #[error("background task failed")]
    Join {
        /// Task identifier.
        operation: &'static str,
        /// Source join error.
        source: tokio::task::JoinError,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: filedrop_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: filedrop_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn poller(operation: &'static str, source: filedrop_poller::PollerError) -> Self {
        Self::Poller { operation, source }
    }

    pub(crate) const fn http(operation: &'static str, url: String, source: reqwest::Error) -> Self {
        Self::Http {
            operation,
            url,
            source,
        }
    }
}
