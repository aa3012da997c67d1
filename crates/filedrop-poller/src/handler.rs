//! Error handlers invoked once a file has been parked in the error folder.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use filedrop_events::{Event, EventBus};
use filedrop_telemetry::Metrics;
use tracing::{error, warn};

use crate::error::{PollerError, PollerResult, StateError};

/// Name of the handler used when a folder does not configure one.
pub const DEFAULT_HANDLER: &str = "default";

/// Everything a handler needs to report a failed file.
#[derive(Debug, Clone, Copy)]
pub struct FailureReport<'a> {
    /// Stable file identifier.
    pub file_id: &'a str,
    /// Normalised folder name.
    pub folder: &'a str,
    /// Path of the file in its input folder.
    pub original_file: &'a Path,
    /// Processing folder after it was moved into the error root.
    pub error_location: Option<&'a Path>,
    /// Failure that ended processing.
    pub error: &'a StateError,
    /// Domain event bus.
    pub events: &'a EventBus,
    /// Metrics registry.
    pub metrics: &'a Metrics,
}

/// Reacts to a file that could not be processed.
pub trait FileErrorHandler: Send + Sync {
    /// Registry name.
    fn name(&self) -> &'static str;

    /// Report the failure. Handlers must not fail.
    fn handle(&self, report: &FailureReport<'_>);
}

/// Raises an alert: error log, alert counter and a `file_failed` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlertErrorHandler;

impl FileErrorHandler for AlertErrorHandler {
    fn name(&self) -> &'static str {
        DEFAULT_HANDLER
    }

    fn handle(&self, report: &FailureReport<'_>) {
        error!(
            file_id = report.file_id,
            folder = report.folder,
            original = %report.original_file.display(),
            error_location = ?report.error_location,
            kind = report.error.kind().as_str(),
            error = %report.error.detail(),
            "file processing failed"
        );
        report.metrics.inc_file_alert();
        report.events.publish(Event::FileFailed {
            file_id: report.file_id.to_string(),
            folder: report.folder.to_string(),
            message: report.error.detail(),
        });
    }
}

/// Logs the failure without raising an alert.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorHandler;

impl FileErrorHandler for LogErrorHandler {
    fn name(&self) -> &'static str {
        "log"
    }

    fn handle(&self, report: &FailureReport<'_>) {
        warn!(
            file_id = report.file_id,
            folder = report.folder,
            original = %report.original_file.display(),
            error = %report.error.detail(),
            "file moved to error folder"
        );
    }
}

/// Named error handlers available to folder definitions.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn FileErrorHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        formatter
            .debug_struct("HandlerRegistry")
            .field("handlers", &names)
            .finish()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl HandlerRegistry {
    /// Registry holding the alert and log handlers.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        registry.register(Arc::new(AlertErrorHandler));
        registry.register(Arc::new(LogErrorHandler));
        registry
    }

    /// Add or replace a handler under its own name.
    pub fn register(&mut self, handler: Arc<dyn FileErrorHandler>) {
        self.handlers.insert(handler.name(), handler);
    }

    /// Handler for a folder. `None` selects [`DEFAULT_HANDLER`].
    ///
    /// # Errors
    ///
    /// Returns an error when the requested handler is not registered.
    pub fn resolve(
        &self,
        folder: &str,
        name: Option<&str>,
    ) -> PollerResult<Arc<dyn FileErrorHandler>> {
        let name = name.unwrap_or(DEFAULT_HANDLER);
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| PollerError::UnknownErrorHandler {
                folder: folder.to_string(),
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_handler_publishes_failure() -> anyhow::Result<()> {
        let events = EventBus::new();
        let metrics = Metrics::new()?;
        let error = StateError::abort("boom");
        let handler = HandlerRegistry::with_defaults().resolve("IN", None)?;
        handler.handle(&FailureReport {
            file_id: "IN-1",
            folder: "IN",
            original_file: Path::new("/in/a.txt"),
            error_location: None,
            error: &error,
            events: &events,
            metrics: &metrics,
        });

        assert_eq!(metrics.snapshot().file_alerts_total, 1);
        let recent = events.recent();
        assert_eq!(recent.len(), 1);
        assert!(matches!(
            &recent[0].event,
            Event::FileFailed { file_id, .. } if file_id == "IN-1"
        ));
        Ok(())
    }

    #[test]
    fn log_handler_does_not_alert() -> anyhow::Result<()> {
        let events = EventBus::new();
        let metrics = Metrics::new()?;
        let error = StateError::abort("boom");
        let handler = HandlerRegistry::with_defaults().resolve("IN", Some("log"))?;
        handler.handle(&FailureReport {
            file_id: "IN-1",
            folder: "IN",
            original_file: Path::new("/in/a.txt"),
            error_location: None,
            error: &error,
            events: &events,
            metrics: &metrics,
        });
        assert_eq!(metrics.snapshot().file_alerts_total, 0);
        assert!(events.recent().is_empty());
        Ok(())
    }

    #[test]
    fn unknown_handler_is_rejected() {
        let err = HandlerRegistry::with_defaults().resolve("IN", Some("pager"));
        assert!(matches!(
            err,
            Err(PollerError::UnknownErrorHandler { name, .. }) if name == "pager"
        ));
    }
}
