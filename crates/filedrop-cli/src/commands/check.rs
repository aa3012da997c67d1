//! `check`: load a poller configuration and resolve its folders.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::anyhow;
use filedrop_config::{ConfigSnapshot, FilterKind, load_config};
use filedrop_poller::{FolderRegistry, HandlerRegistry};
use serde::Serialize;

use crate::cli::{CheckArgs, OutputFormat};
use crate::error::{CliError, CliResult};

#[derive(Debug, Serialize)]
struct CheckReport {
    source: PathBuf,
    enabled: bool,
    processing_folder: PathBuf,
    error_folder: PathBuf,
    app_processing_folder: Option<PathBuf>,
    poll_interval: f64,
    min_workers: usize,
    max_workers: usize,
    retry_delays: Vec<f64>,
    folders: Vec<FolderSummary>,
}

#[derive(Debug, Serialize)]
struct FolderSummary {
    name: String,
    location: PathBuf,
    filter: Option<String>,
    method: String,
    namespace: String,
    move_file: bool,
    can_retry: bool,
    error_handler: String,
}

impl CheckReport {
    fn from_snapshot(snapshot: &ConfigSnapshot) -> Self {
        let poller = &snapshot.poller;
        Self {
            source: snapshot.source.clone(),
            enabled: poller.enabled,
            processing_folder: poller.processing_folder.clone(),
            error_folder: poller.error_folder.clone(),
            app_processing_folder: poller.app_processing_folder.clone(),
            poll_interval: poller.poll_interval,
            min_workers: poller.min_concurrent_workers,
            max_workers: poller.max_concurrent_workers,
            retry_delays: poller.retry_delays.clone(),
            folders: snapshot
                .folders
                .iter()
                .map(|spec| FolderSummary {
                    name: spec.name.clone(),
                    location: spec.location.clone(),
                    filter: spec.filter.as_ref().map(|filter| match filter.kind {
                        FilterKind::Glob => format!("glob:{}", filter.pattern),
                        FilterKind::Regex => format!("regex:{}", filter.pattern),
                    }),
                    method: spec.trigger.method.clone(),
                    namespace: spec.trigger.namespace.clone(),
                    move_file: spec.trigger.move_file,
                    can_retry: spec.trigger.can_retry,
                    error_handler: spec
                        .error_handler
                        .clone()
                        .unwrap_or_else(|| "default".to_string()),
                })
                .collect(),
        }
    }
}

/// Load the document, then build the folder registry so filters, parameters
/// and handler names are checked exactly as the daemon would. Missing input
/// folders are created on the way.
pub(crate) fn handle_check(args: &CheckArgs, format: OutputFormat) -> CliResult<String> {
    let snapshot = load_config(&args.config).map_err(|err| {
        CliError::validation(format!("invalid configuration: {:#}", anyhow::Error::new(err)))
    })?;
    FolderRegistry::build(
        &snapshot.folders,
        snapshot.poller.default_user_dn.as_deref(),
        &HandlerRegistry::with_defaults(),
    )
    .map_err(|err| CliError::validation(format!("invalid folder: {:#}", anyhow::Error::new(err))))?;

    render(&CheckReport::from_snapshot(&snapshot), format)
}

fn render(report: &CheckReport, format: OutputFormat) -> CliResult<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(report)
            .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}"))),
        OutputFormat::Table => Ok(render_table(report)),
    }
}

fn render_table(report: &CheckReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "source: {}", report.source.display());
    let _ = writeln!(out, "enabled: {}", report.enabled);
    let _ = writeln!(out, "processing: {}", report.processing_folder.display());
    let _ = writeln!(out, "errors: {}", report.error_folder.display());
    if let Some(app) = &report.app_processing_folder {
        let _ = writeln!(out, "app processing: {}", app.display());
    }
    let _ = writeln!(
        out,
        "workers: {}..={}  poll: {}s  retries: {}",
        report.min_workers,
        report.max_workers,
        report.poll_interval,
        report.retry_delays.len()
    );
    let _ = writeln!(out, "{:<16} {:<10} {:<16} LOCATION", "FOLDER", "FLAGS", "METHOD");
    for folder in &report.folders {
        let flags = match (folder.move_file, folder.can_retry) {
            (true, true) => "move,retry",
            (true, false) => "move",
            (false, true) => "retry",
            (false, false) => "-",
        };
        let _ = writeln!(
            out,
            "{:<16} {:<10} {:<16} {}",
            folder.name,
            flags,
            folder.method,
            folder.location.display()
        );
    }
    out
}
