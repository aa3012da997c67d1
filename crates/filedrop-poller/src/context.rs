//! Per-file processing context and the environment it runs in.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use filedrop_config::ConfigSnapshot;
use filedrop_events::EventBus;
use filedrop_telemetry::Metrics;
use tracing::trace;
use uuid::Uuid;

use crate::error::{PollerResult, StateError, StateResult};
use crate::folder::{Folder, FolderRegistry};
use crate::handler::HandlerRegistry;
use crate::state::{ErrorState, FileState, StateKind, Transition};
use crate::statelog::{LOG_FILE_NAME, StateLogOptions, StateLogWriter};
use crate::transport::TriggerTransport;

/// Shared collaborators and roots used by every file.
pub struct PollerEnv {
    /// Root holding one processing folder per claimed file.
    pub processing_root: PathBuf,
    /// Root receiving processing folders of failed files.
    pub error_root: PathBuf,
    /// Optional root receiving files right before the trigger.
    pub app_processing_root: Option<PathBuf>,
    /// State log switches.
    pub log_options: StateLogOptions,
    /// Remote trigger endpoint.
    pub transport: Arc<dyn TriggerTransport>,
    /// Watched folders.
    pub folders: FolderRegistry,
    /// Domain events.
    pub events: EventBus,
    /// Metrics registry.
    pub metrics: Metrics,
}

impl fmt::Debug for PollerEnv {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PollerEnv")
            .field("processing_root", &self.processing_root)
            .field("error_root", &self.error_root)
            .field("app_processing_root", &self.app_processing_root)
            .field("log_options", &self.log_options)
            .field("folders", &self.folders)
            .finish_non_exhaustive()
    }
}

impl PollerEnv {
    /// Environment described by a configuration snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error when a folder cannot be built.
    pub fn from_snapshot(
        snapshot: &ConfigSnapshot,
        transport: Arc<dyn TriggerTransport>,
        handlers: &HandlerRegistry,
        events: EventBus,
        metrics: Metrics,
    ) -> PollerResult<Self> {
        let poller = &snapshot.poller;
        let folders = FolderRegistry::build(
            &snapshot.folders,
            poller.default_user_dn.as_deref(),
            handlers,
        )?;
        Ok(Self {
            processing_root: poller.processing_folder.clone(),
            error_root: poller.error_folder.clone(),
            app_processing_root: poller.app_processing_folder.clone(),
            log_options: StateLogOptions {
                enabled: poller.state_log_enabled,
            },
            transport,
            folders,
            events,
            metrics,
        })
    }
}

/// Everything known about one file while it moves through the state machine.
///
/// A context is owned by exactly one party at a time: the scanner while the
/// file is tracked, a worker while it is processed, or the retry queue while
/// it waits.
#[derive(Debug)]
pub struct FileContext {
    pub(crate) folder: Arc<Folder>,
    pub(crate) env: Arc<PollerEnv>,
    pub(crate) file_id: Option<String>,
    pub(crate) original_file: PathBuf,
    pub(crate) current_file: PathBuf,
    pub(crate) processing_folder: Option<PathBuf>,
    pub(crate) error_folder: Option<PathBuf>,
    pub(crate) in_app_processing: bool,
    pub(crate) file_size: u64,
    pub(crate) modified_millis: i64,
    pub(crate) last_stable_check: Option<Instant>,
    pub(crate) retry_count: u32,
    pub(crate) in_process: bool,
    pub(crate) current_state: Option<FileState>,
    log: Option<StateLogWriter>,
    started: Instant,
}

impl FileContext {
    /// Context for a file newly observed in an input folder.
    #[must_use]
    pub fn discovered(
        folder: Arc<Folder>,
        env: Arc<PollerEnv>,
        path: PathBuf,
        file_size: u64,
        modified_millis: i64,
    ) -> Self {
        let file_id = format!("{}-{}", folder.name, Uuid::new_v4().simple());
        let mut ctx = Self::empty(folder, env);
        ctx.file_id = Some(file_id);
        ctx.original_file.clone_from(&path);
        ctx.current_file = path;
        ctx.file_size = file_size;
        ctx.modified_millis = modified_millis;
        ctx.current_state = Some(StateKind::Tracking.create(None));
        ctx
    }

    /// Context for a leftover processing folder found at start-up.
    #[must_use]
    pub fn restored(folder: Arc<Folder>, env: Arc<PollerEnv>, processing_folder: PathBuf) -> Self {
        let mut ctx = Self::empty(folder, env);
        ctx.processing_folder = Some(processing_folder);
        ctx
    }

    fn empty(folder: Arc<Folder>, env: Arc<PollerEnv>) -> Self {
        Self {
            folder,
            env,
            file_id: None,
            original_file: PathBuf::new(),
            current_file: PathBuf::new(),
            processing_folder: None,
            error_folder: None,
            in_app_processing: false,
            file_size: 0,
            modified_millis: 0,
            last_stable_check: None,
            retry_count: 0,
            in_process: false,
            current_state: None,
            log: None,
            started: Instant::now(),
        }
    }

    /// Input folder.
    #[must_use]
    pub fn folder(&self) -> &Arc<Folder> {
        &self.folder
    }

    /// Stable file identifier, once assigned.
    #[must_use]
    pub fn file_id(&self) -> Option<&str> {
        self.file_id.as_deref()
    }

    /// Path of the file in its input folder.
    #[must_use]
    pub fn original_file(&self) -> &Path {
        &self.original_file
    }

    /// Where the file is right now.
    #[must_use]
    pub fn current_file(&self) -> &Path {
        &self.current_file
    }

    /// Processing folder, once created.
    #[must_use]
    pub fn processing_folder(&self) -> Option<&Path> {
        self.processing_folder.as_deref()
    }

    /// Location in the error root after the file failed.
    #[must_use]
    pub fn error_folder(&self) -> Option<&Path> {
        self.error_folder.as_deref()
    }

    /// Whether the file was moved to the app-processing root.
    #[must_use]
    pub const fn is_in_app_processing(&self) -> bool {
        self.in_app_processing
    }

    /// Size recorded by the last snapshot.
    #[must_use]
    pub const fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Number of retries already scheduled.
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Time since the context was created.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// Tag of the current state.
    #[must_use]
    pub fn current_kind(&self) -> Option<StateKind> {
        self.current_state.as_ref().map(FileState::kind)
    }

    /// Current state.
    #[must_use]
    pub fn current_state(&self) -> Option<&FileState> {
        self.current_state.as_ref()
    }

    /// Replace the current state.
    pub fn set_current_state(&mut self, state: FileState) {
        self.current_state = Some(state);
    }

    /// Assign the file identifier when the log did not record one.
    pub fn set_file_id_if_missing(&mut self, file_id: &str) {
        if self.file_id.is_none() {
            self.file_id = Some(file_id.to_string());
        }
    }

    /// Whether the machine reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.current_state.as_ref().is_some_and(FileState::is_finished)
    }

    /// Run the current state once.
    ///
    /// Returns `true` when the machine moved to another state and `false`
    /// when the state asked to be run again later.
    ///
    /// # Errors
    ///
    /// Returns the state's error; the state stays current so it can be retried.
    pub fn execute_current(&mut self) -> StateResult<bool> {
        let Some(mut state) = self.current_state.take() else {
            return Err(StateError::internal("context has no current state"));
        };

        match state.execute(self) {
            Ok(Transition::Stay) => {
                self.current_state = Some(state);
                Ok(false)
            }
            Ok(Transition::Next(kind)) => {
                trace!(file_id = ?self.file_id, from = state.kind().as_str(), to = kind.as_str(), "state transition");
                self.current_state = Some(kind.create(Some(Box::new(state))));
                Ok(true)
            }
            Ok(Transition::Adopt) => {
                if state.previous().is_none() {
                    self.current_state = Some(state);
                    return Err(StateError::internal("state has no predecessor to adopt"));
                }
                self.current_state = state.into_previous();
                trace!(file_id = ?self.file_id, to = ?self.current_kind(), "adopted logged state");
                Ok(true)
            }
            Err(err) => {
                self.current_state = Some(state);
                Err(err)
            }
        }
    }

    /// Create the processing folder `<processing-root>/<file-id>` when missing.
    ///
    /// # Errors
    ///
    /// Returns an INTERNAL error without a file id and a RETRY error when the
    /// folder cannot be created.
    pub fn ensure_processing_folder(&mut self) -> StateResult<PathBuf> {
        let folder = match &self.processing_folder {
            Some(folder) => folder.clone(),
            None => {
                let file_id = self
                    .file_id
                    .as_deref()
                    .ok_or_else(|| StateError::internal("file id is not set"))?;
                self.env.processing_root.join(file_id)
            }
        };
        fs::create_dir_all(&folder).map_err(|err| {
            StateError::retry(format!("cannot create processing folder {}", folder.display()))
                .with_source(err)
        })?;
        self.processing_folder = Some(folder.clone());
        Ok(folder)
    }

    /// State log path inside the processing folder.
    #[must_use]
    pub fn log_path(&self) -> Option<PathBuf> {
        self.processing_folder
            .as_ref()
            .map(|folder| folder.join(LOG_FILE_NAME))
    }

    /// Append a log entry for `kind`, opening the log on first use.
    ///
    /// # Errors
    ///
    /// Returns an INTERNAL error without a processing folder and an ABORT
    /// error when the log cannot be written.
    pub fn log_start(&mut self, kind: StateKind, payload: &[u8], finished: bool) -> StateResult<()> {
        if !self.env.log_options.enabled {
            return Ok(());
        }
        if self.log.is_none() {
            let path = self
                .log_path()
                .ok_or_else(|| StateError::internal("processing folder is not set"))?;
            self.log = Some(StateLogWriter::open(&path)?);
        }
        match self.log.as_mut() {
            Some(log) => log.start_entry(kind, payload, finished),
            None => Err(StateError::internal("state log is not open")),
        }
    }

    /// Stamp the finish time of the open log entry.
    ///
    /// # Errors
    ///
    /// Returns an INTERNAL error when no entry is open.
    pub fn log_finish(&mut self) -> StateResult<()> {
        if !self.env.log_options.enabled {
            return Ok(());
        }
        match self.log.as_mut() {
            Some(log) => log.finish_entry(),
            None => Err(StateError::internal("state log is not open")),
        }
    }

    /// Record that the machine reached `Finished`.
    ///
    /// # Errors
    ///
    /// Returns an ABORT error when the log cannot be written.
    pub fn log_finished(&mut self) -> StateResult<()> {
        self.log_start(StateKind::Finished, &[], true)
    }

    /// Close the state log if it is open.
    pub fn close_log(&mut self) {
        if let Some(log) = self.log.take() {
            log.close();
        }
    }

    /// Switch to the error state for `error`.
    pub fn enter_error_state(&mut self, error: &StateError) {
        self.close_log();
        self.current_state = Some(FileState::Error(ErrorState::new(error.detail())));
    }
}
