//! Fixtures shared by the unit tests.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use filedrop_config::{FolderSpec, ParameterSource, ParameterSpec, TriggerSpec};
use filedrop_events::EventBus;
use filedrop_telemetry::Metrics;
use tempfile::TempDir;

use crate::context::{FileContext, PollerEnv};
use crate::folder::FolderRegistry;
use crate::handler::HandlerRegistry;
use crate::statelog::StateLogOptions;
use crate::transport::{TransportError, TriggerRequest, TriggerTransport};

/// Transport answering from a script; succeeds once the script runs out.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<(), TransportError>>>,
    requests: Mutex<Vec<TriggerRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn push(&self, response: Result<(), TransportError>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
    }

    pub(crate) fn requests(&self) -> Vec<TriggerRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TriggerTransport for ScriptedTransport {
    fn submit(&self, request: &TriggerRequest) -> Result<(), TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(Ok(()))
    }
}

/// Temporary roots plus one input folder called `inbox`.
pub(crate) struct Fixture {
    _temp: TempDir,
    pub(crate) input: PathBuf,
    pub(crate) processing: PathBuf,
    pub(crate) errors: PathBuf,
    pub(crate) app: PathBuf,
    pub(crate) transport: Arc<ScriptedTransport>,
    pub(crate) events: EventBus,
    pub(crate) metrics: Metrics,
}

impl Fixture {
    pub(crate) fn new() -> anyhow::Result<Self> {
        let temp = TempDir::new()?;
        let root = temp.path().to_path_buf();
        let fixture = Self {
            input: root.join("inbox"),
            processing: root.join("processing"),
            errors: root.join("errors"),
            app: root.join("app"),
            _temp: temp,
            transport: Arc::new(ScriptedTransport::default()),
            events: EventBus::new(),
            metrics: Metrics::new()?,
        };
        for dir in [&fixture.input, &fixture.processing, &fixture.errors, &fixture.app] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(fixture)
    }

    /// Folder `inbox` with no stability window and a filename parameter.
    pub(crate) fn folder(&self, move_file: bool, can_retry: bool) -> FolderSpec {
        FolderSpec {
            name: "inbox".into(),
            location: self.input.clone(),
            track_time: 0.0,
            filter: None,
            error_handler: None,
            trigger: TriggerSpec {
                method: "ingest".into(),
                namespace: "files".into(),
                organization: None,
                user: None,
                move_file,
                can_retry,
                parameters: vec![ParameterSpec {
                    name: "name".into(),
                    value: None,
                    source: Some(ParameterSource::Filename),
                    folder: None,
                }],
            },
        }
    }

    pub(crate) fn env(&self, folders: &[FolderSpec]) -> anyhow::Result<Arc<PollerEnv>> {
        Ok(Arc::new(self.build_env(folders)?))
    }

    pub(crate) fn build_env(&self, folders: &[FolderSpec]) -> anyhow::Result<PollerEnv> {
        let transport: Arc<dyn TriggerTransport> = self.transport.clone();
        Ok(PollerEnv {
            processing_root: self.processing.clone(),
            error_root: self.errors.clone(),
            app_processing_root: Some(self.app.clone()),
            log_options: StateLogOptions::default(),
            transport,
            folders: FolderRegistry::build(folders, Some("cn=poller"), &HandlerRegistry::with_defaults())?,
            events: self.events.clone(),
            metrics: self.metrics.clone(),
        })
    }

    /// Write `name` into the input folder and return a fresh context for it.
    pub(crate) fn discover(&self, env: &Arc<PollerEnv>, name: &str, body: &str) -> anyhow::Result<FileContext> {
        let path = self.input.join(name);
        std::fs::write(&path, body)?;
        let (size, modified) = crate::fsutil::snapshot(&path)?;
        let folder = env
            .folders
            .iter()
            .next()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("fixture has no folder"))?;
        Ok(FileContext::discovered(folder, Arc::clone(env), path, size, modified))
    }
}

/// Execute states until the machine finishes, stays, or fails.
pub(crate) fn drive(ctx: &mut FileContext) -> crate::error::StateResult<()> {
    while !ctx.is_finished() {
        if !ctx.execute_current()? {
            break;
        }
    }
    Ok(())
}
