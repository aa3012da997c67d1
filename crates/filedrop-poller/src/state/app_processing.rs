use std::io;
use std::path::PathBuf;

use tracing::debug;

use super::move_to_processing::dump_paths;
use super::{FileState, StateKind, Transition};
use crate::context::FileContext;
use crate::dump::LogDump;
use crate::error::{StateError, StateResult};
use crate::fsutil;
use crate::statelog::{get_path, put_path};

/// Moves the file to `<app-root>/<file-id><.ext>` before the trigger is sent.
#[derive(Debug, Default)]
pub struct MoveToAppProcessing {
    pub(super) source: Option<PathBuf>,
    pub(super) destination: Option<PathBuf>,
    pub(super) previous: Option<Box<FileState>>,
}

impl MoveToAppProcessing {
    pub(crate) fn execute(&mut self, ctx: &mut FileContext) -> StateResult<Transition> {
        let Some(app_root) = ctx.env.app_processing_root.clone() else {
            return Err(StateError::abort("no app-processing folder is configured"));
        };
        let file_id = ctx
            .file_id
            .clone()
            .ok_or_else(|| StateError::internal("file id is not set"))?;
        let source = self
            .source
            .clone()
            .unwrap_or_else(|| ctx.current_file.clone());
        let destination = self.destination.clone().unwrap_or_else(|| {
            app_root.join(format!("{file_id}{}", fsutil::extension_of(&source)))
        });
        self.source = Some(source.clone());
        self.destination = Some(destination.clone());

        match (source.exists(), destination.exists()) {
            (false, true) => {
                debug!(file_id = %file_id, path = %destination.display(), "file already in app-processing folder");
                let payload = self.encode()?;
                ctx.log_start(StateKind::MoveToAppProcessing, &payload, true)?;
                ctx.current_file = destination;
                ctx.in_app_processing = true;
                return Ok(Transition::Next(StateKind::Trigger));
            }
            (true, true) => {
                return Err(StateError::abort(format!(
                    "both {} and {} exist",
                    source.display(),
                    destination.display()
                )));
            }
            (false, false) => {
                return Err(StateError::abort(format!(
                    "{} disappeared from the processing folder",
                    source.display()
                )));
            }
            (true, false) => {}
        }

        let payload = self.encode()?;
        ctx.log_start(StateKind::MoveToAppProcessing, &payload, false)?;
        fsutil::move_file(&source, &destination).map_err(|err| {
            StateError::retry(format!(
                "cannot move {} to {}",
                source.display(),
                destination.display()
            ))
            .with_source(err)
        })?;
        ctx.current_file = destination;
        ctx.in_app_processing = true;
        ctx.log_finish()?;
        Ok(Transition::Next(StateKind::Trigger))
    }

    fn encode(&self) -> StateResult<Vec<u8>> {
        let mut out = Vec::new();
        self.write_payload(&mut out)?;
        Ok(out)
    }

    pub(crate) fn write_payload(&self, out: &mut Vec<u8>) -> StateResult<()> {
        put_path(out, self.source.as_deref())?;
        put_path(out, self.destination.as_deref())
    }

    pub(crate) fn read_payload(&mut self, input: &mut &[u8], dump: Option<&mut LogDump>) -> io::Result<()> {
        self.source = get_path(input)?;
        self.destination = get_path(input)?;
        if let Some(dump) = dump {
            dump_paths(dump, self.source.as_ref(), self.destination.as_ref())?;
        }
        Ok(())
    }

    pub(crate) fn restore_context(&self, ctx: &mut FileContext, finished: bool) {
        if finished {
            if let Some(destination) = &self.destination {
                ctx.current_file.clone_from(destination);
                ctx.in_app_processing = true;
            }
        } else if let Some(source) = &self.source {
            ctx.current_file.clone_from(source);
        }
    }
}
