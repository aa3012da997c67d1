use std::io;
use std::path::PathBuf;

use tracing::debug;

use super::{FileState, StateKind, Transition};
use crate::context::FileContext;
use crate::dump::LogDump;
use crate::error::{StateError, StateResult};
use crate::fsutil;
use crate::statelog::{get_path, put_path};

/// Moves the file from its input folder into `<processing-root>/<file-id>/`.
#[derive(Debug, Default)]
pub struct MoveToProcessing {
    pub(super) source: Option<PathBuf>,
    pub(super) destination: Option<PathBuf>,
    pub(super) previous: Option<Box<FileState>>,
}

impl MoveToProcessing {
    pub(crate) fn execute(&mut self, ctx: &mut FileContext) -> StateResult<Transition> {
        let file_id = ctx
            .file_id
            .clone()
            .ok_or_else(|| StateError::internal("file id is not set"))?;
        let source = self
            .source
            .clone()
            .unwrap_or_else(|| ctx.current_file.clone());
        let destination = match &self.destination {
            Some(destination) => destination.clone(),
            None => {
                let name = source
                    .file_name()
                    .ok_or_else(|| StateError::internal("source has no file name"))?;
                ctx.processing_folder
                    .clone()
                    .unwrap_or_else(|| ctx.env.processing_root.join(&file_id))
                    .join(name)
            }
        };

        match (source.exists(), destination.exists()) {
            (false, true) => {
                debug!(file_id = %file_id, path = %destination.display(), "file already in processing folder");
                ctx.ensure_processing_folder()?;
                self.source = Some(source);
                self.destination = Some(destination.clone());
                ctx.current_file = destination;
                let payload = self.encode()?;
                ctx.log_start(StateKind::MoveToProcessing, &payload, true)?;
                return Ok(Transition::Next(StateKind::InProcessing));
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
                    "{} disappeared before it was moved",
                    source.display()
                )));
            }
            (true, false) => {}
        }

        if fsutil::is_locked(&source)? {
            debug!(file_id = %file_id, path = %source.display(), "file is locked by another process");
            return Ok(Transition::Stay);
        }

        ctx.ensure_processing_folder()?;
        self.source = Some(source.clone());
        self.destination = Some(destination.clone());
        let payload = self.encode()?;
        ctx.log_start(StateKind::MoveToProcessing, &payload, false)?;

        fsutil::move_file(&source, &destination).map_err(|err| {
            StateError::retry(format!(
                "cannot move {} to {}",
                source.display(),
                destination.display()
            ))
            .with_source(err)
        })?;
        ctx.current_file = destination;
        ctx.log_finish()?;
        Ok(Transition::Next(StateKind::InProcessing))
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
        if let Some(source) = &self.source {
            ctx.original_file.clone_from(source);
            ctx.current_file.clone_from(source);
        }
        if finished && let Some(destination) = &self.destination {
            ctx.current_file.clone_from(destination);
        }
    }
}

pub(super) fn dump_paths(
    dump: &mut LogDump,
    source: Option<&PathBuf>,
    destination: Option<&PathBuf>,
) -> io::Result<()> {
    if let Some(source) = source {
        dump.element("source", &source.to_string_lossy())?;
    }
    if let Some(destination) = destination {
        dump.element("destination", &destination.to_string_lossy())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::statelog::read_entries;
    use crate::testing::Fixture;
    use std::fs;

    #[test]
    fn replay_after_completed_move_advances() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let env = fixture.env(&[fixture.folder(false, false)])?;
        let mut ctx = fixture.discover(&env, "moved.txt", "x")?;
        ctx.file_id = Some("INBOX-0001".into());
        let source = fixture.input.join("moved.txt");
        let destination = fixture.processing.join("INBOX-0001").join("moved.txt");
        fs::create_dir_all(fixture.processing.join("INBOX-0001"))?;
        fs::rename(&source, &destination)?;

        let mut state = MoveToProcessing {
            source: Some(source),
            destination: Some(destination.clone()),
            previous: None,
        };
        let transition = state.execute(&mut ctx)?;

        assert_eq!(transition, Transition::Next(StateKind::InProcessing));
        assert_eq!(ctx.current_file(), destination);
        let log = ctx.log_path().ok_or_else(|| anyhow::anyhow!("no log"))?;
        let entries = read_entries(&log)?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, StateKind::MoveToProcessing);
        assert!(entries[0].is_finished());
        Ok(())
    }

    #[test]
    fn source_and_destination_both_present_aborts() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let env = fixture.env(&[fixture.folder(false, false)])?;
        let mut ctx = fixture.discover(&env, "twice.txt", "x")?;
        ctx.file_id = Some("INBOX-0002".into());
        let source = fixture.input.join("twice.txt");
        let destination = fixture.processing.join("INBOX-0002").join("twice.txt");
        fs::create_dir_all(fixture.processing.join("INBOX-0002"))?;
        fs::write(&destination, "y")?;

        let mut state = MoveToProcessing {
            source: Some(source.clone()),
            destination: Some(destination.clone()),
            previous: None,
        };
        let err = state.execute(&mut ctx).err();

        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Abort));
        assert_eq!(fs::read_to_string(&source)?, "x");
        assert_eq!(fs::read_to_string(&destination)?, "y");
        Ok(())
    }
}
