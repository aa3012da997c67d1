use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use super::{FileState, StateKind, Transition};
use crate::context::FileContext;
use crate::dump::LogDump;
use crate::error::{StateError, StateResult};
use crate::lockfile::DEFAULT_LOCK_FILE_NAME;
use crate::statelog::{ERROR_INFO_FILE_NAME, LOG_FILE_NAME, get_path, put_path};

/// Picks a leftover processing folder back up after a restart.
///
/// With a logged predecessor the machine continues from it. Without one the
/// folder must hold exactly one file, which re-enters `InProcessing`.
#[derive(Debug, Default)]
pub struct Resume {
    processing_folder: Option<PathBuf>,
    pub(super) previous: Option<Box<FileState>>,
}

impl Resume {
    pub(crate) fn new(previous: Option<Box<FileState>>) -> Self {
        Self {
            processing_folder: None,
            previous,
        }
    }

    pub(crate) fn execute(&mut self, ctx: &mut FileContext) -> StateResult<Transition> {
        let folder = ctx
            .processing_folder
            .clone()
            .ok_or_else(|| StateError::internal("processing folder is not set"))?;
        self.processing_folder = Some(folder.clone());
        let mut payload = Vec::new();
        self.write_payload(&mut payload)?;
        ctx.log_start(StateKind::Resume, &payload, false)?;

        if let Some(previous) = &self.previous {
            info!(file_id = ?ctx.file_id, state = previous.kind().as_str(), "resuming logged state");
            ctx.log_finish()?;
            return Ok(Transition::Adopt);
        }

        let mut files = leftover_files(&folder).map_err(|err| {
            StateError::retry(format!("cannot list {}", folder.display())).with_source(err)
        })?;
        let file = match files.len() {
            1 => files.remove(0),
            0 => {
                return Err(StateError::abort(format!(
                    "no file left in processing folder {}",
                    folder.display()
                )));
            }
            count => {
                return Err(StateError::abort(format!(
                    "{count} files left in processing folder {}",
                    folder.display()
                )));
            }
        };

        info!(file_id = ?ctx.file_id, path = %file.display(), "resuming leftover file");
        if ctx.original_file.as_os_str().is_empty() {
            ctx.original_file.clone_from(&file);
        }
        ctx.current_file = file;
        ctx.log_finish()?;
        Ok(Transition::Next(StateKind::InProcessing))
    }

    pub(crate) fn write_payload(&self, out: &mut Vec<u8>) -> StateResult<()> {
        put_path(out, self.processing_folder.as_deref())
    }

    pub(crate) fn read_payload(&mut self, input: &mut &[u8], dump: Option<&mut LogDump>) -> io::Result<()> {
        self.processing_folder = get_path(input)?;
        if let (Some(dump), Some(folder)) = (dump, &self.processing_folder) {
            dump.element("processing-folder", &folder.to_string_lossy())?;
        }
        Ok(())
    }
}

fn leftover_files(folder: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(folder)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if [LOG_FILE_NAME, ERROR_INFO_FILE_NAME, DEFAULT_LOCK_FILE_NAME]
            .iter()
            .any(|reserved| name == *reserved)
        {
            continue;
        }
        files.push(entry.path());
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::Fixture;
    use tempfile::TempDir;

    fn resume_in(fixture: &Fixture, leftovers: &[&str]) -> anyhow::Result<StateResult<Transition>> {
        let env = fixture.env(&[fixture.folder(false, false)])?;
        let processing = fixture.processing.join("INBOX-0004");
        fs::create_dir_all(&processing)?;
        for name in leftovers {
            fs::write(processing.join(name), "x")?;
        }
        let folder = env
            .folders
            .get("INBOX")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no folder"))?;
        let mut ctx = FileContext::restored(folder, Arc::clone(&env), processing);
        Ok(Resume::new(None).execute(&mut ctx))
    }

    #[test]
    fn empty_processing_folder_aborts() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let outcome = resume_in(&fixture, &[])?;
        assert_eq!(outcome.err().map(|e| e.kind()), Some(ErrorKind::Abort));
        Ok(())
    }

    #[test]
    fn several_leftover_files_abort() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let outcome = resume_in(&fixture, &["a.txt", "b.txt"])?;
        assert_eq!(outcome.err().map(|e| e.kind()), Some(ErrorKind::Abort));
        Ok(())
    }

    #[test]
    fn single_leftover_file_reenters_in_processing() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let outcome = resume_in(&fixture, &["only.txt"])?;
        assert_eq!(outcome?, Transition::Next(StateKind::InProcessing));
        Ok(())
    }

    #[test]
    fn reserved_files_are_ignored() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        for name in [LOG_FILE_NAME, ERROR_INFO_FILE_NAME, DEFAULT_LOCK_FILE_NAME, "data.csv"] {
            fs::write(temp.path().join(name), "x")?;
        }
        fs::create_dir(temp.path().join("nested"))?;
        assert_eq!(leftover_files(temp.path())?, vec![temp.path().join("data.csv")]);
        Ok(())
    }
}
