use std::io;
use std::path::PathBuf;

use super::{FileState, StateKind, Transition};
use crate::context::FileContext;
use crate::dump::{LogDump, format_millis};
use crate::error::{StateError, StateResult};
use crate::fsutil;
use crate::statelog::{get_i64, get_path, get_str, put_i64, put_path, put_str};

/// Identity of a claimed file, as logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Claim {
    file_id: String,
    original_file: Option<PathBuf>,
    processing_file: Option<PathBuf>,
    size: i64,
    modified: i64,
}

/// Records the identity of a file that now sits in its processing folder.
#[derive(Debug, Default)]
pub struct InProcessing {
    pub(super) claim: Option<Claim>,
    pub(super) previous: Option<Box<FileState>>,
}

impl InProcessing {
    pub(crate) fn execute(&mut self, ctx: &mut FileContext) -> StateResult<Transition> {
        let (size, modified) = fsutil::snapshot(&ctx.current_file).map_err(|err| {
            StateError::abort(format!(
                "{} is missing from the processing folder",
                ctx.current_file.display()
            ))
            .with_source(err)
        })?;
        let file_id = ctx
            .file_id
            .clone()
            .ok_or_else(|| StateError::internal("file id is not set"))?;
        ctx.file_size = size;
        ctx.modified_millis = modified;

        self.claim = Some(Claim {
            file_id,
            original_file: Some(ctx.original_file.clone()).filter(|path| !path.as_os_str().is_empty()),
            processing_file: Some(ctx.current_file.clone()),
            size: i64::try_from(size).unwrap_or(i64::MAX),
            modified,
        });
        let mut payload = Vec::new();
        self.write_payload(&mut payload)?;
        ctx.log_start(StateKind::InProcessing, &payload, true)?;

        if ctx.folder.trigger.move_file {
            Ok(Transition::Next(StateKind::MoveToAppProcessing))
        } else {
            Ok(Transition::Next(StateKind::Trigger))
        }
    }

    pub(crate) fn write_payload(&self, out: &mut Vec<u8>) -> StateResult<()> {
        let Some(claim) = &self.claim else {
            return Ok(());
        };
        put_str(out, &claim.file_id)?;
        put_path(out, claim.original_file.as_deref())?;
        put_path(out, claim.processing_file.as_deref())?;
        put_i64(out, claim.size)?;
        put_i64(out, claim.modified)
    }

    pub(crate) fn read_payload(&mut self, input: &mut &[u8], dump: Option<&mut LogDump>) -> io::Result<()> {
        let claim = Claim {
            file_id: get_str(input)?,
            original_file: get_path(input)?,
            processing_file: get_path(input)?,
            size: get_i64(input)?,
            modified: get_i64(input)?,
        };
        if let Some(dump) = dump {
            dump.element("file-id", &claim.file_id)?;
            if let Some(original) = &claim.original_file {
                dump.element("original-file", &original.to_string_lossy())?;
            }
            if let Some(processing) = &claim.processing_file {
                dump.element("processing-file", &processing.to_string_lossy())?;
            }
            dump.element("file-size", &claim.size.to_string())?;
            dump.element("last-modified", &format_millis(claim.modified))?;
        }
        self.claim = Some(claim);
        Ok(())
    }

    pub(crate) fn restore_context(&self, ctx: &mut FileContext) {
        let Some(claim) = &self.claim else {
            return;
        };
        ctx.file_id = Some(claim.file_id.clone());
        if let Some(original) = &claim.original_file {
            ctx.original_file.clone_from(original);
        }
        if let Some(processing) = &claim.processing_file {
            ctx.current_file.clone_from(processing);
        }
        ctx.file_size = u64::try_from(claim.size).unwrap_or_default();
        ctx.modified_millis = claim.modified;
    }
}
