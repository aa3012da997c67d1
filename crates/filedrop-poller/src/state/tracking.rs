use std::time::Instant;

use super::{FileState, StateKind, Transition};
use crate::context::FileContext;
use crate::error::{StateError, StateResult};
use crate::fsutil;

/// Waits until the file stopped changing for the folder's track time. Never logged.
#[derive(Debug, Default)]
pub struct Tracking {
    pub(super) previous: Option<Box<FileState>>,
}

impl Tracking {
    pub(crate) fn execute(&mut self, ctx: &mut FileContext) -> StateResult<Transition> {
        let (size, modified) = fsutil::snapshot(&ctx.current_file).map_err(|err| {
            StateError::abort(format!("cannot read {}", ctx.current_file.display())).with_source(err)
        })?;

        let now = Instant::now();
        if size != ctx.file_size || modified != ctx.modified_millis {
            ctx.file_size = size;
            ctx.modified_millis = modified;
            ctx.last_stable_check = None;
            return Ok(Transition::Stay);
        }

        let stable_since = *ctx.last_stable_check.get_or_insert(now);
        if now.duration_since(stable_since) >= ctx.folder.track_time {
            Ok(Transition::Next(StateKind::MoveToProcessing))
        } else {
            Ok(Transition::Stay)
        }
    }
}
