use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Local};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use tracing::error;

use super::Transition;
use crate::context::FileContext;
use crate::dump::{LogDump, format_millis, text_element, write};
use crate::error::{StateError, StateResult};
use crate::fsutil;
use crate::statelog::{ERROR_INFO_FILE_NAME, LOG_FILE_NAME, read_entries, replay};

/// Parks the processing folder in the error root with an error report.
#[derive(Debug, Clone)]
pub struct ErrorState {
    detail: String,
    time: DateTime<Local>,
}

impl ErrorState {
    pub(crate) fn new(detail: String) -> Self {
        Self {
            detail,
            time: Local::now(),
        }
    }

    /// Failure detail recorded when the state was entered.
    #[must_use]
    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub(crate) fn execute(&mut self, ctx: &mut FileContext) -> StateResult<Transition> {
        ctx.close_log();
        let processing = ctx
            .processing_folder
            .clone()
            .ok_or_else(|| StateError::internal("processing folder is not set"))?;
        let name = processing
            .file_name()
            .ok_or_else(|| StateError::internal("processing folder has no name"))?;
        let target = ctx.env.error_root.join(name);

        if target.exists() {
            error!(file_id = ?ctx.file_id, path = %target.display(), "error folder already exists");
            return Err(StateError::abort(format!(
                "error folder {} already exists",
                target.display()
            )));
        }
        fsutil::move_dir(&processing, &target).map_err(|err| {
            StateError::abort(format!(
                "cannot move {} to {}",
                processing.display(),
                target.display()
            ))
            .with_source(err)
        })?;

        if let Ok(relative) = ctx.current_file.strip_prefix(&processing) {
            ctx.current_file = target.join(relative);
        }
        ctx.processing_folder = None;
        ctx.error_folder = Some(target.clone());

        let report = self.render_report(ctx, &target).map_err(|err| {
            StateError::abort("cannot render error report").with_source(err)
        })?;
        let path = target.join(ERROR_INFO_FILE_NAME);
        fs::write(&path, report).map_err(|err| {
            StateError::abort(format!("cannot write {}", path.display())).with_source(err)
        })?;
        Ok(Transition::Stay)
    }

    fn render_report(&self, ctx: &FileContext, folder: &Path) -> io::Result<Vec<u8>> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        write(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        write(&mut writer, Event::Start(BytesStart::new("error-info")))?;
        text_element(
            &mut writer,
            "error-time",
            &self.time.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
        )?;
        text_element(&mut writer, "current-file", &ctx.current_file.to_string_lossy())?;
        write(&mut writer, Event::Start(BytesStart::new("original-file")))?;
        text_element(&mut writer, "path", &ctx.original_file.to_string_lossy())?;
        text_element(&mut writer, "last-modified", &format_millis(ctx.modified_millis))?;
        write(&mut writer, Event::End(BytesEnd::new("original-file")))?;
        text_element(&mut writer, "trace", &self.detail)?;

        let mut dump = LogDump::from_writer(writer)?;
        let log = folder.join(LOG_FILE_NAME);
        if log.exists() {
            match read_entries(&log) {
                Ok(entries) => {
                    replay(&entries, None, Some(&mut dump)).map_err(io::Error::other)?;
                }
                Err(err) => error!(path = %log.display(), error = %err, "cannot read state log for error report"),
            }
        }
        let mut writer = dump.into_writer()?;
        write(&mut writer, Event::End(BytesEnd::new("error-info")))?;
        Ok(writer.into_inner())
    }
}
