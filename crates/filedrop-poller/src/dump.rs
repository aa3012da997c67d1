//! XML rendering of state logs for operators and error reports.

use std::io;
use std::path::Path;

use chrono::{Local, TimeZone};
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

use crate::error::{StateError, StateResult};
use crate::state::StateKind;
use crate::statelog::{LOG_FILE_NAME, UNFINISHED, read_entries, replay};

const ROOT: &str = "file-states";
const STATE: &str = "state";

/// Streaming `<file-states>` document.
pub struct LogDump {
    writer: Writer<Vec<u8>>,
}

impl LogDump {
    /// Start a standalone document.
    ///
    /// # Errors
    ///
    /// Returns an error when the root element cannot be written.
    pub fn new() -> io::Result<Self> {
        Self::from_writer(Writer::new_with_indent(Vec::new(), b' ', 2))
    }

    /// Continue an existing document; the dump is nested at the writer's position.
    ///
    /// # Errors
    ///
    /// Returns an error when the root element cannot be written.
    pub fn from_writer(mut writer: Writer<Vec<u8>>) -> io::Result<Self> {
        write(&mut writer, Event::Start(BytesStart::new(ROOT)))?;
        Ok(Self { writer })
    }

    /// Open a `<state>` element for one entry.
    ///
    /// # Errors
    ///
    /// Returns an error when the element cannot be written.
    pub fn begin_state(&mut self, kind: StateKind, started: i64, finished: i64) -> io::Result<()> {
        let mut element = BytesStart::new(STATE);
        element.push_attribute(("type", kind.as_str()));
        element.push_attribute(("started", format_millis(started).as_str()));
        if finished != UNFINISHED {
            element.push_attribute(("finished", format_millis(finished).as_str()));
        }
        write(&mut self.writer, Event::Start(element))
    }

    /// Write a text element inside the current state.
    ///
    /// # Errors
    ///
    /// Returns an error when the element cannot be written.
    pub fn element(&mut self, name: &str, text: &str) -> io::Result<()> {
        text_element(&mut self.writer, name, text)
    }

    /// Close the current `<state>` element.
    ///
    /// # Errors
    ///
    /// Returns an error when the element cannot be written.
    pub fn end_state(&mut self) -> io::Result<()> {
        write(&mut self.writer, Event::End(BytesEnd::new(STATE)))
    }

    /// Close the document and hand back the writer.
    ///
    /// # Errors
    ///
    /// Returns an error when the root cannot be closed.
    pub fn into_writer(mut self) -> io::Result<Writer<Vec<u8>>> {
        write(&mut self.writer, Event::End(BytesEnd::new(ROOT)))?;
        Ok(self.writer)
    }

    /// Close the document and return it as text.
    ///
    /// # Errors
    ///
    /// Returns an error when the root cannot be closed or the output is not UTF-8.
    pub fn finish(self) -> io::Result<String> {
        let bytes = self.into_writer()?.into_inner();
        String::from_utf8(bytes).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

/// Render the log at `path` as XML. `path` is a log file or the processing
/// folder containing one.
///
/// # Errors
///
/// Returns an ABORT error when the log cannot be read and an INTERNAL error
/// when rendering fails.
pub fn dump_log(path: &Path) -> StateResult<String> {
    let log = if path.is_dir() {
        path.join(LOG_FILE_NAME)
    } else {
        path.to_path_buf()
    };
    let entries = read_entries(&log)?;
    let mut dump = LogDump::new().map_err(render_error)?;
    replay(&entries, None, Some(&mut dump))?;
    dump.finish().map_err(render_error)
}

pub(crate) fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> io::Result<()> {
    write(writer, Event::Start(BytesStart::new(name)))?;
    write(writer, Event::Text(BytesText::new(text)))?;
    write(writer, Event::End(BytesEnd::new(name)))
}

pub(crate) fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> io::Result<()> {
    writer
        .write_event(event)
        .map_err(|err| io::Error::other(err.to_string()))
}

/// `yyyy-MM-ddTHH:mm:ss.SSS` in local time.
pub(crate) fn format_millis(millis: i64) -> String {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map_or_else(|| millis.to_string(), |time| time.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
}

fn render_error(err: io::Error) -> StateError {
    StateError::internal("cannot render state log").with_source(err)
}
