use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, WriteBytesExt};
use chrono::Utc;
use tracing::trace;

use super::{END_MARKER, FINISH_OFFSET, FIXED_BODY_LEN, START_MARKER, UNFINISHED};
use crate::error::{StateError, StateResult};
use crate::state::StateKind;

/// Appends entries to a state log and patches their finish time.
#[derive(Debug)]
pub struct StateLogWriter {
    path: PathBuf,
    file: File,
    entry_offset: Option<u64>,
}

impl StateLogWriter {
    /// Open or create the log and position at its end.
    ///
    /// # Errors
    ///
    /// Returns an ABORT error when the file cannot be opened.
    pub fn open(path: &Path) -> StateResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|err| {
                StateError::abort(format!("cannot open state log {}", path.display()))
                    .with_source(err)
            })?;
        file.seek(SeekFrom::End(0)).map_err(|err| {
            StateError::abort(format!("cannot seek state log {}", path.display())).with_source(err)
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            entry_offset: None,
        })
    }

    /// Log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether an entry was started and not finished yet.
    #[must_use]
    pub const fn has_open_entry(&self) -> bool {
        self.entry_offset.is_some()
    }

    /// Append an entry. Finished entries are stamped with the same time twice.
    ///
    /// # Errors
    ///
    /// Returns an ABORT error when the entry cannot be written durably.
    pub fn start_entry(&mut self, kind: StateKind, payload: &[u8], finished: bool) -> StateResult<()> {
        let length = u16::try_from(FIXED_BODY_LEN + payload.len())
            .map_err(|_| StateError::internal("state log payload too large"))?;
        let now = Utc::now().timestamp_millis();

        let mut entry = Vec::with_capacity(3 + usize::from(length));
        entry.push(START_MARKER);
        entry
            .write_u16::<BigEndian>(length)
            .and_then(|()| entry.write_i64::<BigEndian>(now))
            .and_then(|()| entry.write_i64::<BigEndian>(if finished { now } else { UNFINISHED }))
            .map_err(|err| StateError::internal("state log encoding failed").with_source(err))?;
        entry.push(kind.id());
        entry.extend_from_slice(payload);
        entry.push(END_MARKER);

        let offset = self
            .file
            .stream_position()
            .map_err(|err| self.write_error(err))?;
        self.file
            .write_all(&entry)
            .and_then(|()| self.file.sync_data())
            .map_err(|err| self.write_error(err))?;

        trace!(path = %self.path.display(), state = kind.as_str(), finished, "state log entry written");
        self.entry_offset = (!finished).then_some(offset);
        Ok(())
    }

    /// Stamp the finish time of the open entry.
    ///
    /// # Errors
    ///
    /// Returns an INTERNAL error when no entry is open and an ABORT error when
    /// the patch cannot be written.
    pub fn finish_entry(&mut self) -> StateResult<()> {
        let Some(offset) = self.entry_offset else {
            return Err(StateError::internal(format!(
                "no open entry in state log {}",
                self.path.display()
            )));
        };

        let now = Utc::now().timestamp_millis();
        self.file
            .seek(SeekFrom::Start(offset + FINISH_OFFSET))
            .and_then(|_| self.file.write_i64::<BigEndian>(now))
            .and_then(|()| self.file.seek(SeekFrom::End(0)).map(|_| ()))
            .and_then(|()| self.file.sync_data())
            .map_err(|err| self.write_error(err))?;
        self.entry_offset = None;
        Ok(())
    }

    /// Close the log.
    pub fn close(self) {
        drop(self);
    }

    fn write_error(&self, err: std::io::Error) -> StateError {
        StateError::abort(format!("cannot write state log {}", self.path.display())).with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statelog::read_entries;
    use tempfile::TempDir;

    #[test]
    fn entries_are_appended_and_patched() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("__STATE.log");
        let mut writer = StateLogWriter::open(&path)?;
        writer.start_entry(StateKind::MoveToProcessing, &[0, 0, 0, 0], false)?;
        assert!(writer.has_open_entry());
        writer.finish_entry()?;
        writer.start_entry(StateKind::Trigger, &[], false)?;
        writer.close();

        let entries = read_entries(&path)?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, StateKind::MoveToProcessing);
        assert!(entries[0].finished >= entries[0].started);
        assert_eq!(entries[0].payload, vec![0, 0, 0, 0]);
        assert_eq!(entries[1].kind, StateKind::Trigger);
        assert_eq!(entries[1].finished, UNFINISHED);
        Ok(())
    }

    #[test]
    fn reopening_appends_at_end() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("__STATE.log");
        StateLogWriter::open(&path)?.start_entry(StateKind::InProcessing, &[], true)?;
        let mut writer = StateLogWriter::open(&path)?;
        assert!(!writer.has_open_entry());
        writer.start_entry(StateKind::Trigger, &[], true)?;
        assert_eq!(read_entries(&path)?.len(), 2);
        Ok(())
    }

    #[test]
    fn finish_without_open_entry_is_internal() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let mut writer = StateLogWriter::open(&temp.path().join("__STATE.log"))?;
        let err = writer.finish_entry().err();
        assert_eq!(err.map(|e| e.kind()), Some(crate::error::ErrorKind::Internal));
        Ok(())
    }

    #[test]
    fn entry_layout_is_big_endian() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("__STATE.log");
        StateLogWriter::open(&path)?.start_entry(StateKind::Trigger, &[0xAA], false)?;
        let bytes = std::fs::read(&path)?;
        assert_eq!(bytes.len(), 3 + FIXED_BODY_LEN + 1);
        assert_eq!(bytes[0], START_MARKER);
        assert_eq!(u16::from_be_bytes([bytes[1], bytes[2]]), 19);
        assert_eq!(&bytes[11..19], &UNFINISHED.to_be_bytes());
        assert_eq!(bytes[19], StateKind::Trigger.id());
        assert_eq!(bytes[20], 0xAA);
        assert_eq!(bytes[21], END_MARKER);
        Ok(())
    }
}
