use std::fs;
use std::io;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use tracing::info;

use super::{END_MARKER, FIXED_BODY_LEN, START_MARKER, UNFINISHED};
use crate::context::FileContext;
use crate::dump::LogDump;
use crate::error::{StateError, StateResult};
use crate::state::{FileState, StateKind};

/// One well-formed log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Logged state.
    pub kind: StateKind,
    /// Start time in epoch milliseconds.
    pub started: i64,
    /// Finish time in epoch milliseconds, `-1` while unfinished.
    pub finished: i64,
    /// State specific payload.
    pub payload: Vec<u8>,
}

impl RawEntry {
    /// Whether the state's side effects completed.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished != UNFINISHED
    }
}

/// Parse every intact entry of a log file.
///
/// Parsing stops at the first corrupt or truncated entry; the entries before
/// it are returned.
///
/// # Errors
///
/// Returns an ABORT error when the file is missing or unreadable.
pub fn read_entries(path: &Path) -> StateResult<Vec<RawEntry>> {
    let bytes = fs::read(path).map_err(|err| {
        StateError::abort(format!("cannot read state log {}", path.display())).with_source(err)
    })?;

    let mut entries = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        if bytes[pos] != START_MARKER {
            info!(path = %path.display(), offset = pos, "state log entry has no start marker");
            break;
        }
        if pos + 3 > bytes.len() {
            info!(path = %path.display(), offset = pos, "state log truncated in entry header");
            break;
        }
        let length = usize::from(BigEndian::read_u16(&bytes[pos + 1..pos + 3]));
        let end = pos + 3 + length;
        if length < FIXED_BODY_LEN || end > bytes.len() {
            info!(path = %path.display(), offset = pos, length, "state log entry truncated");
            break;
        }

        let body = &bytes[pos + 3..end];
        if body[length - 1] != END_MARKER {
            info!(path = %path.display(), offset = pos, "state log entry has no end marker");
            break;
        }
        let Some(kind) = StateKind::from_id(body[16]) else {
            info!(path = %path.display(), offset = pos, id = body[16], "unknown state id in log");
            break;
        };

        entries.push(RawEntry {
            kind,
            started: BigEndian::read_i64(&body[0..8]),
            finished: BigEndian::read_i64(&body[8..16]),
            payload: body[17..length - 1].to_vec(),
        });
        pos = end;
    }
    Ok(entries)
}

/// Rebuild the state chain from parsed entries.
///
/// Consecutive entries of the same state are merged into one value; a new
/// state takes the one before it as its predecessor. When `ctx` is given each
/// entry also restores the context fields it recorded. When `dump` is given
/// every entry is rendered into it.
///
/// # Errors
///
/// Returns an INTERNAL error when the dump cannot be written.
pub fn replay(
    entries: &[RawEntry],
    mut ctx: Option<&mut FileContext>,
    mut dump: Option<&mut LogDump>,
) -> StateResult<Option<FileState>> {
    let mut current: Option<FileState> = None;
    for entry in entries {
        let finished = entry.is_finished();
        if let Some(dump) = dump.as_deref_mut() {
            dump.begin_state(entry.kind, entry.started, entry.finished)
                .map_err(dump_error)?;
        }

        let mut state = match current.take() {
            Some(state) if state.kind() == entry.kind => state,
            previous => entry.kind.create(previous.map(Box::new)),
        };
        let mut payload = entry.payload.as_slice();
        if let Err(err) = state.read_payload(&mut payload, finished, dump.as_deref_mut()) {
            info!(state = entry.kind.as_str(), error = %err, "state log payload unreadable");
            if let Some(dump) = dump.as_deref_mut() {
                dump.end_state().map_err(dump_error)?;
            }
            break;
        }

        if let Some(dump) = dump.as_deref_mut() {
            dump.end_state().map_err(dump_error)?;
        }
        if let Some(ctx) = ctx.as_deref_mut() {
            state.restore_context(ctx, finished);
        }
        current = Some(state);
    }
    Ok(current)
}

/// Read the context's state log and restore the context from it.
///
/// Returns the last logged state with its predecessors chained behind it.
///
/// # Errors
///
/// Returns an ABORT error when the log is missing or unreadable.
pub fn read_log(ctx: &mut FileContext, dump: Option<&mut LogDump>) -> StateResult<Option<FileState>> {
    let path = ctx
        .log_path()
        .ok_or_else(|| StateError::internal("processing folder is not set"))?;
    let entries = read_entries(&path)?;
    replay(&entries, Some(ctx), dump)
}

fn dump_error(err: io::Error) -> StateError {
    StateError::internal("cannot render state log").with_source(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statelog::StateLogWriter;
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    fn write_three(path: &Path) -> anyhow::Result<u64> {
        let mut writer = StateLogWriter::open(path)?;
        writer.start_entry(StateKind::InProcessing, &[], true)?;
        writer.start_entry(StateKind::Trigger, &[], false)?;
        writer.finish_entry()?;
        let len_after_two = fs::metadata(path)?.len();
        writer.start_entry(StateKind::Resume, &[0, 0], false)?;
        Ok(len_after_two)
    }

    #[test]
    fn truncation_keeps_complete_entries() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("__STATE.log");
        let two = write_three(&path)?;

        let file = OpenOptions::new().write(true).open(&path)?;
        file.set_len(two + 5)?;
        let entries = read_entries(&path)?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].kind, StateKind::Trigger);
        assert!(entries[1].is_finished());
        Ok(())
    }

    #[test]
    fn bad_marker_stops_scan() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("__STATE.log");
        let two = write_three(&path)?;
        let mut bytes = fs::read(&path)?;
        let index = usize::try_from(two)?;
        bytes[index] = 0x00;
        fs::write(&path, bytes)?;
        assert_eq!(read_entries(&path)?.len(), 2);
        Ok(())
    }

    #[test]
    fn unknown_state_id_stops_scan() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("__STATE.log");
        write_three(&path)?;
        let mut bytes = fs::read(&path)?;
        bytes[19] = 42;
        fs::write(&path, bytes)?;
        assert!(read_entries(&path)?.is_empty());
        Ok(())
    }

    #[test]
    fn missing_log_aborts() {
        let err = read_entries(Path::new("/definitely/missing/__STATE.log")).err();
        assert_eq!(err.map(|e| e.kind()), Some(crate::error::ErrorKind::Abort));
    }

    #[test]
    fn replay_coalesces_and_chains() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("__STATE.log");
        let mut writer = StateLogWriter::open(&path)?;
        let mut paths = Vec::new();
        crate::statelog::put_path(&mut paths, Some(Path::new("/in/a.txt")))?;
        crate::statelog::put_path(&mut paths, Some(Path::new("/p/IN-1/a.txt")))?;
        writer.start_entry(StateKind::MoveToProcessing, &paths, true)?;
        writer.start_entry(StateKind::Trigger, &[], false)?;
        writer.start_entry(StateKind::Trigger, &[], false)?;
        let mut folder = Vec::new();
        crate::statelog::put_str(&mut folder, "/p/IN-1")?;
        writer.start_entry(StateKind::Resume, &folder, false)?;
        writer.close();

        let entries = read_entries(&path)?;
        assert_eq!(entries.len(), 4);
        let Some(state) = replay(&entries, None, None)? else {
            anyhow::bail!("no state replayed");
        };
        let mut chain = Vec::new();
        let mut cursor = Some(&state);
        while let Some(current) = cursor {
            chain.push(current.kind());
            cursor = current.previous();
        }
        assert_eq!(
            chain,
            vec![StateKind::Resume, StateKind::Trigger, StateKind::MoveToProcessing]
        );
        Ok(())
    }
}
