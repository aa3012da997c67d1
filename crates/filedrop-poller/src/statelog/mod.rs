//! Append-only binary log of state transitions, one per processing folder.
//!
//! Entry layout, big-endian:
//!
//! ```text
//! 0x57 | length u16 | started i64 ms | finished i64 ms (-1 = unfinished) | state u8 | payload | 0xED
//! ```
//!
//! `length` counts every byte after the length field. Strings in payloads are
//! a `u16` byte length followed by UTF-8; an empty string stands for "no path".

mod reader;
mod writer;

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{StateError, StateResult};

pub use reader::{RawEntry, read_entries, read_log, replay};
pub use writer::StateLogWriter;

/// Log file name inside a processing folder.
pub const LOG_FILE_NAME: &str = "__STATE.log";
/// Error report written next to a failed file.
pub const ERROR_INFO_FILE_NAME: &str = "__ERROR_INFO.xml";

pub(crate) const START_MARKER: u8 = 0x57;
pub(crate) const END_MARKER: u8 = 0xED;
pub(crate) const UNFINISHED: i64 = -1;
/// Offset of the finish timestamp from the start of an entry.
pub(crate) const FINISH_OFFSET: u64 = 11;
/// Bytes counted by `length` that are not payload.
pub(crate) const FIXED_BODY_LEN: usize = 8 + 8 + 1 + 1;

/// Switches applied to every state log the poller opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateLogOptions {
    /// Write entries at all. When unset nothing is logged and restarts fall
    /// back to scanning the processing folder.
    pub enabled: bool,
}

impl Default for StateLogOptions {
    fn default() -> Self {
        Self { enabled: true }
    }
}

pub(crate) fn put_str(out: &mut Vec<u8>, value: &str) -> StateResult<()> {
    let len = u16::try_from(value.len())
        .map_err(|_| StateError::internal("string too long for state log"))?;
    out.write_u16::<BigEndian>(len)
        .map_err(|err| StateError::internal("state log encoding failed").with_source(err))?;
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

pub(crate) fn put_path(out: &mut Vec<u8>, value: Option<&Path>) -> StateResult<()> {
    match value {
        Some(path) => put_str(out, &path.to_string_lossy()),
        None => put_str(out, ""),
    }
}

pub(crate) fn put_i64(out: &mut Vec<u8>, value: i64) -> StateResult<()> {
    out.write_i64::<BigEndian>(value)
        .map_err(|err| StateError::internal("state log encoding failed").with_source(err))
}

pub(crate) fn get_str(input: &mut &[u8]) -> io::Result<String> {
    let len = usize::from(input.read_u16::<BigEndian>()?);
    let mut bytes = vec![0; len];
    input.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

pub(crate) fn get_path(input: &mut &[u8]) -> io::Result<Option<PathBuf>> {
    let value = get_str(input)?;
    Ok((!value.is_empty()).then(|| PathBuf::from(value)))
}

pub(crate) fn get_i64(input: &mut &[u8]) -> io::Result<i64> {
    input.read_i64::<BigEndian>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_and_paths_share_encoding() -> anyhow::Result<()> {
        let mut out = Vec::new();
        put_str(&mut out, "abc")?;
        put_path(&mut out, None)?;
        put_path(&mut out, Some(Path::new("/x/y")))?;
        put_i64(&mut out, -5)?;
        assert_eq!(&out[..5], &[0, 3, b'a', b'b', b'c']);

        let mut input = out.as_slice();
        assert_eq!(get_str(&mut input)?, "abc");
        assert_eq!(get_path(&mut input)?, None);
        assert_eq!(get_path(&mut input)?, Some(PathBuf::from("/x/y")));
        assert_eq!(get_i64(&mut input)?, -5);
        assert!(input.is_empty());
        Ok(())
    }

    #[test]
    fn truncated_string_is_an_error() {
        let mut input: &[u8] = &[0, 9, b'a'];
        assert!(get_str(&mut input).is_err());
    }
}
