//! Per-file state machine.
//!
//! ```text
//! Tracking -> MoveToProcessing -> InProcessing -> [MoveToAppProcessing] -> Trigger -> Finished
//! any non-terminal state on unrecoverable failure -> Error
//! restart with an incomplete log -> Resume -> adopted state
//! ```
//!
//! Every state that has side effects logs a start entry before acting and
//! finishes it afterwards, so re-executing a state whose entry is unfinished
//! is safe.

mod app_processing;
mod error;
mod in_processing;
mod move_to_processing;
mod resume;
mod tracking;
mod trigger;

use std::io;

use crate::context::FileContext;
use crate::dump::LogDump;
use crate::error::StateResult;

pub use app_processing::MoveToAppProcessing;
pub use error::ErrorState;
pub use in_processing::InProcessing;
pub use move_to_processing::MoveToProcessing;
pub use resume::Resume;
pub use tracking::Tracking;
pub use trigger::Trigger;

/// State tag, persisted as the entry id in the state log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    /// Waiting for the file to stop changing.
    Tracking,
    /// Moving the file into its processing folder.
    MoveToProcessing,
    /// Recording the file's identity inside the processing folder.
    InProcessing,
    /// Moving the file to the app-processing root.
    MoveToAppProcessing,
    /// Sending the remote trigger.
    Trigger,
    /// Done.
    Finished,
    /// Picking up a leftover processing folder after a restart.
    Resume,
    /// Parked in the error folder.
    Error,
}

impl StateKind {
    /// Log id.
    #[must_use]
    pub const fn id(self) -> u8 {
        match self {
            Self::Tracking => 0,
            Self::MoveToProcessing => 1,
            Self::InProcessing => 2,
            Self::MoveToAppProcessing => 3,
            Self::Trigger => 4,
            Self::Finished => 5,
            Self::Resume => 6,
            Self::Error => 7,
        }
    }

    /// Tag for a log id.
    #[must_use]
    pub const fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            0 => Self::Tracking,
            1 => Self::MoveToProcessing,
            2 => Self::InProcessing,
            3 => Self::MoveToAppProcessing,
            4 => Self::Trigger,
            5 => Self::Finished,
            6 => Self::Resume,
            7 => Self::Error,
            _ => return None,
        })
    }

    /// Label used in logs and dumps.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tracking => "tracking",
            Self::MoveToProcessing => "move-to-processing",
            Self::InProcessing => "in-processing",
            Self::MoveToAppProcessing => "move-to-app-processing",
            Self::Trigger => "trigger",
            Self::Finished => "finished",
            Self::Resume => "resume",
            Self::Error => "error",
        }
    }

    /// Fresh state of this kind. Terminal states drop the predecessor.
    #[must_use]
    pub fn create(self, previous: Option<Box<FileState>>) -> FileState {
        match self {
            Self::Tracking => FileState::Tracking(Tracking { previous }),
            Self::MoveToProcessing => FileState::MoveToProcessing(MoveToProcessing {
                previous,
                ..MoveToProcessing::default()
            }),
            Self::InProcessing => FileState::InProcessing(InProcessing {
                previous,
                ..InProcessing::default()
            }),
            Self::MoveToAppProcessing => FileState::MoveToAppProcessing(MoveToAppProcessing {
                previous,
                ..MoveToAppProcessing::default()
            }),
            Self::Trigger => FileState::Trigger(Trigger {
                previous,
                ..Trigger::default()
            }),
            Self::Finished => FileState::Finished,
            Self::Resume => FileState::Resume(Resume::new(previous)),
            Self::Error => FileState::Error(ErrorState::new(String::new())),
        }
    }
}

/// Outcome of one `execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Not done yet; run the same state again later.
    Stay,
    /// Continue with a fresh state of this kind.
    Next(StateKind),
    /// Continue with the predecessor this state carries.
    Adopt,
}

/// A state value, with whatever it needs to replay itself.
#[derive(Debug)]
pub enum FileState {
    /// See [`Tracking`].
    Tracking(Tracking),
    /// See [`MoveToProcessing`].
    MoveToProcessing(MoveToProcessing),
    /// See [`InProcessing`].
    InProcessing(InProcessing),
    /// See [`MoveToAppProcessing`].
    MoveToAppProcessing(MoveToAppProcessing),
    /// See [`Trigger`].
    Trigger(Trigger),
    /// Terminal success.
    Finished,
    /// See [`Resume`].
    Resume(Resume),
    /// See [`ErrorState`].
    Error(ErrorState),
}

impl FileState {
    /// Tag of this state.
    #[must_use]
    pub const fn kind(&self) -> StateKind {
        match self {
            Self::Tracking(_) => StateKind::Tracking,
            Self::MoveToProcessing(_) => StateKind::MoveToProcessing,
            Self::InProcessing(_) => StateKind::InProcessing,
            Self::MoveToAppProcessing(_) => StateKind::MoveToAppProcessing,
            Self::Trigger(_) => StateKind::Trigger,
            Self::Finished => StateKind::Finished,
            Self::Resume(_) => StateKind::Resume,
            Self::Error(_) => StateKind::Error,
        }
    }

    /// Run the state once.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::StateError`] whose kind decides how the file is recovered.
    pub fn execute(&mut self, ctx: &mut FileContext) -> StateResult<Transition> {
        match self {
            Self::Tracking(state) => state.execute(ctx),
            Self::MoveToProcessing(state) => state.execute(ctx),
            Self::InProcessing(state) => state.execute(ctx),
            Self::MoveToAppProcessing(state) => state.execute(ctx),
            Self::Trigger(state) => state.execute(ctx),
            Self::Finished => Ok(Transition::Stay),
            Self::Resume(state) => state.execute(ctx),
            Self::Error(state) => state.execute(ctx),
        }
    }

    /// Encode the state's log payload.
    ///
    /// # Errors
    ///
    /// Returns an INTERNAL error when a value does not fit the log format.
    pub fn write_payload(&self, out: &mut Vec<u8>) -> StateResult<()> {
        match self {
            Self::MoveToProcessing(state) => state.write_payload(out),
            Self::InProcessing(state) => state.write_payload(out),
            Self::MoveToAppProcessing(state) => state.write_payload(out),
            Self::Resume(state) => state.write_payload(out),
            Self::Tracking(_) | Self::Trigger(_) | Self::Finished | Self::Error(_) => Ok(()),
        }
    }

    /// Decode a logged payload into this state, rendering it into `dump` when given.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload is malformed.
    pub fn read_payload(
        &mut self,
        input: &mut &[u8],
        finished: bool,
        dump: Option<&mut LogDump>,
    ) -> io::Result<()> {
        match self {
            Self::MoveToProcessing(state) => state.read_payload(input, dump),
            Self::InProcessing(state) => state.read_payload(input, dump),
            Self::MoveToAppProcessing(state) => state.read_payload(input, dump),
            Self::Trigger(state) => state.read_payload(input, finished, dump),
            Self::Resume(state) => state.read_payload(input, dump),
            Self::Tracking(_) | Self::Finished | Self::Error(_) => Ok(()),
        }
    }

    /// Apply what a replayed entry recorded to the context.
    pub fn restore_context(&self, ctx: &mut FileContext, finished: bool) {
        match self {
            Self::MoveToProcessing(state) => state.restore_context(ctx, finished),
            Self::InProcessing(state) => state.restore_context(ctx),
            Self::MoveToAppProcessing(state) => state.restore_context(ctx, finished),
            Self::Tracking(_)
            | Self::Trigger(_)
            | Self::Finished
            | Self::Resume(_)
            | Self::Error(_) => {}
        }
    }

    /// Predecessor carried by this state.
    #[must_use]
    pub fn previous(&self) -> Option<&Self> {
        let previous = match self {
            Self::Tracking(state) => &state.previous,
            Self::MoveToProcessing(state) => &state.previous,
            Self::InProcessing(state) => &state.previous,
            Self::MoveToAppProcessing(state) => &state.previous,
            Self::Trigger(state) => &state.previous,
            Self::Resume(state) => &state.previous,
            Self::Finished | Self::Error(_) => return None,
        };
        previous.as_deref()
    }

    /// Take the predecessor out of this state.
    #[must_use]
    pub fn into_previous(self) -> Option<Self> {
        let previous = match self {
            Self::Tracking(state) => state.previous,
            Self::MoveToProcessing(state) => state.previous,
            Self::InProcessing(state) => state.previous,
            Self::MoveToAppProcessing(state) => state.previous,
            Self::Trigger(state) => state.previous,
            Self::Resume(state) => state.previous,
            Self::Finished | Self::Error(_) => None,
        };
        previous.map(|previous| *previous)
    }

    /// Whether the machine stops here.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        match self {
            Self::Finished | Self::Error(_) => true,
            Self::Resume(state) => state.previous.as_deref().is_some_and(Self::is_finished),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_and_reject_unknown() {
        for id in 0..8 {
            let kind = StateKind::from_id(id);
            assert_eq!(kind.map(StateKind::id), Some(id));
        }
        assert_eq!(StateKind::from_id(8), None);
    }

    #[test]
    fn non_terminal_states_keep_previous() {
        for kind in [
            StateKind::Tracking,
            StateKind::MoveToProcessing,
            StateKind::InProcessing,
            StateKind::MoveToAppProcessing,
            StateKind::Trigger,
        ] {
            let state = kind.create(Some(Box::new(StateKind::Tracking.create(None))));
            assert_eq!(state.previous().map(FileState::kind), Some(StateKind::Tracking));
            assert!(!state.is_finished());
            assert_eq!(state.into_previous().map(|s| s.kind()), Some(StateKind::Tracking));
        }
        let previous = Some(Box::new(StateKind::Trigger.create(None)));
        assert!(StateKind::Finished.create(previous).previous().is_none());

        let resume = StateKind::Resume.create(Some(Box::new(FileState::Finished)));
        assert_eq!(resume.previous().map(FileState::kind), Some(StateKind::Finished));
        assert!(resume.is_finished());
        assert_eq!(resume.into_previous().map(|s| s.kind()), Some(StateKind::Finished));
    }

    #[test]
    fn terminal_states() {
        assert!(FileState::Finished.is_finished());
        assert!(StateKind::Error.create(None).is_finished());
        assert!(!StateKind::Trigger.create(None).is_finished());
        assert!(!StateKind::Resume.create(None).is_finished());
    }
}
