#![forbid(unsafe_code)]
#![warn(
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Crash-safe directory poller.
//!
//! Files dropped into watched folders are tracked until stable, moved into a
//! private processing folder, announced to a remote method through a
//! [`transport::TriggerTransport`] and finally removed. Every transition is
//! appended to a binary state log inside the processing folder, so a restarted
//! poller resumes each leftover file where it stopped. Failed files are parked
//! in an error folder with an XML report.
//!
//! Layout:
//! - `poller.rs` scan loop, restart recovery and retry scheduling
//! - `pool.rs` elastic worker pool
//! - `state/` the per-file state machine
//! - `statelog/` binary log codec, `dump.rs` its XML rendering
//! - `folder.rs`, `handler.rs`, `transport.rs` configuration-driven collaborators

pub mod context;
pub mod dump;
pub mod error;
pub mod folder;
pub mod handler;
pub mod lockfile;
pub mod poller;
pub mod pool;
pub mod retry;
pub mod state;
pub mod statelog;
pub mod transport;

mod fsutil;
#[cfg(test)]
mod testing;

pub use context::{FileContext, PollerEnv};
pub use dump::{LogDump, dump_log};
pub use error::{ErrorKind, PollerError, PollerResult, StateError, StateResult};
pub use folder::{FileFilter, Folder, FolderRegistry};
pub use handler::{AlertErrorHandler, FailureReport, FileErrorHandler, HandlerRegistry, LogErrorHandler};
pub use lockfile::{LockError, LockFile};
pub use poller::{MAX_FILES_IN_PROCESS, Poller, PollerHandle, PollerSettings, PollerStats};
pub use pool::{PoolStats, WorkerPool};
pub use state::{FileState, StateKind};
pub use statelog::{LOG_FILE_NAME, StateLogOptions};
pub use transport::{RequestParameter, TransportError, TriggerRequest, TriggerTransport};
