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

//! File-backed configuration for the directory poller.
//!
//! Layout: `model.rs` (typed models), `loader.rs` (YAML/JSON loading and path
//! resolution), `validate.rs` (validation), `watcher.rs` (hot reload through a
//! watch channel), `defaults.rs` (field defaults).

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;
pub mod watcher;

pub use error::{ConfigError, ConfigResult};
pub use loader::load_config;
pub use model::{
    ConfigSnapshot, FilterKind, FilterSpec, FolderSpec, FoldersDocument, ParameterSource,
    ParameterSpec, PollerConfig, TriggerSpec, normalize_folder_name,
};
pub use validate::{validate, validate_worker_limits};
pub use watcher::{ConfigWatcher, watch_config};
