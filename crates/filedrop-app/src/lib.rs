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

//! Filedrop daemon wiring.
//!
//! Layout: `bootstrap.rs` (service wiring and config reloads), `transport.rs`
//! (HTTP trigger delivery), `error.rs` (daemon errors).

/// Daemon bootstrap and environment loading.
pub mod bootstrap;
/// Daemon error types.
pub mod error;
/// HTTP trigger transport.
pub mod transport;

pub use bootstrap::run_app;
pub use error::{AppError, AppResult};
pub use transport::HttpTransport;
