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

//! Shared test helpers used across integration suites.
//! Layout: fixtures.rs (temporary roots and configuration), mocks.rs (fake trigger transport).

pub mod fixtures;
pub mod mocks;

pub use fixtures::{Workspace, wait_until};
pub use mocks::RecordingTransport;
