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

//! Telemetry primitives shared across the filedrop workspace.
//!
//! Layout: `init.rs` (tracing subscriber), `context.rs` (daemon span),
//! `metrics.rs` (Prometheus registry), `error.rs` (telemetry errors).

pub mod context;
pub mod error;
pub mod init;
pub mod metrics;

pub use context::daemon_span;
pub use error::{TelemetryError, TelemetryResult};
pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging};
pub use metrics::{Metrics, MetricsSnapshot};
