//! Default values applied when a configuration field is omitted.

/// Lower bound for both worker limits.
pub const MIN_WORKER_LIMIT: usize = 1;
/// Upper bound for both worker limits.
pub const MAX_WORKER_LIMIT: usize = 200;

pub(crate) const fn enabled() -> bool {
    true
}

pub(crate) const fn poll_interval() -> f64 {
    10.0
}

pub(crate) const fn min_workers() -> usize {
    1
}

pub(crate) const fn max_workers() -> usize {
    10
}

pub(crate) const fn track_time() -> f64 {
    1.0
}

pub(crate) fn retry_delays() -> Vec<f64> {
    vec![10.0, 30.0, 60.0, 300.0, 900.0]
}
