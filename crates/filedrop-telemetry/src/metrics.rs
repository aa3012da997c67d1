//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Counters follow the file lifecycle: seen, restarted, processed, retried, alerted.
//! - Gauges expose pool and queue load for operational monitoring.

use std::convert::TryFrom;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{TelemetryError, TelemetryResult};

/// Prometheus-backed metrics registry shared across the poller and daemon.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

struct MetricsInner {
    registry: Registry,
    files_seen_total: IntCounter,
    files_restarted_total: IntCounter,
    files_processed_total: IntCounterVec,
    file_retries_total: IntCounterVec,
    file_alerts_total: IntCounter,
    workers_live: IntGauge,
    workers_active: IntGauge,
    work_queue_depth: IntGauge,
    retry_queue_depth: IntGauge,
    files_in_process: IntGauge,
    scan_duration_ms: IntGauge,
    trigger_duration_ms: IntGauge,
    processing_duration_ms: IntGauge,
    last_file_size_bytes: IntGauge,
    config_apply_latency_ms: IntGauge,
    config_update_failures_total: IntCounter,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Files observed in watched folders.
    pub files_seen_total: u64,
    /// Files picked up again from leftover processing folders.
    pub files_restarted_total: u64,
    /// Files that reached the finished state.
    pub files_succeeded_total: u64,
    /// Files parked in the error folder.
    pub files_failed_total: u64,
    /// File processing alerts raised.
    pub file_alerts_total: u64,
    /// Live worker tasks.
    pub workers_live: i64,
    /// Workers currently executing a file.
    pub workers_active: i64,
    /// Files waiting in the work queue.
    pub work_queue_depth: i64,
    /// Files waiting for a retry slot.
    pub retry_queue_depth: i64,
    /// Files claimed but not yet finished.
    pub files_in_process: i64,
}

fn collector<C>(name: &'static str, built: prometheus::Result<C>) -> TelemetryResult<C> {
    built.map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> TelemetryResult<()>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

fn counter(registry: &Registry, name: &'static str, help: &str) -> TelemetryResult<IntCounter> {
    let counter = collector(name, IntCounter::with_opts(Opts::new(name, help)))?;
    register(registry, name, &counter)?;
    Ok(counter)
}

fn counter_vec(
    registry: &Registry,
    name: &'static str,
    help: &str,
    labels: &[&str],
) -> TelemetryResult<IntCounterVec> {
    let counter = collector(name, IntCounterVec::new(Opts::new(name, help), labels))?;
    register(registry, name, &counter)?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &'static str, help: &str) -> TelemetryResult<IntGauge> {
    let gauge = collector(name, IntGauge::with_opts(Opts::new(name, help)))?;
    register(registry, name, &gauge)?;
    Ok(gauge)
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> TelemetryResult<Self> {
        let registry = Registry::new();
        let inner = MetricsInner {
            files_seen_total: counter(
                &registry,
                "files_seen_total",
                "Files observed in watched folders",
            )?,
            files_restarted_total: counter(
                &registry,
                "files_restarted_total",
                "Files resumed from leftover processing folders",
            )?,
            files_processed_total: counter_vec(
                &registry,
                "files_processed_total",
                "Files that left the pipeline by outcome",
                &["outcome"],
            )?,
            file_retries_total: counter_vec(
                &registry,
                "file_retries_total",
                "Retries scheduled by failure kind",
                &["kind"],
            )?,
            file_alerts_total: counter(
                &registry,
                "file_alerts_total",
                "File processing alerts raised",
            )?,
            workers_live: gauge(&registry, "workers_live", "Live worker tasks")?,
            workers_active: gauge(&registry, "workers_active", "Workers executing a file")?,
            work_queue_depth: gauge(&registry, "work_queue_depth", "Files queued for workers")?,
            retry_queue_depth: gauge(
                &registry,
                "retry_queue_depth",
                "Files waiting for a retry slot",
            )?,
            files_in_process: gauge(
                &registry,
                "files_in_process",
                "Files claimed and not yet finished",
            )?,
            scan_duration_ms: gauge(
                &registry,
                "scan_duration_ms",
                "Duration of the latest folder scan pass (ms)",
            )?,
            trigger_duration_ms: gauge(
                &registry,
                "trigger_duration_ms",
                "Duration of the latest trigger submission (ms)",
            )?,
            processing_duration_ms: gauge(
                &registry,
                "processing_duration_ms",
                "Duration of the latest file processing run (ms)",
            )?,
            last_file_size_bytes: gauge(
                &registry,
                "last_file_size_bytes",
                "Size of the latest processed file",
            )?,
            config_apply_latency_ms: gauge(
                &registry,
                "config_apply_latency_ms",
                "Time taken to apply configuration updates (ms)",
            )?,
            config_update_failures_total: counter(
                &registry,
                "config_update_failures_total",
                "Configuration reload failures",
            )?,
            registry,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Count a file observed in a watched folder.
    pub fn inc_file_seen(&self) {
        self.inner.files_seen_total.inc();
    }

    /// Count a file resumed from a leftover processing folder.
    pub fn inc_file_restarted(&self) {
        self.inner.files_restarted_total.inc();
    }

    /// Count a file leaving the pipeline with the given outcome (`success` or `error`).
    pub fn inc_file_processed(&self, outcome: &str) {
        self.inner
            .files_processed_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Count a scheduled retry for the given failure kind.
    pub fn inc_file_retry(&self, kind: &str) {
        self.inner
            .file_retries_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Count a raised file processing alert.
    pub fn inc_file_alert(&self) {
        self.inner.file_alerts_total.inc();
    }

    /// Publish worker pool counters.
    pub fn set_pool_load(&self, live: usize, active: usize, queued: usize) {
        self.inner.workers_live.set(Self::count_to_i64(live));
        self.inner.workers_active.set(Self::count_to_i64(active));
        self.inner.work_queue_depth.set(Self::count_to_i64(queued));
    }

    /// Publish the retry queue length.
    pub fn set_retry_queue_depth(&self, depth: usize) {
        self.inner.retry_queue_depth.set(Self::count_to_i64(depth));
    }

    /// Publish the number of files claimed and not yet finished.
    pub fn set_files_in_process(&self, count: usize) {
        self.inner.files_in_process.set(Self::count_to_i64(count));
    }

    /// Record the duration of a folder scan pass.
    pub fn observe_scan(&self, duration: Duration) {
        self.inner
            .scan_duration_ms
            .set(Self::duration_to_ms(duration));
    }

    /// Record the duration of a trigger submission.
    pub fn observe_trigger(&self, duration: Duration) {
        self.inner
            .trigger_duration_ms
            .set(Self::duration_to_ms(duration));
    }

    /// Record a completed processing run and the size of the file it handled.
    pub fn observe_processing(&self, duration: Duration, file_size: u64) {
        self.inner
            .processing_duration_ms
            .set(Self::duration_to_ms(duration));
        self.inner
            .last_file_size_bytes
            .set(i64::try_from(file_size).unwrap_or(i64::MAX));
    }

    /// Record the observed latency for applying configuration updates.
    pub fn observe_config_apply_latency(&self, duration: Duration) {
        self.inner
            .config_apply_latency_ms
            .set(Self::duration_to_ms(duration));
    }

    /// Increment the configuration reload failure counter.
    pub fn inc_config_update_failure(&self) {
        self.inner.config_update_failures_total.inc();
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let processed = &self.inner.files_processed_total;
        MetricsSnapshot {
            files_seen_total: self.inner.files_seen_total.get(),
            files_restarted_total: self.inner.files_restarted_total.get(),
            files_succeeded_total: processed.with_label_values(&["success"]).get(),
            files_failed_total: processed.with_label_values(&["error"]).get(),
            file_alerts_total: self.inner.file_alerts_total.get(),
            workers_live: self.inner.workers_live.get(),
            workers_active: self.inner.workers_active.get(),
            work_queue_depth: self.inner.work_queue_depth.get(),
            retry_queue_depth: self.inner.retry_queue_depth.get(),
            files_in_process: self.inner.files_in_process.get(),
        }
    }

    /// Convert a duration to milliseconds saturating at `i64::MAX`.
    pub(crate) fn duration_to_ms(duration: Duration) -> i64 {
        i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
    }

    fn count_to_i64(count: usize) -> i64 {
        i64::try_from(count).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_to_ms_saturates_on_large_values() {
        let duration = Duration::from_secs(u64::MAX / 2);
        assert_eq!(Metrics::duration_to_ms(duration), i64::MAX);
    }

    #[test]
    fn debug_output_includes_snapshot() -> anyhow::Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_file_seen();
        let rendered = format!("{metrics:?}");
        assert!(rendered.starts_with("Metrics"));
        assert!(rendered.contains("files_seen_total: 1"));
        Ok(())
    }

    #[test]
    fn metrics_snapshot_reflects_updates() -> anyhow::Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_file_seen();
        metrics.inc_file_seen();
        metrics.inc_file_restarted();
        metrics.inc_file_processed("success");
        metrics.inc_file_processed("error");
        metrics.inc_file_retry("retry");
        metrics.inc_file_alert();
        metrics.set_pool_load(3, 1, 4);
        metrics.set_retry_queue_depth(2);
        metrics.set_files_in_process(5);
        metrics.observe_scan(Duration::from_millis(12));
        metrics.observe_processing(Duration::from_millis(40), 10);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.files_seen_total, 2);
        assert_eq!(snapshot.files_restarted_total, 1);
        assert_eq!(snapshot.files_succeeded_total, 1);
        assert_eq!(snapshot.files_failed_total, 1);
        assert_eq!(snapshot.file_alerts_total, 1);
        assert_eq!(snapshot.workers_live, 3);
        assert_eq!(snapshot.workers_active, 1);
        assert_eq!(snapshot.work_queue_depth, 4);
        assert_eq!(snapshot.retry_queue_depth, 2);
        assert_eq!(snapshot.files_in_process, 5);

        let rendered = metrics.render()?;
        assert!(rendered.contains(r#"file_retries_total{kind="retry"} 1"#));
        assert!(rendered.contains("scan_duration_ms 12"));
        Ok(())
    }
}
