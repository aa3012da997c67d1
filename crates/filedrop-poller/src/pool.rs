//! Bounded worker pool that owns contexts while they are processed.
//!
//! Workers are tokio tasks pulling from a shared queue; each job runs on the
//! blocking pool because state execution does synchronous IO. The number of
//! live workers floats between `min` and `max`: extra workers are spawned when
//! queued work outnumbers idle workers, and idle extras retire after the
//! keep-alive.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use filedrop_telemetry::Metrics;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::context::FileContext;
use crate::error::{PollerError, PollerResult};

/// Work queue capacity.
pub const QUEUE_CAPACITY: usize = 30;
/// Idle time after which a worker above the minimum retires.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Job body executed for each context.
pub type JobRunner = Arc<dyn Fn(FileContext) + Send + Sync>;

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Live workers.
    pub live: usize,
    /// Workers running a job.
    pub active: usize,
    /// Contexts waiting in the queue.
    pub queued: usize,
    /// Minimum live workers.
    pub min: usize,
    /// Maximum live workers.
    pub max: usize,
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    min: usize,
    max: usize,
}

struct PoolInner {
    sender: mpsc::Sender<FileContext>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<FileContext>>,
    limits: Mutex<Limits>,
    live: AtomicUsize,
    active: AtomicUsize,
    queued: AtomicUsize,
    next_worker_id: AtomicUsize,
    runner: JobRunner,
    runtime: Handle,
    shutdown: watch::Sender<bool>,
    keep_alive: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    metrics: Metrics,
}

/// Handle to the worker pool. Clones share the same pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("WorkerPool")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Start a pool with `min` workers.
    ///
    /// # Errors
    ///
    /// Returns an error when the limits are invalid or no tokio runtime is running.
    pub fn new(
        min: usize,
        max: usize,
        keep_alive: Duration,
        runner: JobRunner,
        metrics: Metrics,
    ) -> PollerResult<Self> {
        filedrop_config::validate_worker_limits(min, max)
            .map_err(|source| PollerError::PoolLimits { source })?;
        let runtime = Handle::try_current().map_err(|source| PollerError::Runtime { source })?;
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        let pool = Self {
            inner: Arc::new(PoolInner {
                sender,
                receiver: tokio::sync::Mutex::new(receiver),
                limits: Mutex::new(Limits { min, max }),
                live: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
                next_worker_id: AtomicUsize::new(0),
                runner,
                runtime,
                shutdown,
                keep_alive,
                tasks: Mutex::new(Vec::new()),
                metrics,
            }),
        };
        for _ in 0..min {
            pool.spawn_worker();
        }
        info!(min, max, "worker pool started");
        Ok(pool)
    }

    /// Queue a context. The context is handed back when the queue is full or
    /// the pool is shutting down.
    ///
    /// # Errors
    ///
    /// Returns the context that could not be queued.
    pub fn submit(&self, ctx: FileContext) -> Result<(), FileContext> {
        if *self.inner.shutdown.borrow() {
            return Err(ctx);
        }
        // Counted before the send so a worker never decrements an entry the
        // submitter has not yet recorded.
        let queued = self.inner.queued.fetch_add(1, Ordering::SeqCst) + 1;
        match self.inner.sender.try_send(ctx) {
            Ok(()) => {
                let live = self.inner.live.load(Ordering::SeqCst);
                let active = self.inner.active.load(Ordering::SeqCst);
                if live.saturating_sub(active) < queued && live < self.limits().max {
                    self.spawn_worker();
                }
                self.publish_load();
                Ok(())
            }
            Err(TrySendError::Full(ctx) | TrySendError::Closed(ctx)) => {
                self.inner.queued.fetch_sub(1, Ordering::SeqCst);
                Err(ctx)
            }
        }
    }

    /// Change the worker limits. Surplus workers retire once idle.
    ///
    /// # Errors
    ///
    /// Returns an error when the limits are invalid.
    pub fn resize(&self, min: usize, max: usize) -> PollerResult<()> {
        filedrop_config::validate_worker_limits(min, max)
            .map_err(|source| PollerError::PoolLimits { source })?;
        *self
            .inner
            .limits
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Limits { min, max };
        while self.inner.live.load(Ordering::SeqCst) < min {
            self.spawn_worker();
        }
        info!(min, max, "worker pool resized");
        Ok(())
    }

    /// Current counters and limits.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let limits = self.limits();
        PoolStats {
            live: self.inner.live.load(Ordering::SeqCst),
            active: self.inner.active.load(Ordering::SeqCst),
            queued: self.inner.queued.load(Ordering::SeqCst),
            min: limits.min,
            max: limits.max,
        }
    }

    /// Stop accepting work, let running jobs finish and return the contexts
    /// that were still queued.
    pub async fn shutdown(&self, grace: Duration) -> Vec<FileContext> {
        self.inner.shutdown.send_replace(true);
        let tasks: Vec<_> = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        let joined = timeout(grace, async {
            for task in tasks {
                if let Err(err) = task.await {
                    warn!(error = %err, "worker task ended abnormally");
                }
            }
        })
        .await;
        if joined.is_err() {
            warn!(grace_ms = grace.as_millis(), "workers still running after shutdown grace period");
        }

        let mut pending = Vec::new();
        let mut receiver = self.inner.receiver.lock().await;
        while let Ok(ctx) = receiver.try_recv() {
            self.inner.queued.fetch_sub(1, Ordering::SeqCst);
            pending.push(ctx);
        }
        self.publish_load();
        info!(pending = pending.len(), "worker pool stopped");
        pending
    }

    fn limits(&self) -> Limits {
        *self
            .inner
            .limits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_worker(&self) {
        let id = self.inner.next_worker_id.fetch_add(1, Ordering::SeqCst);
        self.inner.live.fetch_add(1, Ordering::SeqCst);
        let handle = self.inner.runtime.spawn(worker_loop(Arc::clone(&self.inner), id));
        let mut tasks = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
        drop(tasks);
        self.publish_load();
    }

    fn publish_load(&self) {
        publish_load(&self.inner);
    }
}

fn publish_load(inner: &PoolInner) {
    inner.metrics.set_pool_load(
        inner.live.load(Ordering::SeqCst),
        inner.active.load(Ordering::SeqCst),
        inner.queued.load(Ordering::SeqCst),
    );
}

/// Decrement `live` when it is above `floor`. Returns whether the worker retired.
fn try_retire(inner: &PoolInner, floor: usize) -> bool {
    inner
        .live
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
            (live > floor).then(|| live - 1)
        })
        .is_ok()
}

async fn worker_loop(inner: Arc<PoolInner>, id: usize) {
    debug!(worker = id, "worker started");
    let mut shutdown = inner.shutdown.subscribe();

    loop {
        if *shutdown.borrow() {
            inner.live.fetch_sub(1, Ordering::SeqCst);
            break;
        }
        let max = inner
            .limits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .max;
        if try_retire(&inner, max) {
            debug!(worker = id, "worker retired above maximum");
            break;
        }

        let job = tokio::select! {
            job = async { inner.receiver.lock().await.recv().await } => job,
            () = sleep(inner.keep_alive) => {
                let min = inner
                    .limits
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .min;
                if try_retire(&inner, min) {
                    debug!(worker = id, "idle worker retired");
                    break;
                }
                continue;
            }
            _ = shutdown.changed() => continue,
        };

        let Some(ctx) = job else {
            inner.live.fetch_sub(1, Ordering::SeqCst);
            break;
        };
        inner.queued.fetch_sub(1, Ordering::SeqCst);
        inner.active.fetch_add(1, Ordering::SeqCst);
        publish_load(&inner);

        let runner = Arc::clone(&inner.runner);
        if let Err(err) = tokio::task::spawn_blocking(move || runner(ctx)).await {
            error!(worker = id, error = %err, "file job panicked");
        }

        inner.active.fetch_sub(1, Ordering::SeqCst);
        publish_load(&inner);
    }

    publish_load(&inner);
    debug!(worker = id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::testing::Fixture;

    fn counting_runner(counter: &Arc<AtomicUsize>) -> JobRunner {
        let counter = Arc::clone(counter);
        Arc::new(move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn submitted_contexts_are_processed() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let env = fixture.env(&[fixture.folder(false, false)])?;
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(
            1,
            3,
            Duration::from_millis(50),
            counting_runner(&counter),
            fixture.metrics.clone(),
        )?;

        for index in 0..5 {
            let ctx = fixture.discover(&env, &format!("file-{index}.txt"), "x")?;
            assert!(pool.submit(ctx).is_ok());
        }
        for _ in 0..100 {
            if counter.load(Ordering::SeqCst) == 5 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert!(pool.stats().live <= 3);

        let pending = pool.shutdown(Duration::from_secs(1)).await;
        assert!(pending.is_empty());
        let ctx = fixture.discover(&env, "late.txt", "x")?;
        assert!(pool.submit(ctx).is_err(), "a stopped pool hands contexts back");
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submitters_keep_queue_count_consistent() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let env = fixture.env(&[fixture.folder(false, false)])?;
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(
            1,
            4,
            Duration::from_millis(50),
            counting_runner(&counter),
            fixture.metrics.clone(),
        )?;

        let mut batches = Vec::new();
        for thread in 0..4 {
            let mut batch = Vec::new();
            for index in 0..25 {
                batch.push(fixture.discover(&env, &format!("t{thread}-{index}.txt"), "x")?);
            }
            batches.push(batch);
        }

        let accepted = std::thread::scope(|scope| {
            let handles: Vec<_> = batches
                .into_iter()
                .map(|batch| {
                    let pool = pool.clone();
                    scope.spawn(move || {
                        let mut accepted = 0;
                        for ctx in batch {
                            if pool.submit(ctx).is_ok() {
                                accepted += 1;
                            }
                            // Submitters and workers between send and count add slack.
                            assert!(pool.stats().queued <= QUEUE_CAPACITY + 8);
                        }
                        accepted
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("submitter thread panicked"))
                .sum::<usize>()
        });
        assert!(accepted > 0);

        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) == accepted {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), accepted);
        assert_eq!(pool.stats().queued, 0);
        pool.shutdown(Duration::from_secs(1)).await;
        Ok(())
    }

    #[tokio::test]
    async fn invalid_limits_are_rejected() -> anyhow::Result<()> {
        let metrics = Metrics::new()?;
        let runner: JobRunner = Arc::new(|_ctx| {});
        assert!(WorkerPool::new(0, 2, DEFAULT_KEEP_ALIVE, Arc::clone(&runner), metrics.clone()).is_err());
        assert!(WorkerPool::new(3, 2, DEFAULT_KEEP_ALIVE, Arc::clone(&runner), metrics.clone()).is_err());

        let pool = WorkerPool::new(1, 2, DEFAULT_KEEP_ALIVE, runner, metrics)?;
        assert!(matches!(pool.resize(0, 0), Err(PollerError::PoolLimits { .. })));
        pool.resize(2, 4)?;
        let stats = pool.stats();
        assert_eq!((stats.min, stats.max), (2, 4));
        assert_eq!(stats.live, 2);
        pool.shutdown(Duration::from_secs(1)).await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn idle_workers_above_minimum_retire() -> anyhow::Result<()> {
        let metrics = Metrics::new()?;
        let runner: JobRunner = Arc::new(|_ctx| {});
        let pool = WorkerPool::new(1, 3, Duration::from_millis(20), runner, metrics)?;
        pool.resize(3, 3)?;
        assert_eq!(pool.stats().live, 3);

        pool.resize(1, 3)?;
        for _ in 0..100 {
            if pool.stats().live == 1 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pool.stats().live, 1);
        pool.shutdown(Duration::from_secs(1)).await;
        Ok(())
    }
}
