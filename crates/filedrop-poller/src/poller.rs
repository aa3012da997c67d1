//! Scan loop, restart recovery and failure scheduling.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use filedrop_config::PollerConfig;
use filedrop_events::Event;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::context::{FileContext, PollerEnv};
use crate::error::{ErrorKind, PollerError, PollerResult, StateError};
use crate::folder::Folder;
use crate::fsutil;
use crate::handler::FailureReport;
use crate::lockfile::{DEFAULT_LOCK_FILE_NAME, LockFile};
use crate::pool::{DEFAULT_KEEP_ALIVE, JobRunner, PoolStats, WorkerPool};
use crate::retry::RetryQueue;
use crate::state::StateKind;
use crate::statelog::read_log;

/// Scans are skipped while this many files are claimed and unfinished.
pub const MAX_FILES_IN_PROCESS: usize = 100;
/// Delay before re-offering a context the pool had no room for.
const RESUBMIT_DELAY: Duration = Duration::from_millis(100);

/// Scheduling knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerSettings {
    /// Pause between scan passes.
    pub poll_interval: Duration,
    /// Minimum live workers.
    pub min_workers: usize,
    /// Maximum live workers.
    pub max_workers: usize,
    /// Delay before each successive retry; its length bounds the retries.
    pub retry_delays: Vec<Duration>,
    /// Idle time before a surplus worker retires.
    pub keep_alive: Duration,
    /// How long shutdown waits for running jobs.
    pub shutdown_grace: Duration,
}

impl PollerSettings {
    /// Settings taken from the poller configuration.
    #[must_use]
    pub fn from_config(config: &PollerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            min_workers: config.min_concurrent_workers,
            max_workers: config.max_concurrent_workers,
            retry_delays: config.retry_delays(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Counters exposed to the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerStats {
    /// Worker pool counters.
    pub pool: PoolStats,
    /// Files claimed and not yet finished.
    pub files_in_process: usize,
    /// Contexts waiting for a retry.
    pub retry_queue_depth: usize,
    /// Folders currently held back, sorted.
    pub blocked_folders: Vec<String>,
}

/// State shared between the scanner and the workers.
struct Shared {
    env: Arc<PollerEnv>,
    retry: Mutex<RetryQueue>,
    in_process: AtomicUsize,
    /// Files holding each folder back.
    blocked: Mutex<HashMap<String, HashSet<String>>>,
    claimed: Mutex<HashSet<PathBuf>>,
    retry_delays: Vec<Duration>,
    shutdown: AtomicBool,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Worker body: run the machine to completion or hand the failure on.
    fn process(&self, mut ctx: FileContext) {
        loop {
            if ctx.is_finished() {
                self.complete(ctx);
                return;
            }
            if self.shutdown.load(Ordering::SeqCst) {
                ctx.close_log();
                info!(file_id = ?ctx.file_id(), state = ?ctx.current_kind(), "shutdown; file left resumable");
                return;
            }
            match ctx.execute_current() {
                Ok(true) => {}
                Ok(false) => {
                    let state = ctx.current_kind().map_or("unknown", StateKind::as_str);
                    let err = StateError::retry(format!("state {state} could not complete"));
                    self.handle_error(ctx, err);
                    return;
                }
                Err(err) => {
                    self.handle_error(ctx, err);
                    return;
                }
            }
        }
    }

    fn complete(&self, mut ctx: FileContext) {
        if let Err(err) = ctx.log_finished() {
            warn!(file_id = ?ctx.file_id(), error = %err, "cannot log finished state");
        }
        ctx.close_log();
        if let Some(folder) = ctx.processing_folder()
            && let Err(err) = fs::remove_dir_all(folder)
        {
            warn!(path = %folder.display(), error = %err, "cannot remove processing folder");
        }

        let metrics = &self.env.metrics;
        metrics.observe_processing(ctx.elapsed(), ctx.file_size());
        metrics.inc_file_processed("success");
        let file_id = ctx.file_id().unwrap_or_default().to_string();
        info!(
            file_id = %file_id,
            folder = %ctx.folder().name,
            original = %ctx.original_file().display(),
            elapsed_ms = ctx.elapsed().as_millis(),
            "file processed"
        );
        self.env.events.publish(Event::FileCompleted {
            file_id,
            folder: ctx.folder().name.clone(),
        });
        self.finish_context(&ctx);
    }

    /// Schedule a retry when the failure allows one, otherwise park the file.
    fn handle_error(&self, mut ctx: FileContext, err: StateError) {
        let kind = err.kind();
        let attempt = ctx.retry_count as usize;
        if !(kind.is_retryable() && attempt < self.retry_delays.len()) {
            self.fail(ctx, &err);
            return;
        }

        let delay = self.retry_delays[attempt];
        ctx.retry_count += 1;
        ctx.close_log();
        let file_id = ctx.file_id().unwrap_or_default().to_string();
        warn!(
            file_id = %file_id,
            kind = kind.as_str(),
            attempt = ctx.retry_count,
            delay_ms = delay.as_millis(),
            error = %err.detail(),
            "file processing failed; retry scheduled"
        );
        self.env.metrics.inc_file_retry(kind.as_str());
        self.env.events.publish(Event::FileRetryScheduled {
            file_id: file_id.clone(),
            kind: kind.as_str().to_string(),
            attempt: ctx.retry_count,
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        });

        if kind == ErrorKind::RetryBlockInput {
            let folder = ctx.folder().name.clone();
            if self.block(&folder, &file_id) {
                warn!(folder = %folder, file_id = %file_id, "folder blocked");
                self.env.events.publish(Event::FolderBlocked { folder, file_id });
            }
        }

        let depth = {
            let mut retry = locked(&self.retry);
            retry.push(Instant::now() + delay, ctx);
            retry.len()
        };
        self.env.metrics.set_retry_queue_depth(depth);
    }

    /// Park the file in the error folder and run the folder's error handler.
    fn fail(&self, mut ctx: FileContext, err: &StateError) {
        error!(
            file_id = ?ctx.file_id(),
            folder = %ctx.folder().name,
            state = ?ctx.current_kind(),
            kind = err.kind().as_str(),
            error = %err.detail(),
            "file processing aborted"
        );
        ctx.enter_error_state(err);
        if let Err(park) = ctx.execute_current() {
            error!(file_id = ?ctx.file_id(), error = %park.detail(), "cannot move file to the error folder");
        }
        ctx.close_log();

        let folder = Arc::clone(ctx.folder());
        folder.error_handler.handle(&FailureReport {
            file_id: ctx.file_id().unwrap_or_default(),
            folder: &folder.name,
            original_file: ctx.original_file(),
            error_location: ctx.error_folder(),
            error: err,
            events: &self.env.events,
            metrics: &self.env.metrics,
        });
        self.env.metrics.inc_file_processed("error");
        self.finish_context(&ctx);
    }

    /// Mark the context as owned by the pipeline.
    fn claim(&self, ctx: &mut FileContext) {
        if !ctx.in_process {
            ctx.in_process = true;
            let count = self.in_process.fetch_add(1, Ordering::SeqCst) + 1;
            self.env.metrics.set_files_in_process(count);
        }
        if ctx.current_file() == ctx.original_file() && !ctx.original_file().as_os_str().is_empty() {
            locked(&self.claimed).insert(ctx.original_file().to_path_buf());
        }
    }

    fn finish_context(&self, ctx: &FileContext) {
        if ctx.in_process {
            let count = self
                .in_process
                .fetch_sub(1, Ordering::SeqCst)
                .saturating_sub(1);
            self.env.metrics.set_files_in_process(count);
        }
        locked(&self.claimed).remove(ctx.original_file());

        if let Some(file_id) = ctx.file_id() {
            let folder = &ctx.folder().name;
            if self.unblock(folder, file_id) {
                info!(folder = %folder, "folder unblocked");
                self.env.events.publish(Event::FolderUnblocked {
                    folder: folder.clone(),
                });
            }
        }
    }

    /// Hold `folder` back until `file_id` finishes. Returns whether the folder was open.
    fn block(&self, folder: &str, file_id: &str) -> bool {
        let mut blocked = locked(&self.blocked);
        let blockers = blocked.entry(folder.to_string()).or_default();
        let newly_blocked = blockers.is_empty();
        blockers.insert(file_id.to_string());
        newly_blocked
    }

    /// Drop `file_id`'s hold on `folder`. Returns whether the folder is open again.
    fn unblock(&self, folder: &str, file_id: &str) -> bool {
        let mut blocked = locked(&self.blocked);
        let Some(blockers) = blocked.get_mut(folder) else {
            return false;
        };
        if !blockers.remove(file_id) || !blockers.is_empty() {
            return false;
        }
        blocked.remove(folder);
        true
    }

    fn is_blocked(&self, folder: &str) -> bool {
        locked(&self.blocked).contains_key(folder)
    }

    fn is_claimed(&self, path: &Path) -> bool {
        locked(&self.claimed).contains(path)
    }

    fn stats(&self, pool: &WorkerPool) -> PollerStats {
        let mut blocked_folders: Vec<_> = locked(&self.blocked).keys().cloned().collect();
        blocked_folders.sort();
        PollerStats {
            pool: pool.stats(),
            files_in_process: self.in_process.load(Ordering::SeqCst),
            retry_queue_depth: locked(&self.retry).len(),
            blocked_folders,
        }
    }
}

/// Runtime controls that stay usable while [`Poller::run`] owns the poller.
#[derive(Clone)]
pub struct PollerHandle {
    shared: Arc<Shared>,
    pool: WorkerPool,
}

impl std::fmt::Debug for PollerHandle {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PollerHandle")
            .field("stats", &self.stats())
            .finish()
    }
}

impl PollerHandle {
    /// Apply new worker limits.
    ///
    /// # Errors
    ///
    /// Returns an error when the limits are invalid.
    pub fn resize_pool(&self, min: usize, max: usize) -> PollerResult<()> {
        self.pool.resize(min, max)?;
        self.shared.env.events.publish(Event::PoolResized {
            min_workers: min,
            max_workers: max,
        });
        Ok(())
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> PollerStats {
        self.shared.stats(&self.pool)
    }
}

/// The directory poller.
pub struct Poller {
    shared: Arc<Shared>,
    pool: WorkerPool,
    settings: PollerSettings,
    tracked: HashMap<PathBuf, FileContext>,
    lock_failed: HashSet<String>,
    root_lock: LockFile,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Poller")
            .field("settings", &self.settings)
            .field("tracked", &self.tracked.len())
            .field("root_lock", &self.root_lock.path())
            .finish_non_exhaustive()
    }
}

impl Poller {
    /// Take ownership of the processing root, start the workers and queue
    /// every leftover processing folder for resumption.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error when a root cannot be created, the processing root is
    /// locked by another process, or the pool cannot start.
    pub fn start(env: PollerEnv, settings: PollerSettings) -> PollerResult<Self> {
        for root in [Some(&env.processing_root), Some(&env.error_root), env.app_processing_root.as_ref()]
            .into_iter()
            .flatten()
        {
            fs::create_dir_all(root).map_err(|source| PollerError::io("root.create", root, source))?;
        }

        let mut root_lock = LockFile::new(&env.processing_root);
        root_lock
            .acquire(false)
            .map_err(|source| PollerError::Lock { source })?;

        let shared = Arc::new(Shared {
            env: Arc::new(env),
            retry: Mutex::new(RetryQueue::new()),
            in_process: AtomicUsize::new(0),
            blocked: Mutex::new(HashMap::new()),
            claimed: Mutex::new(HashSet::new()),
            retry_delays: settings.retry_delays.clone(),
            shutdown: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let runner: JobRunner = Arc::new(move |ctx| worker_shared.process(ctx));
        let pool = WorkerPool::new(
            settings.min_workers,
            settings.max_workers,
            settings.keep_alive,
            runner,
            shared.env.metrics.clone(),
        )?;

        let poller = Self {
            shared,
            pool,
            settings,
            tracked: HashMap::new(),
            lock_failed: HashSet::new(),
            root_lock,
        };
        poller.restart_leftovers()?;
        info!(
            processing_root = %poller.shared.env.processing_root.display(),
            folders = poller.shared.env.folders.len(),
            "poller started"
        );
        Ok(poller)
    }

    /// Controls usable from other tasks.
    #[must_use]
    pub fn handle(&self) -> PollerHandle {
        PollerHandle {
            shared: Arc::clone(&self.shared),
            pool: self.pool.clone(),
        }
    }

    /// Scan until `shutdown` turns true, then stop the workers.
    ///
    /// # Errors
    ///
    /// Returns an error when a scan pass panics.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> PollerResult<()> {
        let mut poller = self;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let started = Instant::now();
            poller = tokio::task::spawn_blocking(move || {
                poller.scan_once();
                poller
            })
            .await
            .map_err(|source| PollerError::Join {
                operation: "scan",
                source,
            })?;
            poller.shared.env.metrics.observe_scan(started.elapsed());

            tokio::select! {
                () = sleep(poller.settings.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        poller.stop().await;
        Ok(())
    }

    /// Stop scanning, let running jobs finish and release the processing root.
    pub async fn stop(self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let pending = self.pool.shutdown(self.settings.shutdown_grace).await;
        let waiting = locked(&self.shared.retry).drain();
        info!(
            queued = pending.len(),
            retrying = waiting.len(),
            tracked = self.tracked.len(),
            "poller stopped; unfinished files stay resumable"
        );
        for mut ctx in pending.into_iter().chain(waiting) {
            ctx.close_log();
        }
    }

    /// One scan pass: dispatch due retries, then look at every folder.
    pub fn scan_once(&mut self) {
        if !self.dispatch_due_retries() {
            debug!("worker queue full; scan skipped");
            return;
        }
        let in_process = self.shared.in_process.load(Ordering::SeqCst);
        if in_process >= MAX_FILES_IN_PROCESS {
            debug!(in_process, "too many files in process; scan skipped");
            return;
        }

        let folders: Vec<Arc<Folder>> = self.shared.env.folders.iter().cloned().collect();
        let mut seen = HashSet::new();
        for folder in folders {
            self.scan_folder(&folder, &mut seen);
        }
        self.tracked.retain(|path, _| seen.contains(path));
    }

    /// Returns `false` when the pool had no room for a due context.
    fn dispatch_due_retries(&self) -> bool {
        let now = Instant::now();
        let mut room = true;
        loop {
            let due = locked(&self.shared.retry).pop_due(now);
            let Some(ctx) = due else {
                break;
            };
            if let Err(ctx) = self.pool.submit(ctx) {
                locked(&self.shared.retry).push(now, ctx);
                room = false;
                break;
            }
        }
        let depth = locked(&self.shared.retry).len();
        self.shared.env.metrics.set_retry_queue_depth(depth);
        room
    }

    fn scan_folder(&mut self, folder: &Arc<Folder>, seen: &mut HashSet<PathBuf>) {
        if self.shared.is_blocked(&folder.name) {
            debug!(folder = %folder.name, "folder blocked; scan skipped");
            return;
        }

        let mut lock = LockFile::new(&folder.location);
        match lock.acquire(true) {
            Ok(true) => {
                if self.lock_failed.remove(&folder.name) {
                    info!(folder = %folder.name, "folder lock acquired again");
                }
            }
            Ok(false) => {
                if self.lock_failed.insert(folder.name.clone()) {
                    warn!(folder = %folder.name, path = %folder.location.display(), "folder is locked by another process");
                }
                return;
            }
            Err(err) => {
                if self.lock_failed.insert(folder.name.clone()) {
                    error!(folder = %folder.name, error = %err, "cannot lock folder");
                }
                return;
            }
        }

        let entries = match fs::read_dir(&folder.location) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(folder = %folder.name, error = %err, "cannot list folder");
                return;
            }
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_file()))
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name != DEFAULT_LOCK_FILE_NAME && folder.accepts(&name)
            })
            .map(|entry| entry.path())
            .collect();
        files.sort();

        for path in files {
            if self.shared.is_blocked(&folder.name) {
                break;
            }
            if self.shared.is_claimed(&path) {
                continue;
            }
            seen.insert(path.clone());

            let ctx = match self.tracked.remove(&path) {
                Some(ctx) => ctx,
                None => {
                    let Ok((size, modified)) = fsutil::snapshot(&path) else {
                        continue;
                    };
                    self.shared.env.metrics.inc_file_seen();
                    self.shared.env.events.publish(Event::FileDiscovered {
                        folder: folder.name.clone(),
                        path: path.display().to_string(),
                    });
                    debug!(folder = %folder.name, path = %path.display(), "file discovered");
                    FileContext::discovered(
                        Arc::clone(folder),
                        Arc::clone(&self.shared.env),
                        path.clone(),
                        size,
                        modified,
                    )
                }
            };
            self.track(ctx, path);
        }
        lock.release();
    }

    /// Advance a tracked file until it waits again or is ready for a worker.
    fn track(&mut self, mut ctx: FileContext, path: PathBuf) {
        loop {
            if ctx.current_kind() == Some(StateKind::InProcessing) {
                self.dispatch(ctx);
                return;
            }
            match ctx.execute_current() {
                Ok(true) => {}
                Ok(false) => {
                    self.tracked.insert(path, ctx);
                    return;
                }
                Err(err) => {
                    if ctx.processing_folder().is_none() {
                        warn!(
                            path = %path.display(),
                            kind = err.kind().as_str(),
                            error = %err.detail(),
                            "file dropped before it was claimed"
                        );
                        return;
                    }
                    self.shared.claim(&mut ctx);
                    self.shared.handle_error(ctx, err);
                    return;
                }
            }
        }
    }

    fn dispatch(&self, mut ctx: FileContext) {
        if !ctx.in_process {
            self.shared.claim(&mut ctx);
            let file_id = ctx.file_id().unwrap_or_default().to_string();
            info!(file_id = %file_id, path = %ctx.current_file().display(), "file claimed");
            self.shared.env.events.publish(Event::FileClaimed {
                file_id,
                folder: ctx.folder().name.clone(),
                processing_path: ctx.current_file().display().to_string(),
            });
        }
        if let Err(ctx) = self.pool.submit(ctx) {
            debug!(file_id = ?ctx.file_id(), "worker queue full; file deferred");
            locked(&self.shared.retry).push(Instant::now() + RESUBMIT_DELAY, ctx);
        }
    }

    /// Queue every leftover processing folder for resumption.
    fn restart_leftovers(&self) -> PollerResult<()> {
        let env = &self.shared.env;
        let entries = fs::read_dir(&env.processing_root)
            .map_err(|source| PollerError::io("restart.list", &env.processing_root, source))?;

        for entry in entries {
            let entry =
                entry.map_err(|source| PollerError::io("restart.entry", &env.processing_root, source))?;
            if !entry.file_type().is_ok_and(|kind| kind.is_dir()) {
                continue;
            }
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(folder) = name
                .rsplit_once('-')
                .and_then(|(folder, _)| env.folders.get(folder))
            else {
                warn!(path = %path.display(), "leftover processing folder belongs to no configured folder");
                continue;
            };

            env.metrics.inc_file_restarted();
            let mut ctx = FileContext::restored(Arc::clone(folder), Arc::clone(env), path.clone());
            let has_log = ctx.log_path().is_some_and(|log| log.is_file());
            let restored = if has_log { read_log(&mut ctx, None) } else { Ok(None) };
            ctx.set_file_id_if_missing(&name);

            let last = match restored {
                Ok(last) => last,
                Err(err) => {
                    self.shared.claim(&mut ctx);
                    self.shared.fail(ctx, &err);
                    continue;
                }
            };
            let state = match last {
                Some(state) if state.kind() == StateKind::Resume => state,
                other => StateKind::Resume.create(other.map(Box::new)),
            };
            if state.is_finished() {
                info!(path = %path.display(), "leftover processing folder already finished");
                if let Err(err) = fs::remove_dir_all(&path) {
                    warn!(path = %path.display(), error = %err, "cannot remove finished processing folder");
                }
                continue;
            }

            ctx.set_current_state(state);
            self.shared.claim(&mut ctx);
            info!(file_id = %name, path = %path.display(), "resuming leftover processing folder");
            env.events.publish(Event::FileResumed {
                file_id: ctx.file_id().unwrap_or(&name).to_string(),
                folder: folder.name.clone(),
            });
            locked(&self.shared.retry).push(Instant::now(), ctx);
        }
        Ok(())
    }
}
