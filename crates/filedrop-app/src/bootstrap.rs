use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use filedrop_config::{ConfigSnapshot, ConfigWatcher, watch_config};
use filedrop_events::{Event, EventBus};
use filedrop_poller::{HandlerRegistry, Poller, PollerEnv, PollerHandle, PollerSettings};
use filedrop_telemetry::{LogFormat, LoggingConfig, Metrics, daemon_span, init_logging};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

use crate::error::{AppError, AppResult};
use crate::transport::{DEFAULT_TIMEOUT, HttpTransport};

/// How often the configuration documents are checked for changes.
const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Dependencies required to bootstrap the daemon.
#[derive(Debug)]
pub(crate) struct BootstrapDependencies {
    logging: LoggingConfig<'static>,
    config_path: PathBuf,
    trigger_url: String,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the environment.
    pub(crate) fn from_env() -> AppResult<Self> {
        let config_path = std::env::var_os("FILEDROP_CONFIG")
            .map(PathBuf::from)
            .ok_or(AppError::MissingEnv {
                name: "FILEDROP_CONFIG",
            })?;
        let trigger_url = std::env::var("FILEDROP_TRIGGER_URL").map_err(|_| AppError::MissingEnv {
            name: "FILEDROP_TRIGGER_URL",
        })?;
        let format = std::env::var("FILEDROP_LOG_FORMAT").ok();

        Ok(Self {
            logging: LoggingConfig {
                format: LogFormat::from_name(format.as_deref()),
                build_sha: option_env!("FILEDROP_BUILD_SHA").unwrap_or("dev"),
                ..LoggingConfig::default()
            },
            config_path,
            trigger_url,
        })
    }
}

/// Entry point for the daemon boot sequence. Runs until Ctrl-C.
///
/// # Errors
///
/// Returns an error if dependency construction or start-up fails.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env()?;
    init_logging(&dependencies.logging).map_err(|err| AppError::telemetry("telemetry.init", err))?;

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "cannot listen for shutdown signal");
        }
    };
    run_app_with(dependencies, shutdown)
        .instrument(daemon_span())
        .await
}

/// Boot sequence driven by injected dependencies and a shutdown future.
pub(crate) async fn run_app_with(
    dependencies: BootstrapDependencies,
    shutdown: impl Future<Output = ()>,
) -> AppResult<()> {
    info!(config = %dependencies.config_path.display(), "filedrop daemon starting");

    let (snapshot, watcher) = watch_config(&dependencies.config_path, CONFIG_POLL_INTERVAL)
        .map_err(|err| AppError::config("config.watch", err))?;
    if !snapshot.poller.enabled {
        info!("poller disabled by configuration");
        return Ok(());
    }

    let events = EventBus::new();
    let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
    let transport = Arc::new(HttpTransport::new(
        dependencies.trigger_url.clone(),
        DEFAULT_TIMEOUT,
    )?);
    info!(url = transport.url(), "trigger endpoint configured");

    let env = PollerEnv::from_snapshot(
        &snapshot,
        transport,
        &HandlerRegistry::with_defaults(),
        events.clone(),
        metrics.clone(),
    )
    .map_err(|err| AppError::poller("poller.env", err))?;
    let poller = Poller::start(env, PollerSettings::from_config(&snapshot.poller))
        .map_err(|err| AppError::poller("poller.start", err))?;

    let config_task = spawn_config_watch_task(
        watcher,
        snapshot,
        poller.handle(),
        events.clone(),
        metrics.clone(),
    );
    let event_task = spawn_event_logger(&events);
    let (stop, stopped) = watch::channel(false);
    let poller_task = tokio::spawn(poller.run(stopped));

    shutdown.await;
    info!("shutdown requested");
    stop.send_replace(true);

    let outcome = poller_task
        .await
        .map_err(|source| AppError::Join {
            operation: "poller.run",
            source,
        })
        .and_then(|result| result.map_err(|err| AppError::poller("poller.run", err)));

    for task in [config_task, event_task] {
        task.abort();
        if let Err(err) = task.await
            && !err.is_cancelled()
        {
            warn!(error = %err, "background task join failed");
        }
    }

    let totals = metrics.snapshot();
    info!(
        seen = totals.files_seen_total,
        succeeded = totals.files_succeeded_total,
        failed = totals.files_failed_total,
        "filedrop daemon stopped"
    );
    outcome
}

fn spawn_config_watch_task(
    mut watcher: ConfigWatcher,
    initial: Arc<ConfigSnapshot>,
    poller: PollerHandle,
    events: EventBus,
    metrics: Metrics,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut applied = initial;
        let mut config_degraded = false;
        loop {
            match watcher.next().await {
                Ok(snapshot) => {
                    let healthy = apply_config_snapshot(&applied, &snapshot, &poller, &events, &metrics);
                    set_config_degraded(&events, &mut config_degraded, !healthy);
                    applied = snapshot;
                }
                Err(err) => {
                    metrics.inc_config_update_failure();
                    warn!(error = %err, "configuration reload failed; keeping current settings");
                    set_config_degraded(&events, &mut config_degraded, true);
                }
            }
        }
    })
}

/// Apply a reloaded snapshot. Only worker limits change at runtime; anything
/// else is reported and waits for a restart. Returns `false` on failure.
pub(crate) fn apply_config_snapshot(
    current: &ConfigSnapshot,
    next: &ConfigSnapshot,
    poller: &PollerHandle,
    events: &EventBus,
    metrics: &Metrics,
) -> bool {
    if !next.differs_only_in_pool_limits(current) {
        warn!(
            revision = next.revision,
            "configuration changed beyond worker limits; restart to apply"
        );
        events.publish(Event::SettingsChanged {
            description: format!("revision {} requires a restart", next.revision),
        });
        return true;
    }

    let started = Instant::now();
    let min = next.poller.min_concurrent_workers;
    let max = next.poller.max_concurrent_workers;
    match poller.resize_pool(min, max) {
        Ok(()) => {
            metrics.observe_config_apply_latency(started.elapsed());
            info!(revision = next.revision, min, max, "applied configuration update");
            events.publish(Event::SettingsChanged {
                description: format!("revision {} applied: workers {min}..={max}", next.revision),
            });
            true
        }
        Err(err) => {
            metrics.inc_config_update_failure();
            warn!(revision = next.revision, error = %err, "cannot apply worker limits");
            events.publish(Event::SettingsChanged {
                description: format!("failed to apply revision {}: {err}", next.revision),
            });
            false
        }
    }
}

fn set_config_degraded(events: &EventBus, config_degraded: &mut bool, degraded: bool) {
    if *config_degraded == degraded {
        return;
    }
    let degraded_list = if degraded {
        vec!["config_watcher".to_string()]
    } else {
        Vec::new()
    };
    events.publish(Event::HealthChanged {
        degraded: degraded_list,
    });
    *config_degraded = degraded;
}

/// Log alerts and health changes published on the bus.
fn spawn_event_logger(events: &EventBus) -> JoinHandle<()> {
    let mut stream = events.subscribe(None);
    tokio::spawn(async move {
        while let Some(envelope) = stream.next().await {
            match &envelope.event {
                Event::FileFailed {
                    file_id,
                    folder,
                    message,
                } => error!(file_id = %file_id, folder = %folder, message = %message, "file processing alert"),
                Event::HealthChanged { degraded } => warn!(?degraded, "health changed"),
                event => debug!(id = envelope.id, kind = event.kind(), "event"),
            }
        }
    })
}
