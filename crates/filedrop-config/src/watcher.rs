//! Hot reload of the configuration file.
//!
//! The watcher polls document modification times and publishes each new,
//! validated snapshot through a `tokio::sync::watch` channel. Readers hold an
//! `Arc<ConfigSnapshot>` and never block the writer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::debug;

use crate::error::ConfigResult;
use crate::loader::{load_revision, modified_at};
use crate::model::ConfigSnapshot;

/// Load the configuration at `path` and return it with a watcher for later changes.
///
/// # Errors
///
/// Returns an error when the initial load fails.
pub fn watch_config(
    path: &Path,
    poll_interval: Duration,
) -> ConfigResult<(Arc<ConfigSnapshot>, ConfigWatcher)> {
    let snapshot = Arc::new(load_revision(path, 1)?);
    let (sender, _) = watch::channel(Arc::clone(&snapshot));
    let watcher = ConfigWatcher {
        path: path.to_path_buf(),
        poll_interval,
        last_modified: modified_at(&snapshot),
        current: Arc::clone(&snapshot),
        sender,
    };
    Ok((snapshot, watcher))
}

/// Polls the configuration documents and publishes new snapshots.
pub struct ConfigWatcher {
    path: PathBuf,
    poll_interval: Duration,
    last_modified: Option<SystemTime>,
    current: Arc<ConfigSnapshot>,
    sender: watch::Sender<Arc<ConfigSnapshot>>,
}

impl ConfigWatcher {
    /// Receiver observing every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<ConfigSnapshot>> {
        self.sender.subscribe()
    }

    /// Latest published snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.current)
    }

    /// Await the next snapshot that differs from the current one.
    ///
    /// # Errors
    ///
    /// Returns an error when a changed document fails to load. The watcher
    /// stays usable and reports the same document again only after it
    /// changes once more.
    pub async fn next(&mut self) -> ConfigResult<Arc<ConfigSnapshot>> {
        loop {
            sleep(self.poll_interval).await;
            if let Some(snapshot) = self.poll_once()? {
                return Ok(snapshot);
            }
        }
    }

    /// Check the documents once and publish a new snapshot when they changed.
    ///
    /// # Errors
    ///
    /// Returns an error when a changed document fails to load.
    pub fn poll_once(&mut self) -> ConfigResult<Option<Arc<ConfigSnapshot>>> {
        let modified = modified_at(&self.current);
        if modified == self.last_modified {
            return Ok(None);
        }
        self.last_modified = modified;

        let loaded = load_revision(&self.path, self.current.revision + 1)?;
        if loaded.poller == self.current.poller && loaded.folders == self.current.folders {
            debug!(path = %self.path.display(), "configuration touched without changes");
            return Ok(None);
        }

        let snapshot = Arc::new(loaded);
        self.current = Arc::clone(&snapshot);
        self.sender.send_replace(Arc::clone(&snapshot));
        Ok(Some(snapshot))
    }
}
