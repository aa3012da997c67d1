//! Temporary directory layouts and configuration documents.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use filedrop_config::{ConfigSnapshot, load_config};
use serde_json::{Value, json};
use tempfile::TempDir;

/// Temporary tree holding the poller roots and any number of input folders.
///
/// ```text
/// <root>/processing  <root>/errors  <root>/app  <root>/in/<folder>
/// ```
#[derive(Debug)]
pub struct Workspace {
    temp: TempDir,
}

impl Workspace {
    /// Create an empty workspace.
    ///
    /// # Errors
    ///
    /// Returns an error when the temporary directory cannot be created.
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            temp: TempDir::new()?,
        })
    }

    /// Workspace root.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Processing root.
    #[must_use]
    pub fn processing(&self) -> PathBuf {
        self.root().join("processing")
    }

    /// Error root.
    #[must_use]
    pub fn errors(&self) -> PathBuf {
        self.root().join("errors")
    }

    /// App-processing root.
    #[must_use]
    pub fn app(&self) -> PathBuf {
        self.root().join("app")
    }

    /// Directory of the input folder called `name`.
    #[must_use]
    pub fn input(&self, name: &str) -> PathBuf {
        self.root().join("in").join(name)
    }

    /// Poller document with fast polling, short retry delays and the given folders.
    #[must_use]
    pub fn poller_document(&self, folders: &[Value]) -> Value {
        json!({
            "processing_folder": self.processing(),
            "error_folder": self.errors(),
            "app_processing_folder": self.app(),
            "poll_interval": 0.05,
            "min_concurrent_workers": 1,
            "max_concurrent_workers": 4,
            "default_user_dn": "cn=filedrop",
            "retry_delays": [0.1, 0.1],
            "folders": folders,
        })
    }

    /// Folder definition watching [`Self::input`] with a `filename` parameter.
    #[must_use]
    pub fn folder_document(&self, name: &str, move_file: bool, can_retry: bool) -> Value {
        json!({
            "name": name,
            "location": self.input(name),
            "track_time": 0.0,
            "trigger": {
                "method": "ingest",
                "namespace": "files",
                "move_file": move_file,
                "can_retry": can_retry,
                "parameters": [{ "name": "name", "source": "filename" }],
            },
        })
    }

    /// Write `document` as `poller.json` and load it.
    ///
    /// # Errors
    ///
    /// Returns an error when the document cannot be written or does not load.
    pub fn load(&self, document: &Value) -> anyhow::Result<ConfigSnapshot> {
        let path = self.write_config("poller.json", document)?;
        Ok(load_config(&path)?)
    }

    /// Write `document` under the workspace root.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn write_config(&self, name: &str, document: &Value) -> anyhow::Result<PathBuf> {
        let path = self.root().join(name);
        fs::write(&path, serde_json::to_vec_pretty(document)?)?;
        Ok(path)
    }

    /// Create `name` with `body` inside the input folder `folder`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn drop_file(&self, folder: &str, name: &str, body: &str) -> anyhow::Result<PathBuf> {
        let dir = self.input(folder);
        fs::create_dir_all(&dir)?;
        let path = dir.join(name);
        fs::write(&path, body)?;
        Ok(path)
    }

    /// Names of the entries directly under `dir`, sorted. Missing directories are empty.
    #[must_use]
    pub fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|entry| entry.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

/// Poll `condition` every 10 ms until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
