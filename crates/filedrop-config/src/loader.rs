//! Configuration document loading and path resolution.
//!
//! # Design
//! - The format is picked from the file extension (`yaml`, `yml`, `json`).
//! - Relative paths resolve against the directory of the document that names them.
//! - Loading always validates; callers only ever see consistent snapshots.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::de::DeserializeOwned;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{ConfigSnapshot, FolderSpec, FoldersDocument, PollerConfig};
use crate::validate::validate;

/// Load, resolve and validate the poller configuration at `path`.
///
/// The returned snapshot carries revision `1`.
///
/// # Errors
///
/// Returns an error when a document cannot be read or parsed, or when
/// validation fails.
pub fn load_config(path: &Path) -> ConfigResult<ConfigSnapshot> {
    load_revision(path, 1)
}

pub(crate) fn load_revision(path: &Path, revision: u64) -> ConfigResult<ConfigSnapshot> {
    let source = absolute(path)?;
    let base = parent_dir(&source);
    let mut poller: PollerConfig = read_document(&source)?;

    poller.processing_folder = resolve(&base, &poller.processing_folder);
    poller.error_folder = resolve(&base, &poller.error_folder);
    poller.app_processing_folder = poller
        .app_processing_folder
        .as_deref()
        .map(|folder| resolve(&base, folder));

    let mut folders = resolve_folders(&base, std::mem::take(&mut poller.folders));
    if let Some(file) = poller.configuration_file.as_deref() {
        let file = resolve(&base, file);
        let document: FoldersDocument = read_document(&file)?;
        folders.extend(resolve_folders(&parent_dir(&file), document.folders));
        poller.configuration_file = Some(file);
    }

    validate(&poller, &folders)?;

    Ok(ConfigSnapshot {
        revision,
        source,
        poller,
        folders,
    })
}

/// Latest modification time across the documents a snapshot was built from.
pub(crate) fn modified_at(snapshot: &ConfigSnapshot) -> Option<SystemTime> {
    let mut latest = fs::metadata(&snapshot.source)
        .and_then(|meta| meta.modified())
        .ok();
    if let Some(file) = &snapshot.poller.configuration_file
        && let Ok(time) = fs::metadata(file).and_then(|meta| meta.modified())
    {
        latest = Some(latest.map_or(time, |current| current.max(time)));
    }
    latest
}

fn read_document<T: DeserializeOwned>(path: &Path) -> ConfigResult<T> {
    let text = fs::read_to_string(path).map_err(|err| ConfigError::io("read", path, err))?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("yaml" | "yml") => serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        }),
        Some("json") => serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        }),
        _ => Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

fn resolve_folders(base: &Path, folders: Vec<FolderSpec>) -> Vec<FolderSpec> {
    folders
        .into_iter()
        .map(|mut folder| {
            folder.location = resolve(base, &folder.location);
            folder
        })
        .collect()
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

fn absolute(path: &Path) -> ConfigResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|err| ConfigError::io("current_dir", path, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const POLLER_YAML: &str = r"
processing_folder: work/processing
error_folder: work/error
poll_interval: 0.5
folders:
  - name: input
    location: in
    track_time: 0.1
    trigger:
      method: MyMethod
      namespace: http://MyMethodNamespace
      parameters:
        - { name: param1, value: value1 }
        - { name: param3, source: filepath }
";

    #[test]
    fn relative_paths_resolve_against_the_document() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("poller.yaml");
        fs::write(&path, POLLER_YAML)?;

        let snapshot = load_config(&path)?;
        assert_eq!(snapshot.revision, 1);
        assert_eq!(
            snapshot.poller.processing_folder,
            temp.path().join("work/processing")
        );
        assert_eq!(snapshot.folders.len(), 1);
        assert_eq!(snapshot.folders[0].location, temp.path().join("in"));
        assert!(snapshot.poller.folders.is_empty());
        Ok(())
    }

    #[test]
    fn external_folder_document_is_merged() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        fs::create_dir_all(temp.path().join("conf"))?;
        fs::write(
            temp.path().join("conf/folders.json"),
            r#"{"folders":[{"name":"other","location":"drop","trigger":{"method":"M","namespace":"N"}}]}"#,
        )?;
        let path = temp.path().join("poller.yml");
        fs::write(
            &path,
            "processing_folder: p\nerror_folder: e\nconfiguration_file: conf/folders.json\n",
        )?;

        let snapshot = load_config(&path)?;
        assert_eq!(snapshot.folders.len(), 1);
        assert_eq!(snapshot.folders[0].location, temp.path().join("conf/drop"));
        assert!(modified_at(&snapshot).is_some());
        Ok(())
    }

    #[test]
    fn unknown_extension_is_rejected() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("poller.toml");
        fs::write(&path, "")?;
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::UnsupportedFormat { .. })
        ));
        Ok(())
    }

    #[test]
    fn unknown_fields_are_rejected() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("poller.yaml");
        fs::write(&path, "processing_folder: p\nerror_folder: e\nbogus: 1\n")?;
        assert!(matches!(load_config(&path), Err(ConfigError::Yaml { .. })));
        Ok(())
    }
}
