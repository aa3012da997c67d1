//! Typed configuration models for the poller and its watched folders.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Poller-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollerConfig {
    /// Whether the poller runs at all.
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,
    /// Optional separate document holding the folder list.
    #[serde(default)]
    pub configuration_file: Option<PathBuf>,
    /// Root holding one processing folder per claimed file.
    pub processing_folder: PathBuf,
    /// Root receiving processing folders of failed files.
    pub error_folder: PathBuf,
    /// Optional root receiving files right before the trigger is sent.
    #[serde(default)]
    pub app_processing_folder: Option<PathBuf>,
    /// Seconds between scan passes.
    #[serde(default = "defaults::poll_interval")]
    pub poll_interval: f64,
    /// Minimum number of live workers.
    #[serde(default = "defaults::min_workers")]
    pub min_concurrent_workers: usize,
    /// Maximum number of live workers.
    #[serde(default = "defaults::max_workers")]
    pub max_concurrent_workers: usize,
    /// User identity for triggers that do not name one.
    #[serde(default)]
    pub default_user_dn: Option<String>,
    /// Whether state transitions are written to the per-file log.
    #[serde(default = "defaults::enabled")]
    pub state_log_enabled: bool,
    /// Seconds to wait before each successive retry.
    #[serde(default = "defaults::retry_delays")]
    pub retry_delays: Vec<f64>,
    /// Inline folder list.
    #[serde(default)]
    pub folders: Vec<FolderSpec>,
}

impl PollerConfig {
    /// Interval between scan passes.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        seconds(self.poll_interval, Duration::from_secs(10))
    }

    /// Retry delay schedule; its length bounds the number of retries.
    #[must_use]
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays
            .iter()
            .map(|value| seconds(*value, Duration::ZERO))
            .collect()
    }
}

/// Folder list stored in a separate document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FoldersDocument {
    /// Watched folders.
    pub folders: Vec<FolderSpec>,
}

/// One watched input directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FolderSpec {
    /// Folder name as written by the operator.
    pub name: String,
    /// Watched directory. Relative paths resolve against the defining document.
    pub location: PathBuf,
    /// Seconds a file must stay unchanged before it is claimed.
    #[serde(default = "defaults::track_time")]
    pub track_time: f64,
    /// Optional file name filter.
    #[serde(default)]
    pub filter: Option<FilterSpec>,
    /// Registered error handler name.
    #[serde(default)]
    pub error_handler: Option<String>,
    /// Notification sent once a file is staged.
    pub trigger: TriggerSpec,
}

impl FolderSpec {
    /// Stability window for the tracking state.
    #[must_use]
    pub fn track_time(&self) -> Duration {
        seconds(self.track_time, Duration::ZERO)
    }
}

/// Filter pattern syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// Shell style glob.
    Glob,
    /// Regular expression.
    Regex,
}

/// File name filter. Matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterSpec {
    /// Pattern syntax.
    #[serde(rename = "type")]
    pub kind: FilterKind,
    /// Pattern text.
    pub pattern: String,
}

/// Remote method invoked for each staged file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerSpec {
    /// Method name.
    pub method: String,
    /// Method namespace.
    pub namespace: String,
    /// Organisation identity.
    #[serde(default)]
    pub organization: Option<String>,
    /// User identity; falls back to the poller default.
    #[serde(default)]
    pub user: Option<String>,
    /// Move the file to the app-processing root before triggering.
    #[serde(default)]
    pub move_file: bool,
    /// Re-send the trigger after a failed or interrupted attempt.
    #[serde(default)]
    pub can_retry: bool,
    /// Request parameters.
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

/// Derived value bound to a trigger parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParameterSource {
    /// Original file name.
    Filename,
    /// Absolute path of the file at trigger time.
    Filepath,
    /// File size in bytes.
    Filesize,
    /// File content decoded as UTF-8.
    ContentText,
    /// File content encoded as base64.
    ContentBase64,
    /// File content parsed as XML.
    ContentXml,
    /// Directory of another configured folder.
    ConfiguredFolder,
}

impl ParameterSource {
    /// Configuration spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Filename => "filename",
            Self::Filepath => "filepath",
            Self::Filesize => "filesize",
            Self::ContentText => "content-text",
            Self::ContentBase64 => "content-base64",
            Self::ContentXml => "content-xml",
            Self::ConfiguredFolder => "configured-folder",
        }
    }
}

/// One trigger parameter: either a static value or a derived source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterSpec {
    /// Parameter name.
    pub name: String,
    /// Static value.
    #[serde(default)]
    pub value: Option<String>,
    /// Derived value.
    #[serde(default)]
    pub source: Option<ParameterSource>,
    /// Folder named by a `configured-folder` source.
    #[serde(default)]
    pub folder: Option<String>,
}

/// Immutable configuration snapshot handed to readers.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    /// Monotonic reload counter, starting at one.
    pub revision: u64,
    /// Document the snapshot was loaded from.
    pub source: PathBuf,
    /// Poller settings with absolute paths and an empty inline folder list.
    pub poller: PollerConfig,
    /// Folders with absolute locations.
    pub folders: Vec<FolderSpec>,
}

impl ConfigSnapshot {
    /// Whether only the hot-reloadable settings differ from `other`.
    #[must_use]
    pub fn differs_only_in_pool_limits(&self, other: &Self) -> bool {
        let mut poller = other.poller.clone();
        poller.min_concurrent_workers = self.poller.min_concurrent_workers;
        poller.max_concurrent_workers = self.poller.max_concurrent_workers;
        poller == self.poller && other.folders == self.folders
    }
}

/// Replace everything outside `[A-Za-z0-9]` with `_` and upper-case the result.
#[must_use]
pub fn normalize_folder_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn seconds(value: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_names_normalise() {
        assert_eq!(normalize_folder_name("in-box 1"), "IN_BOX_1");
        assert_eq!(normalize_folder_name("Input"), "INPUT");
        assert_eq!(normalize_folder_name("ä"), "_");
    }

    #[test]
    fn fractional_seconds_convert() {
        let spec = FolderSpec {
            name: "a".into(),
            location: PathBuf::from("a"),
            track_time: 0.1,
            filter: None,
            error_handler: None,
            trigger: TriggerSpec {
                method: "M".into(),
                namespace: "N".into(),
                organization: None,
                user: None,
                move_file: false,
                can_retry: false,
                parameters: vec![],
            },
        };
        assert_eq!(spec.track_time(), Duration::from_millis(100));
    }

    #[test]
    fn parameter_sources_use_kebab_case() -> Result<(), serde_yaml::Error> {
        let parsed: ParameterSpec =
            serde_yaml::from_str("name: body\nsource: content-base64\n")?;
        assert_eq!(parsed.source, Some(ParameterSource::ContentBase64));
        assert_eq!(ParameterSource::ContentBase64.as_str(), "content-base64");
        Ok(())
    }
}
