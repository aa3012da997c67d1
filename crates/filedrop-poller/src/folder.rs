//! Runtime view of the watched folders.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use filedrop_config::{FilterKind, FilterSpec, FolderSpec, ParameterSource, normalize_folder_name};
use globset::{GlobBuilder, GlobMatcher};
use regex::{Regex, RegexBuilder};

use crate::error::{PollerError, PollerResult};
use crate::handler::{FileErrorHandler, HandlerRegistry};

/// Compiled, case-insensitive file name filter.
#[derive(Debug, Clone)]
pub enum FileFilter {
    /// Shell style glob.
    Glob(GlobMatcher),
    /// Anchored regular expression.
    Regex(Regex),
}

impl FileFilter {
    /// Compile a filter definition.
    ///
    /// # Errors
    ///
    /// Returns an error when the pattern does not compile.
    pub fn compile(spec: &FilterSpec) -> PollerResult<Self> {
        match spec.kind {
            FilterKind::Glob => GlobBuilder::new(&spec.pattern)
                .case_insensitive(true)
                .literal_separator(true)
                .build()
                .map(|glob| Self::Glob(glob.compile_matcher()))
                .map_err(|source| PollerError::Glob {
                    pattern: spec.pattern.clone(),
                    source,
                }),
            FilterKind::Regex => RegexBuilder::new(&format!("^(?:{})$", spec.pattern))
                .case_insensitive(true)
                .build()
                .map(Self::Regex)
                .map_err(|source| PollerError::Regex {
                    pattern: spec.pattern.clone(),
                    source,
                }),
        }
    }

    /// Whether `name` passes the filter.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Glob(matcher) => matcher.is_match(name),
            Self::Regex(regex) => regex.is_match(name),
        }
    }
}

/// Where a trigger parameter takes its value from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterBinding {
    /// Fixed value from the configuration.
    Static(String),
    /// Value derived from the file being processed.
    Derived(ParameterSource),
    /// Location of another configured folder, by normalised name.
    ConfiguredFolder(String),
}

/// One parameter of a trigger request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerParameter {
    /// Parameter name.
    pub name: String,
    /// Value binding.
    pub binding: ParameterBinding,
}

/// Trigger settings resolved for one folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerDescriptor {
    /// Method name.
    pub method: String,
    /// Method namespace.
    pub namespace: String,
    /// Organisation identity.
    pub organization: Option<String>,
    /// User identity, already defaulted.
    pub user: Option<String>,
    /// Move the file to the app-processing root first.
    pub move_file: bool,
    /// Allow re-sending after an interrupted or failed attempt.
    pub can_retry: bool,
    /// Ordered parameters.
    pub parameters: Vec<TriggerParameter>,
}

/// A watched input directory and everything needed to process its files.
pub struct Folder {
    /// Normalised name.
    pub name: String,
    /// Absolute directory.
    pub location: PathBuf,
    /// Stability window before a file is claimed.
    pub track_time: Duration,
    /// Optional name filter.
    pub filter: Option<FileFilter>,
    /// Trigger settings.
    pub trigger: TriggerDescriptor,
    /// Handler invoked when a file is parked in the error folder.
    pub error_handler: Arc<dyn FileErrorHandler>,
}

impl fmt::Debug for Folder {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Folder")
            .field("name", &self.name)
            .field("location", &self.location)
            .field("track_time", &self.track_time)
            .field("filter", &self.filter)
            .field("trigger", &self.trigger)
            .field("error_handler", &self.error_handler.name())
            .finish()
    }
}

impl Folder {
    /// Build a folder from its definition, creating the directory when missing.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created, the filter does
    /// not compile, a parameter is malformed, or the error handler is unknown.
    pub fn from_spec(
        spec: &FolderSpec,
        default_user: Option<&str>,
        handlers: &HandlerRegistry,
    ) -> PollerResult<Self> {
        let name = normalize_folder_name(&spec.name);
        fs::create_dir_all(&spec.location)
            .map_err(|source| PollerError::io("folder.create", &spec.location, source))?;
        if !spec.location.is_dir() {
            return Err(PollerError::InvalidFolder {
                folder: name,
                field: "location",
                reason: "not a directory",
                value: Some(spec.location.display().to_string()),
            });
        }

        let filter = spec.filter.as_ref().map(FileFilter::compile).transpose()?;
        let error_handler = handlers.resolve(&name, spec.error_handler.as_deref())?;

        let mut parameters = Vec::with_capacity(spec.trigger.parameters.len());
        for parameter in &spec.trigger.parameters {
            let binding = match (&parameter.value, parameter.source) {
                (Some(value), None) => ParameterBinding::Static(value.clone()),
                (None, Some(ParameterSource::ConfiguredFolder)) => {
                    let Some(target) = parameter.folder.as_deref() else {
                        return Err(PollerError::InvalidFolder {
                            folder: name,
                            field: "trigger.parameters.folder",
                            reason: "configured-folder requires a folder name",
                            value: Some(parameter.name.clone()),
                        });
                    };
                    ParameterBinding::ConfiguredFolder(normalize_folder_name(target))
                }
                (None, Some(source)) => ParameterBinding::Derived(source),
                _ => {
                    return Err(PollerError::InvalidFolder {
                        folder: name,
                        field: "trigger.parameters",
                        reason: "exactly one of value or source is required",
                        value: Some(parameter.name.clone()),
                    });
                }
            };
            parameters.push(TriggerParameter {
                name: parameter.name.clone(),
                binding,
            });
        }

        let trigger = TriggerDescriptor {
            method: spec.trigger.method.clone(),
            namespace: spec.trigger.namespace.clone(),
            organization: spec.trigger.organization.clone(),
            user: spec
                .trigger
                .user
                .clone()
                .or_else(|| default_user.map(str::to_string)),
            move_file: spec.trigger.move_file,
            can_retry: spec.trigger.can_retry,
            parameters,
        };

        Ok(Self {
            name,
            location: spec.location.clone(),
            track_time: spec.track_time(),
            filter,
            trigger,
            error_handler,
        })
    }

    /// Whether a file called `name` should be picked up.
    #[must_use]
    pub fn accepts(&self, name: &str) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter.matches(name))
    }
}

/// Folders indexed by normalised name, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct FolderRegistry {
    ordered: Vec<Arc<Folder>>,
    by_name: HashMap<String, Arc<Folder>>,
}

impl FolderRegistry {
    /// Build every folder of a configuration.
    ///
    /// # Errors
    ///
    /// Returns the first folder construction error, or an error when a
    /// `configured-folder` parameter names an unknown folder.
    pub fn build(
        specs: &[FolderSpec],
        default_user: Option<&str>,
        handlers: &HandlerRegistry,
    ) -> PollerResult<Self> {
        let mut registry = Self::default();
        for spec in specs {
            let folder = Arc::new(Folder::from_spec(spec, default_user, handlers)?);
            registry
                .by_name
                .insert(folder.name.clone(), Arc::clone(&folder));
            registry.ordered.push(folder);
        }

        for folder in &registry.ordered {
            for parameter in &folder.trigger.parameters {
                if let ParameterBinding::ConfiguredFolder(target) = &parameter.binding
                    && !registry.by_name.contains_key(target)
                {
                    return Err(PollerError::InvalidFolder {
                        folder: folder.name.clone(),
                        field: "trigger.parameters.folder",
                        reason: "unknown folder",
                        value: Some(target.clone()),
                    });
                }
            }
        }
        Ok(registry)
    }

    /// Folder with the given normalised name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<Folder>> {
        self.by_name.get(name)
    }

    /// Folders in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Folder>> {
        self.ordered.iter()
    }

    /// Number of folders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Whether no folder is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Directory of the folder with the given normalised name.
    #[must_use]
    pub fn location_of(&self, name: &str) -> Option<&Path> {
        self.by_name.get(name).map(|folder| folder.location.as_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filedrop_config::{ParameterSpec, TriggerSpec};
    use tempfile::TempDir;

    fn spec(root: &Path, name: &str, filter: Option<FilterSpec>) -> FolderSpec {
        FolderSpec {
            name: name.to_string(),
            location: root.join(name),
            track_time: 0.5,
            filter,
            error_handler: None,
            trigger: TriggerSpec {
                method: "Import".into(),
                namespace: "urn:test".into(),
                organization: None,
                user: None,
                move_file: false,
                can_retry: true,
                parameters: vec![
                    ParameterSpec {
                        name: "file".into(),
                        value: None,
                        source: Some(ParameterSource::Filename),
                        folder: None,
                    },
                    ParameterSpec {
                        name: "mode".into(),
                        value: Some("fast".into()),
                        source: None,
                        folder: None,
                    },
                ],
            },
        }
    }

    #[test]
    fn glob_filter_is_case_insensitive() -> anyhow::Result<()> {
        let filter = FileFilter::compile(&FilterSpec {
            kind: FilterKind::Glob,
            pattern: "*.csv".into(),
        })?;
        assert!(filter.matches("DATA.CSV"));
        assert!(filter.matches("data.csv"));
        assert!(!filter.matches("data.csv.tmp"));
        Ok(())
    }

    #[test]
    fn regex_filter_matches_whole_name() -> anyhow::Result<()> {
        let filter = FileFilter::compile(&FilterSpec {
            kind: FilterKind::Regex,
            pattern: "in_[0-9]+\\.xml".into(),
        })?;
        assert!(filter.matches("IN_42.XML"));
        assert!(!filter.matches("xin_42.xml"));
        assert!(!filter.matches("in_42.xml.bak"));
        Ok(())
    }

    #[test]
    fn invalid_regex_is_reported() {
        let err = FileFilter::compile(&FilterSpec {
            kind: FilterKind::Regex,
            pattern: "(".into(),
        });
        assert!(matches!(err, Err(PollerError::Regex { .. })));
    }

    #[test]
    fn folders_are_created_and_defaults_applied() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let handlers = HandlerRegistry::with_defaults();
        let folder = Folder::from_spec(&spec(temp.path(), "in box", None), Some("cn=svc"), &handlers)?;
        assert_eq!(folder.name, "IN_BOX");
        assert!(folder.location.is_dir());
        assert_eq!(folder.track_time, Duration::from_millis(500));
        assert_eq!(folder.trigger.user.as_deref(), Some("cn=svc"));
        assert_eq!(
            folder.trigger.parameters[0].binding,
            ParameterBinding::Derived(ParameterSource::Filename)
        );
        assert_eq!(
            folder.trigger.parameters[1].binding,
            ParameterBinding::Static("fast".into())
        );
        assert!(folder.accepts("anything"));
        Ok(())
    }

    #[test]
    fn registry_rejects_unknown_configured_folder() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let mut folder = spec(temp.path(), "a", None);
        folder.trigger.parameters.push(ParameterSpec {
            name: "target".into(),
            value: None,
            source: Some(ParameterSource::ConfiguredFolder),
            folder: Some("missing".into()),
        });
        let err = FolderRegistry::build(&[folder], None, &HandlerRegistry::with_defaults());
        assert!(matches!(
            err,
            Err(PollerError::InvalidFolder {
                reason: "unknown folder",
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn registry_resolves_locations() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let registry = FolderRegistry::build(
            &[spec(temp.path(), "a", None), spec(temp.path(), "b", None)],
            None,
            &HandlerRegistry::with_defaults(),
        )?;
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.location_of("B"), Some(temp.path().join("b").as_path()));
        assert_eq!(
            registry.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            vec!["A", "B"]
        );
        Ok(())
    }
}
