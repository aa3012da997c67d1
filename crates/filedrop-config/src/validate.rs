//! Validation helpers for poller and folder configuration.

use std::collections::HashSet;

use crate::defaults::{MAX_WORKER_LIMIT, MIN_WORKER_LIMIT};
use crate::error::{ConfigError, ConfigResult};
use crate::model::{FolderSpec, ParameterSource, PollerConfig, normalize_folder_name};

const POLLER_SECTION: &str = "poller";

/// Validate poller settings together with the effective folder list.
///
/// # Errors
///
/// Returns the first violation found.
pub fn validate(poller: &PollerConfig, folders: &[FolderSpec]) -> ConfigResult<()> {
    validate_poller(poller)?;

    let mut names = HashSet::new();
    for folder in folders {
        let name = normalize_folder_name(&folder.name);
        if name.is_empty() {
            return Err(ConfigError::invalid(
                "folders",
                "name",
                Some(folder.name.clone()),
                "must not be empty",
            ));
        }
        if !names.insert(name.clone()) {
            return Err(ConfigError::DuplicateFolder { name });
        }
    }

    for folder in folders {
        validate_folder(folder, &names)?;
    }
    Ok(())
}

fn validate_poller(poller: &PollerConfig) -> ConfigResult<()> {
    validate_worker_limits(poller.min_concurrent_workers, poller.max_concurrent_workers)?;
    non_negative_seconds(POLLER_SECTION, "poll_interval", poller.poll_interval)?;
    if poller.poll_interval <= 0.0 {
        return Err(ConfigError::invalid(
            POLLER_SECTION,
            "poll_interval",
            Some(poller.poll_interval.to_string()),
            "must be positive",
        ));
    }
    for delay in &poller.retry_delays {
        non_negative_seconds(POLLER_SECTION, "retry_delays", *delay)?;
    }
    if poller.processing_folder.as_os_str().is_empty() {
        return Err(ConfigError::invalid(
            POLLER_SECTION,
            "processing_folder",
            None,
            "must not be empty",
        ));
    }
    if poller.error_folder.as_os_str().is_empty() {
        return Err(ConfigError::invalid(
            POLLER_SECTION,
            "error_folder",
            None,
            "must not be empty",
        ));
    }
    Ok(())
}

/// Check a pair of worker limits.
///
/// # Errors
///
/// Returns an error when either limit is outside `1..=200` or `min > max`.
pub fn validate_worker_limits(min: usize, max: usize) -> ConfigResult<()> {
    let range = MIN_WORKER_LIMIT..=MAX_WORKER_LIMIT;
    if !range.contains(&min) {
        return Err(ConfigError::invalid(
            POLLER_SECTION,
            "min_concurrent_workers",
            Some(min.to_string()),
            "must be between 1 and 200",
        ));
    }
    if !range.contains(&max) {
        return Err(ConfigError::invalid(
            POLLER_SECTION,
            "max_concurrent_workers",
            Some(max.to_string()),
            "must be between 1 and 200",
        ));
    }
    if min > max {
        return Err(ConfigError::invalid(
            POLLER_SECTION,
            "min_concurrent_workers",
            Some(min.to_string()),
            "must not exceed max_concurrent_workers",
        ));
    }
    Ok(())
}

fn validate_folder(folder: &FolderSpec, names: &HashSet<String>) -> ConfigResult<()> {
    let section = format!("folders.{}", folder.name);
    non_negative_seconds(&section, "track_time", folder.track_time)?;

    if let Some(filter) = &folder.filter
        && filter.pattern.trim().is_empty()
    {
        return Err(ConfigError::invalid(
            section,
            "filter",
            None,
            "pattern must not be empty",
        ));
    }

    let trigger = &folder.trigger;
    if trigger.method.trim().is_empty() {
        return Err(ConfigError::invalid(
            section,
            "trigger.method",
            None,
            "must not be empty",
        ));
    }
    if trigger.namespace.trim().is_empty() {
        return Err(ConfigError::invalid(
            section,
            "trigger.namespace",
            None,
            "must not be empty",
        ));
    }

    for param in &trigger.parameters {
        if param.name.trim().is_empty() {
            return Err(ConfigError::invalid(
                section,
                "trigger.parameters.name",
                None,
                "must not be empty",
            ));
        }
        match (&param.value, param.source) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::invalid(
                    section,
                    "trigger.parameters",
                    Some(param.name.clone()),
                    "value and source are mutually exclusive",
                ));
            }
            (None, None) => {
                return Err(ConfigError::invalid(
                    section,
                    "trigger.parameters",
                    Some(param.name.clone()),
                    "needs a value or a source",
                ));
            }
            (None, Some(ParameterSource::ConfiguredFolder)) => {
                let Some(target) = &param.folder else {
                    return Err(ConfigError::invalid(
                        section,
                        "trigger.parameters.folder",
                        Some(param.name.clone()),
                        "configured-folder needs a folder name",
                    ));
                };
                let target = normalize_folder_name(target);
                if !names.contains(&target) {
                    return Err(ConfigError::UnknownFolder {
                        section,
                        name: target,
                    });
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn non_negative_seconds(section: &str, field: &'static str, value: f64) -> ConfigResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            section,
            field,
            Some(value.to_string()),
            "must be a non-negative number of seconds",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FilterKind, FilterSpec, ParameterSpec, TriggerSpec};
    use std::path::PathBuf;

    fn poller() -> PollerConfig {
        serde_yaml::from_str("processing_folder: /p\nerror_folder: /e\n")
            .expect("minimal poller config parses")
    }

    fn folder(name: &str) -> FolderSpec {
        FolderSpec {
            name: name.into(),
            location: PathBuf::from("/in"),
            track_time: 0.1,
            filter: Some(FilterSpec {
                kind: FilterKind::Glob,
                pattern: "*.txt".into(),
            }),
            error_handler: None,
            trigger: TriggerSpec {
                method: "MyMethod".into(),
                namespace: "http://ns".into(),
                organization: None,
                user: None,
                move_file: false,
                can_retry: false,
                parameters: vec![ParameterSpec {
                    name: "path".into(),
                    value: None,
                    source: Some(ParameterSource::Filepath),
                    folder: None,
                }],
            },
        }
    }

    #[test]
    fn defaults_are_valid() {
        let config = poller();
        assert_eq!(config.min_concurrent_workers, 1);
        assert_eq!(config.max_concurrent_workers, 10);
        assert_eq!(config.retry_delays.len(), 5);
        assert!(validate(&config, &[folder("in")]).is_ok());
    }

    #[test]
    fn worker_limits_are_bounded() {
        assert!(validate_worker_limits(1, 200).is_ok());
        assert!(validate_worker_limits(0, 10).is_err());
        assert!(validate_worker_limits(1, 201).is_err());
        assert!(validate_worker_limits(5, 4).is_err());
    }

    #[test]
    fn duplicate_normalised_names_are_rejected() {
        let err = validate(&poller(), &[folder("in-1"), folder("IN_1")]);
        assert!(matches!(err, Err(ConfigError::DuplicateFolder { name }) if name == "IN_1"));
    }

    #[test]
    fn configured_folder_must_exist() {
        let mut spec = folder("in");
        spec.trigger.parameters.push(ParameterSpec {
            name: "target".into(),
            value: None,
            source: Some(ParameterSource::ConfiguredFolder),
            folder: Some("out".into()),
        });
        let err = validate(&poller(), std::slice::from_ref(&spec));
        assert!(matches!(err, Err(ConfigError::UnknownFolder { name, .. }) if name == "OUT"));
        assert!(validate(&poller(), &[spec, folder("out")]).is_ok());
    }

    #[test]
    fn parameters_need_exactly_one_binding() {
        let mut spec = folder("in");
        spec.trigger.parameters[0].value = Some("x".into());
        assert!(validate(&poller(), &[spec.clone()]).is_err());
        spec.trigger.parameters[0].value = None;
        spec.trigger.parameters[0].source = None;
        assert!(validate(&poller(), &[spec]).is_err());
    }

    #[test]
    fn negative_track_time_is_rejected() {
        let mut spec = folder("in");
        spec.track_time = -1.0;
        assert!(matches!(
            validate(&poller(), &[spec]),
            Err(ConfigError::InvalidField {
                field: "track_time",
                ..
            })
        ));
    }
}
