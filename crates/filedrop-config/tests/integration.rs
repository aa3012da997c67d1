use std::fs;
use std::time::Duration;

use filedrop_config::{ConfigError, FilterKind, ParameterSource, load_config};
use tempfile::TempDir;

#[test]
fn json_configuration_loads_with_defaults() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("poller.json");
    fs::write(
        &path,
        r#"{
            "processing_folder": "/var/filedrop/processing",
            "error_folder": "/var/filedrop/error",
            "app_processing_folder": "app",
            "default_user_dn": "cn=system",
            "folders": [{
                "name": "Input Folder",
                "location": "/data/in",
                "track_time": 0.25,
                "filter": { "type": "regex", "pattern": ".*\\.xml" },
                "trigger": {
                    "method": "Process",
                    "namespace": "http://example/ns",
                    "move_file": true,
                    "can_retry": true,
                    "parameters": [
                        { "name": "body", "source": "content-xml" },
                        { "name": "target", "source": "configured-folder", "folder": "input folder" }
                    ]
                }
            }]
        }"#,
    )?;

    let snapshot = load_config(&path)?;
    let poller = &snapshot.poller;
    assert!(poller.enabled);
    assert!(poller.state_log_enabled);
    assert_eq!(poller.poll_interval(), Duration::from_secs(10));
    assert_eq!(
        poller.retry_delays(),
        vec![
            Duration::from_secs(10),
            Duration::from_secs(30),
            Duration::from_secs(60),
            Duration::from_secs(300),
            Duration::from_secs(900),
        ]
    );
    assert_eq!(poller.app_processing_folder, Some(temp.path().join("app")));

    let folder = &snapshot.folders[0];
    assert_eq!(folder.track_time(), Duration::from_millis(250));
    assert_eq!(folder.filter.as_ref().map(|f| f.kind), Some(FilterKind::Regex));
    assert!(folder.trigger.move_file);
    assert_eq!(
        folder.trigger.parameters[0].source,
        Some(ParameterSource::ContentXml)
    );
    Ok(())
}

#[test]
fn missing_file_reports_io_error() {
    let err = load_config(std::path::Path::new("/definitely/missing/poller.yaml"));
    assert!(matches!(err, Err(ConfigError::Io { operation: "read", .. })));
}
