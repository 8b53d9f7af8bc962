use std::{io::Write, sync::Arc};

use guardsync::{ConfigError, InMemoryAdminApi, InMemoryClientApi, SyncConfig, SyncService};
use tempfile::NamedTempFile;

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn partial_file_overrides_only_named_fields() {
    let file = config_file(r#"{ "sync_interval_secs": 10, "max_attempts": 2 }"#);

    let config = SyncConfig::from_file(file.path()).unwrap();

    assert_eq!(config.sync_interval_secs, 10);
    assert_eq!(config.max_attempts, 2);
    assert_eq!(config.initial_delay_ms, SyncConfig::default().initial_delay_ms);
    assert_eq!(config.processed_history, 1024);
}

#[test]
fn malformed_file_reports_parse_error_with_path() {
    let file = config_file("{ sync_interval_secs: ");

    let err = SyncConfig::from_file(file.path()).unwrap_err();

    match &err {
        ConfigError::Parse { path, .. } => assert_eq!(path, file.path()),
        other => panic!("unexpected error: {other}"),
    }
    let err: guardsync::Error = err.into();
    assert_eq!(err.module(), "config");
    assert!(!err.is_retryable());
}

#[test]
fn invalid_values_are_rejected_on_load() {
    let file = config_file(r#"{ "sync_interval_secs": 0 }"#);

    let err = SyncConfig::from_file(file.path()).unwrap_err();

    assert!(matches!(err, ConfigError::Invalid(_)));
    assert!(guardsync::Error::from(err).is_validation_error());
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.json");

    assert!(matches!(
        SyncConfig::from_file(&missing),
        Err(ConfigError::Io { .. })
    ));
}

#[test]
fn builder_refuses_invalid_configuration() {
    let result = SyncService::builder(
        Arc::new(InMemoryAdminApi::new()),
        Arc::new(InMemoryClientApi::new()),
    )
    .config(SyncConfig {
        max_attempts: 0,
        ..SyncConfig::default()
    })
    .build();

    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}
