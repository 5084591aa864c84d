use super::*;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_default_config_is_valid() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.task.count, 4);
    assert_eq!(config.task.listen, "0.0.0.0:12345");
    assert_eq!(config.task.crontab_redis_action, "crontab_action");
    assert_eq!(config.worker.dispatch_interval_ms, 100);
    assert_eq!(config.worker.command_ttl_seconds, 5);
}

#[test]
fn test_partial_toml_uses_defaults() {
    let config = AppConfig::from_toml(
        r#"
[task]
count = 2
prefix = "wa_"
"#,
    )
    .unwrap();

    assert_eq!(config.task.count, 2);
    assert_eq!(config.task.task_table(), "wa_task_definitions");
    assert_eq!(config.task.log_table(), "wa_task_execution_log");
    assert_eq!(config.database.url, "sqlite://crontab.db");
}

#[test]
fn test_toml_roundtrip() {
    let config = AppConfig::default();
    let text = config.to_toml().unwrap();
    let parsed = AppConfig::from_toml(&text).unwrap();
    assert_eq!(parsed.task.crontab_table, config.task.crontab_table);
    assert_eq!(parsed.logging.format, config.logging.format);
}

#[test]
fn test_invalid_table_name_rejected() {
    let mut config = AppConfig::default();
    config.task.prefix = "bad;prefix".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_workers_rejected() {
    let result = AppConfig::from_toml("[task]\ncount = 0\n");
    assert!(result.is_err());
}

#[test]
fn test_non_sqlite_url_rejected() {
    let result = AppConfig::from_toml("[database]\nurl = \"postgres://localhost/db\"\n");
    assert!(result.is_err());
}

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[task]
count = 3
debug = true

[redis]
in_memory = true

[logging]
format = "json"
"#
    )
    .unwrap();

    let path = file.path().to_str().unwrap().to_string();
    let config = AppConfig::load(Some(&path)).unwrap();
    assert_eq!(config.task.count, 3);
    assert!(config.task.debug);
    assert!(config.redis.in_memory);
    assert_eq!(config.logging.format, "json");
    assert_eq!(config.worker.http_timeout_seconds, 30);
}

#[test]
fn test_load_missing_file_fails() {
    let result = AppConfig::load(Some("/nonexistent/crontab.toml"));
    assert!(result.is_err());
}
