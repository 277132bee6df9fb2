//! Tests for `src/logging.rs`.

use quietkey::logging::{LoggingGuard, LOG_FILE_PREFIX};

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn init_production_creates_logs_dir() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("nested").join("logs");
    assert!(!logs_dir.exists());

    // Another test may own the global subscriber; the directory is still created.
    let guard = quietkey::logging::init_production(&logs_dir).expect("init");
    assert!(logs_dir.exists(), "logs directory should be created");
    assert!(format!("{guard:?}").starts_with("LoggingGuard"));
}

#[test]
fn init_cli_can_run_twice() {
    quietkey::logging::init_cli();
    quietkey::logging::init_cli();
}

#[test]
fn default_logs_dir_lives_under_config_dir() {
    let logs = quietkey::logging::default_logs_dir().expect("logs dir");
    assert!(logs.ends_with(".quietkey/logs"));
    assert!(LOG_FILE_PREFIX.starts_with("quietkey"));
}
