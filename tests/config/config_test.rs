//! Coverage for config parsing, validation and path resolution.

use std::io::Write;

use quietkey::config::{config_dir, load_config, Config, LockdownConfig, RitualConfig};
use quietkey::vault::keys::KeyMixing;

#[test]
fn default_lockdown_values() {
    let lockdown = LockdownConfig::default();
    assert_eq!(lockdown.failure_threshold, 3);
    assert_eq!(lockdown.seal_duration_secs, 300);
    assert_eq!(lockdown.seal_duration(), chrono::Duration::seconds(300));
}

#[test]
fn default_ritual_values() {
    let ritual = RitualConfig::default();
    assert!((ritual.confidence_threshold - 0.7).abs() < f64::EPSILON);
    assert_eq!(ritual.listen_timeout_secs, 30);
    assert_eq!(ritual.grant_ttl(), chrono::Duration::seconds(120));
}

#[test]
fn config_dir_resolves() {
    let path = match config_dir() {
        Ok(path) => path,
        Err(err) => panic!("config dir should resolve: {err}"),
    };
    assert!(path.ends_with(".quietkey"));
}

#[test]
fn partial_sections_keep_other_defaults() {
    let toml_str = r#"
[lockdown]
failure_threshold = 5

[vault]
key_mixing = "xor"
"#;
    let config: Config = match toml::from_str(toml_str) {
        Ok(config) => config,
        Err(err) => panic!("partial config should parse: {err}"),
    };
    assert_eq!(config.lockdown.failure_threshold, 5);
    assert_eq!(config.lockdown.seal_duration_secs, 300);
    assert_eq!(config.vault.key_mixing, KeyMixing::Xor);
    assert!(config.validate().is_ok());
}

#[test]
fn zero_threshold_is_rejected() {
    let mut config = Config::default();
    config.lockdown.failure_threshold = 0;
    let err = config.validate().expect_err("zero threshold");
    assert!(err.to_string().contains("failure_threshold"));
}

#[test]
fn out_of_range_confidence_is_rejected() {
    let mut config = Config::default();
    config.ritual.confidence_threshold = 1.5;
    assert!(config.validate().is_err());
    config.ritual.confidence_threshold = f64::NAN;
    assert!(config.validate().is_err());
}

#[test]
fn zero_capacity_is_rejected() {
    let mut config = Config::default();
    config.audit.capacity = 0;
    let err = config.validate().expect_err("zero capacity");
    assert!(err.to_string().contains("audit.capacity"));
}

#[test]
fn load_config_reads_and_validates_a_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "[temporal]\nsweep_interval_secs = 15").expect("write");
    let config = load_config(file.path()).expect("load");
    assert_eq!(config.temporal.sweep_interval_secs, 15);

    let mut bad = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(bad, "[lockdown]\nfailure_threshold = 0").expect("write");
    assert!(load_config(bad.path()).is_err());
}

#[test]
fn load_config_reports_missing_and_malformed_files() {
    let dir = tempfile::tempdir().expect("temp dir");
    let missing = dir.path().join("nope.toml");
    let err = load_config(&missing).expect_err("missing file");
    assert!(err.to_string().contains("failed to read"));

    let garbled = dir.path().join("garbled.toml");
    std::fs::write(&garbled, "[lockdown\n").expect("write");
    let err = load_config(&garbled).expect_err("garbled file");
    assert!(err.to_string().contains("failed to parse"));
}

#[test]
fn rendered_defaults_parse_back() {
    let rendered = Config::default().to_toml().expect("render");
    let parsed: Config = toml::from_str(&rendered).expect("parse rendered");
    assert_eq!(parsed.lockdown.failure_threshold, 3);
    assert_eq!(parsed.audit.capacity, Config::default().audit.capacity);
    assert_eq!(parsed.vault.key_mixing, KeyMixing::Hkdf);
}
