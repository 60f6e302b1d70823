//! ---
//! lpm_section: "01-core-functionality"
//! lpm_subsection: "tests"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Configuration loading integration tests."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
use std::fs;
use std::time::Duration;

use lpm_common::config::{CompletionMode, LpmConfig, Topology};
use lpm_common::{init_tracing, LogFormat, LoggingConfig};
use tempfile::tempdir;

const CROSS_SCENARIO: &str = r#"
[scenario]
topology = "cross"
lpm_timeout = 600
options = "--requirerr 1"

[partition]
name = "lpar01"
host_ip = "10.0.0.5"

[host]
address = "10.0.0.5"
username = "root"
password = "passw0rd"

[controller]
address = "hmc-a.lab"
username = "hscroot"
password = "abc123"
managed_system = "srcSys"
target_managed_system = "dstSys"

[remote_controller]
address = "hmc-b.lab"
username = "hscroot"
password = "def456"

[rmc]
first_phase_timeout = 30
poll_interval = 2

[cross]
completion = "poll"
poll_interval = 15
"#;

#[test]
fn loads_first_existing_candidate() {
    let dir = tempdir().expect("tempdir");
    let missing = dir.path().join("missing.toml");
    let present = dir.path().join("lpm.toml");
    fs::write(&present, CROSS_SCENARIO).expect("write config");

    let loaded = LpmConfig::load_with_source(&[missing, present.clone()]).expect("config loads");
    assert_eq!(loaded.source, present);

    let config = loaded.config;
    assert_eq!(config.scenario.topology, Topology::Cross);
    assert_eq!(config.scenario.lpm_timeout, Duration::from_secs(600));
    assert_eq!(config.scenario.options.as_deref(), Some("--requirerr 1"));
    assert_eq!(config.rmc.first_phase_timeout, Duration::from_secs(30));
    assert_eq!(config.rmc.second_phase_timeout, Duration::from_secs(300));
    assert_eq!(config.rmc.total_wait(), Duration::from_secs(330));
    assert_eq!(config.cross.completion, CompletionMode::Poll);
    assert_eq!(
        config.remote_controller.as_ref().map(|r| r.address.as_str()),
        Some("hmc-b.lab")
    );
}

#[test]
fn reports_every_inspected_candidate() {
    let dir = tempdir().expect("tempdir");
    let a = dir.path().join("a.toml");
    let b = dir.path().join("b.toml");
    let err = LpmConfig::load_with_source(&[a, b]).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("a.toml"));
    assert!(message.contains("b.toml"));
}

#[test]
fn tracing_initialises_into_log_directory() {
    let dir = tempdir().expect("tempdir");
    let logging = LoggingConfig {
        directory: dir.path().join("logs"),
        format: LogFormat::StructuredJson,
        file_prefix: Some("lpm-test".into()),
    };
    init_tracing("lpmctl", &logging).expect("tracing init");
    assert!(logging.directory.is_dir());
}
