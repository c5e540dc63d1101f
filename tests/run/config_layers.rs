//! Configuration layering through the public entry points
//!
//! These tests point `XDG_CONFIG_HOME` at a temporary directory, so they run
//! serially and only where the config directory follows it.
#![cfg(target_os = "linux")]

use clap::Parser;
use serial_test::serial;
use std::path::Path;
use streamload::app::cli::Cli;
use streamload::app::config::{default_config_path, ConfigError};
use streamload::app::startup::prepare_config;
use streamload::app::AppError;
use streamload::core::error_handling::ContextualError;
use tempfile::TempDir;

/// Restores the previous `XDG_CONFIG_HOME` when dropped
struct ConfigHome {
    dir: TempDir,
    previous: Option<String>,
}

impl ConfigHome {
    fn new() -> Self {
        let previous = std::env::var("XDG_CONFIG_HOME").ok();
        let dir = TempDir::new().unwrap();
        std::env::set_var("XDG_CONFIG_HOME", dir.path());
        Self { dir, previous }
    }

    fn write_default(&self, contents: &str) {
        let path = default_config_path().unwrap();
        assert!(path.starts_with(self.dir.path()));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn write_other(&self, name: &str, contents: &str) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }
}

impl Drop for ConfigHome {
    fn drop(&mut self) {
        match &self.previous {
            Some(value) => std::env::set_var("XDG_CONFIG_HOME", value),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }
    }
}

fn cli(args: &[&str]) -> Cli {
    let mut full = vec!["streamload"];
    full.extend_from_slice(args);
    Cli::try_parse_from(full).unwrap()
}

#[tokio::test]
#[serial]
async fn test_default_location_is_read_and_cli_wins() {
    let home = ConfigHome::new();
    home.write_default(
        "[producer]\nbatch_size = 77\n\n[consumer]\ngroup_id = \"from-file\"\nconcurrency = 3\n",
    );

    let config = prepare_config(&cli(&["run", "--group-id", "from-cli"]))
        .await
        .unwrap();
    assert_eq!(config.producer.batch_size, 77);
    assert_eq!(config.consumer.concurrency, 3);
    assert_eq!(config.consumer.group_id, "from-cli");
}

#[tokio::test]
#[serial]
async fn test_explicit_file_replaces_default_location() {
    let home = ConfigHome::new();
    home.write_default("[producer]\nbatch_size = 77\n");
    let other = home.write_other("custom.toml", "[producer]\nbatch_count = 9\n");

    let config = prepare_config(&cli(&["--config-file", &other, "produce"]))
        .await
        .unwrap();
    assert_eq!(config.producer.batch_count, 9);
    // Nothing from the default location is merged in
    assert_eq!(config.producer.batch_size, 2_000);
}

#[tokio::test]
#[serial]
async fn test_no_file_anywhere_gives_defaults() {
    let _home = ConfigHome::new();
    let config = prepare_config(&cli(&["consume"])).await.unwrap();
    assert_eq!(config.consumer.group_id, "high-throughput-group");
    assert_eq!(config.producer.topic, "high-throughput-topic");
}

#[tokio::test]
#[serial]
async fn test_invalid_file_value_is_reported_before_running() {
    let home = ConfigHome::new();
    home.write_default("[producer]\nbatch_size = 0\n");

    let error = prepare_config(&cli(&["produce"])).await.unwrap_err();
    assert!(error.is_user_actionable());
    match error {
        AppError::Config(ConfigError::InvalidValue { field, .. }) => {
            assert_eq!(field, "producer.batch_size")
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
#[serial]
async fn test_missing_explicit_file_is_an_error() {
    let home = ConfigHome::new();
    let missing = home.dir.path().join("absent.toml");
    let missing = missing.to_string_lossy();

    let error = prepare_config(&cli(&["--config-file", &missing, "run"]))
        .await
        .unwrap_err();
    match error {
        AppError::Config(ConfigError::NotFound { path }) => {
            assert_eq!(path, Path::new(missing.as_ref()))
        }
        other => panic!("unexpected error: {other}"),
    }
}
