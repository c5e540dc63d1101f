//! Tests for the TOML configuration file

use crate::app::config::{load_config, AppConfig, Backend, ConfigError};
use crate::broker::Compression;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

fn parse(contents: &str) -> Result<AppConfig, ConfigError> {
    AppConfig::from_toml_str(contents, Path::new("streamload.toml"))
}

#[test]
fn test_empty_file_gives_defaults() {
    let config = parse("").unwrap();
    assert_eq!(config, AppConfig::default());

    let producer = config.producer_settings();
    assert_eq!(producer.topic, "high-throughput-topic");
    assert_eq!(producer.batch_size, 2_000);
    assert_eq!(producer.batch_count, 5);
    assert_eq!(producer.compression, Compression::Gzip);
    assert_eq!(producer.pacing.target_min, 10_000.0);
    assert_eq!(producer.pacing.target_max, 11_000.0);
    assert_eq!(producer.pacing.delay_too_high, Duration::from_millis(1_500));
    assert_eq!(producer.pacing.delay_in_band, Duration::from_millis(1_000));
    assert_eq!(producer.pacing.delay_too_low, Duration::from_millis(500));
    assert_eq!(producer.error_backoff, Duration::from_millis(2_000));

    let consumer = config.consumer_settings();
    assert_eq!(consumer.group_id, "high-throughput-group");
    assert_eq!(consumer.concurrency, 8);
    assert!(!consumer.from_beginning);
    assert!(consumer.lag.enabled);
    assert_eq!(consumer.lag.interval, Duration::from_secs(10));
    assert_eq!(consumer.report_interval, Duration::from_secs(1));
}

#[test]
fn test_sections_override_defaults() {
    let config = parse(
        r#"
[log]
level = "debug"
format = "json"

[broker]
backend = "kafka"
memory = { partitions = 3, poll_interval_ms = 10 }

[broker.cluster]
brokers = "kafka-1:9092,kafka-2:9092"

[producer]
topic = "orders"
batch_size = 100
compression = "lz4"
target_min = 500
target_max = 600.5

[consumer]
topic = "orders"
group_id = "audit"
concurrency = 2
from_beginning = true

[consumer.lag]
enabled = false
interval_ms = 2500

[report]
interval_ms = 5000
stats = false
"#,
    )
    .unwrap();

    assert_eq!(config.log.level.as_deref(), Some("debug"));
    assert_eq!(config.broker.backend, Backend::Kafka);
    assert_eq!(config.broker.memory.partitions, 3);
    assert_eq!(config.broker.memory.poll_interval, Duration::from_millis(10));
    assert_eq!(config.broker.cluster.brokers, "kafka-1:9092,kafka-2:9092");
    assert_eq!(config.broker.cluster.client_id, "streamload");

    let producer = config.producer_settings();
    assert_eq!(producer.topic, "orders");
    assert_eq!(producer.batch_size, 100);
    assert_eq!(producer.batch_count, 5);
    assert_eq!(producer.compression, Compression::Lz4);
    assert_eq!(producer.pacing.target_max, 600.5);
    assert_eq!(producer.report_interval, Duration::from_secs(5));

    let consumer = config.consumer_settings();
    assert_eq!(consumer.group_id, "audit");
    assert!(consumer.from_beginning);
    assert!(!consumer.lag.enabled);
    assert_eq!(consumer.lag.interval, Duration::from_millis(2_500));
    assert!(!config.report.stats);
}

#[test]
fn test_unknown_key_is_rejected() {
    let error = parse("[producer]\nbatch_sise = 10\n").unwrap_err();
    assert!(matches!(error, ConfigError::Parse { .. }));
    assert!(error.to_string().contains("streamload.toml"));
}

#[test]
fn test_wrong_type_is_rejected() {
    let error = parse("[consumer]\nconcurrency = \"eight\"\n").unwrap_err();
    assert!(matches!(error, ConfigError::Parse { .. }));
}

#[tokio::test]
async fn test_load_config_reads_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[producer]\nbatch_count = 9").unwrap();

    let config = load_config(Some(file.path())).await.unwrap();
    assert_eq!(config.producer.batch_count, 9);
}

#[tokio::test]
async fn test_missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    let error = load_config(Some(path.as_path())).await.unwrap_err();
    assert!(matches!(error, ConfigError::NotFound { .. }));
}
