//! Consistency checks run on the merged configuration

use crate::app::config::error::{ConfigError, ConfigResult};
use crate::app::config::file::AppConfig;
use crate::core::logging::{LOG_FORMATS, LOG_LEVELS};
use regex::Regex;
use std::sync::OnceLock;

/// Legal Kafka topic names; the in-memory broker follows the same rule
fn topic_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]{1,249}$").ok())
        .as_ref()
}

pub fn validate_topic(field: &str, topic: &str) -> ConfigResult<()> {
    if topic == "." || topic == ".." {
        return Err(ConfigError::invalid(
            field,
            format!("topic name '{}' is reserved", topic),
        ));
    }
    if !topic_pattern().is_some_and(|pattern| pattern.is_match(topic)) {
        return Err(ConfigError::invalid(
            field,
            format!(
                "topic name '{}' must be 1-249 characters of letters, digits, '.', '_' or '-'",
                topic
            ),
        ));
    }
    Ok(())
}

fn positive(field: &str, value: usize, what: &str) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::invalid(
            field,
            format!("{what} must be greater than 0"),
        ));
    }
    Ok(())
}

/// Check every cross-field rule; the first violation is returned
pub fn validate_config(config: &AppConfig) -> ConfigResult<()> {
    if let Some(level) = config.log.level.as_deref() {
        if !LOG_LEVELS.contains(&level) {
            return Err(ConfigError::invalid(
                "log.level",
                format!("log level '{}' is not one of {}", level, LOG_LEVELS.join(", ")),
            ));
        }
    }
    if let Some(format) = config.log.format.as_deref() {
        if !LOG_FORMATS.contains(&format) {
            return Err(ConfigError::invalid(
                "log.format",
                format!("log format '{}' is not one of {}", format, LOG_FORMATS.join(", ")),
            ));
        }
    }

    let memory = &config.broker.memory;
    positive("broker.memory.partitions", memory.partitions, "partition count")?;
    positive("broker.memory.retention", memory.retention, "retention")?;
    positive(
        "broker.memory.max_batch_size",
        memory.max_batch_size,
        "maximum batch size",
    )?;
    if config.broker.cluster.brokers.trim().is_empty() {
        return Err(ConfigError::invalid(
            "broker.cluster.brokers",
            "bootstrap server list must not be empty",
        ));
    }

    let producer = &config.producer;
    validate_topic("producer.topic", &producer.topic)?;
    positive("producer.batch_size", producer.batch_size, "batch size")?;
    positive("producer.batch_count", producer.batch_count, "batch count")?;
    if !producer.target_min.is_finite() || producer.target_min < 0.0 {
        return Err(ConfigError::invalid(
            "producer.target_min",
            "target minimum must be a non-negative number",
        ));
    }
    if !producer.target_max.is_finite() || producer.target_min > producer.target_max {
        return Err(ConfigError::invalid(
            "producer.target_max",
            format!(
                "target band {}..{} is empty; the minimum must not exceed the maximum",
                producer.target_min, producer.target_max
            ),
        ));
    }
    if producer.delay_too_low_ms > producer.delay_in_band_ms {
        return Err(ConfigError::invalid(
            "producer.delay_too_low_ms",
            "the delay below the band must not exceed the in-band delay",
        ));
    }
    if producer.delay_in_band_ms >= producer.delay_too_high_ms {
        return Err(ConfigError::invalid(
            "producer.delay_too_high_ms",
            "the delay above the band must be longer than the in-band delay",
        ));
    }
    if producer.error_backoff_ms <= producer.delay_in_band_ms {
        return Err(ConfigError::invalid(
            "producer.error_backoff_ms",
            "the error backoff must be longer than the in-band delay",
        ));
    }

    let consumer = &config.consumer;
    validate_topic("consumer.topic", &consumer.topic)?;
    if consumer.group_id.trim().is_empty() {
        return Err(ConfigError::invalid(
            "consumer.group_id",
            "consumer group id must not be empty",
        ));
    }
    positive("consumer.concurrency", consumer.concurrency, "concurrency")?;
    if consumer.lag.interval_ms == 0 {
        return Err(ConfigError::invalid(
            "consumer.lag.interval_ms",
            "lag interval must be greater than 0",
        ));
    }
    if config.report.interval_ms == 0 {
        return Err(ConfigError::invalid(
            "report.interval_ms",
            "report interval must be greater than 0",
        ));
    }
    Ok(())
}
