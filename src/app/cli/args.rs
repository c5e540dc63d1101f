//! Command-line arguments
//!
//! Global flags select configuration, logging and the broker backend; the
//! subcommand picks which loops run. Every override is optional and only
//! replaces the configuration value when given.

use crate::app::config::{AppConfig, Backend};
use crate::broker::Compression;
use crate::core::logging::{LOG_FORMATS, LOG_LEVELS};
use clap::{Args, Parser, Subcommand};
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "streamload")]
#[command(about = "Rate-controlled load producer and batch consumer for partitioned logs")]
#[command(version)]
pub struct Cli {
    /// Configuration file (default: <config dir>/Streamload/streamload.toml)
    #[arg(long = "config-file", value_name = "FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// Log level
    #[arg(long = "log-level", value_name = "LEVEL", value_parser = LOG_LEVELS, global = true)]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long = "log-format", value_name = "FORMAT", value_parser = LOG_FORMATS, global = true)]
    pub log_format: Option<String>,

    /// Log file path (use 'none' to disable file logging)
    #[arg(long = "log-file", value_name = "FILE", global = true)]
    pub log_file: Option<String>,

    /// Force colored output
    #[arg(long, conflicts_with = "no_color", global = true)]
    pub color: bool,

    /// Disable colored output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Broker backend
    #[arg(long, value_enum, global = true)]
    pub backend: Option<Backend>,

    /// Print the final metrics in Prometheus text format on exit
    #[arg(long = "dump-metrics", global = true)]
    pub dump_metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Produce synthetic messages at a controlled rate
    Produce {
        #[command(flatten)]
        common: CommonArgs,
        #[command(flatten)]
        producer: ProducerOverrides,
    },
    /// Consume the topic in batches and monitor consumer lag
    Consume {
        #[command(flatten)]
        common: CommonArgs,
        #[command(flatten)]
        consumer: ConsumerOverrides,
    },
    /// Run the consumer and the producer against the same topic
    Run {
        #[command(flatten)]
        common: CommonArgs,
        #[command(flatten)]
        producer: ProducerOverrides,
        #[command(flatten)]
        consumer: ConsumerOverrides,
    },
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct CommonArgs {
    /// Topic to produce to and consume from
    #[arg(long, value_name = "TOPIC")]
    pub topic: Option<String>,

    /// Stop after this long (e.g. 90s, 5m); runs until interrupted otherwise
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub duration: Option<Duration>,
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct ProducerOverrides {
    /// Messages per batch
    #[arg(long = "batch-size", value_name = "N")]
    pub batch_size: Option<usize>,

    /// Batches sent concurrently per iteration
    #[arg(long = "batch-count", value_name = "N")]
    pub batch_count: Option<usize>,

    /// Lower edge of the target throughput band (msg/s)
    #[arg(long = "target-min", value_name = "RATE")]
    pub target_min: Option<f64>,

    /// Upper edge of the target throughput band (msg/s)
    #[arg(long = "target-max", value_name = "RATE")]
    pub target_max: Option<f64>,

    /// Batch compression codec
    #[arg(long, value_name = "CODEC")]
    pub compression: Option<Compression>,
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct ConsumerOverrides {
    /// Consumer group id
    #[arg(long = "group-id", value_name = "GROUP")]
    pub group_id: Option<String>,

    /// Partitions processed at the same time
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Start from the oldest retained record when the group has no commits
    #[arg(long = "from-beginning")]
    pub from_beginning: bool,

    /// Do not run the lag monitor
    #[arg(long = "no-lag")]
    pub no_lag: bool,
}

/// Loops selected by the subcommand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSelection {
    pub producer: bool,
    pub consumer: bool,
}

impl Command {
    pub fn common(&self) -> &CommonArgs {
        match self {
            Command::Produce { common, .. }
            | Command::Consume { common, .. }
            | Command::Run { common, .. } => common,
        }
    }

    pub fn loops(&self) -> LoopSelection {
        match self {
            Command::Produce { .. } => LoopSelection {
                producer: true,
                consumer: false,
            },
            Command::Consume { .. } => LoopSelection {
                producer: false,
                consumer: true,
            },
            Command::Run { .. } => LoopSelection {
                producer: true,
                consumer: true,
            },
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.common().duration
    }
}

impl Cli {
    /// Layer the command line over a loaded configuration
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(level) = &self.log_level {
            config.log.level = Some(level.clone());
        }
        if let Some(format) = &self.log_format {
            config.log.format = Some(format.clone());
        }
        if let Some(file) = &self.log_file {
            config.log.file = Some(file.clone());
        }
        if self.color {
            config.log.color = Some(true);
        }
        if self.no_color {
            config.log.color = Some(false);
        }
        if let Some(backend) = self.backend {
            config.broker.backend = backend;
        }

        if let Some(topic) = &self.command.common().topic {
            config.producer.topic = topic.clone();
            config.consumer.topic = topic.clone();
        }
        match &self.command {
            Command::Produce { producer, .. } => producer.apply_to(config),
            Command::Consume { consumer, .. } => consumer.apply_to(config),
            Command::Run {
                producer, consumer, ..
            } => {
                producer.apply_to(config);
                consumer.apply_to(config);
            }
        }
    }
}

impl ProducerOverrides {
    fn apply_to(&self, config: &mut AppConfig) {
        let section = &mut config.producer;
        if let Some(batch_size) = self.batch_size {
            section.batch_size = batch_size;
        }
        if let Some(batch_count) = self.batch_count {
            section.batch_count = batch_count;
        }
        if let Some(target_min) = self.target_min {
            section.target_min = target_min;
        }
        if let Some(target_max) = self.target_max {
            section.target_max = target_max;
        }
        if let Some(compression) = self.compression {
            section.compression = compression;
        }
    }
}

impl ConsumerOverrides {
    fn apply_to(&self, config: &mut AppConfig) {
        let section = &mut config.consumer;
        if let Some(group_id) = &self.group_id {
            section.group_id = group_id.clone();
        }
        if let Some(concurrency) = self.concurrency {
            section.concurrency = concurrency;
        }
        if self.from_beginning {
            section.from_beginning = true;
        }
        if self.no_lag {
            section.lag.enabled = false;
        }
    }
}

fn duration_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(\d+)(ms|s|m|h)?$").ok())
        .as_ref()
}

/// Parse `500ms`, `30s`, `5m`, `1h`; a bare number is seconds
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let invalid = || format!("'{}' is not a duration like 500ms, 30s, 5m or 1h", value);
    let captures = duration_pattern()
        .and_then(|pattern| pattern.captures(value.trim()))
        .ok_or_else(invalid)?;
    let amount: u64 = captures[1].parse().map_err(|_| invalid())?;
    let duration = match captures.get(2).map(|unit| unit.as_str()) {
        Some("ms") => Duration::from_millis(amount),
        Some("m") => Duration::from_secs(amount.saturating_mul(60)),
        Some("h") => Duration::from_secs(amount.saturating_mul(3_600)),
        _ => Duration::from_secs(amount),
    };
    if duration.is_zero() {
        return Err("duration must be greater than 0".to_string());
    }
    Ok(duration)
}
