//! TOML configuration file
//!
//! Every section and key is optional; missing values fall back to the
//! built-in defaults. Unknown keys are rejected so that a misspelt setting
//! does not silently run with the default.
//!
//! ```toml
//! [log]
//! level = "info"
//!
//! [broker]
//! backend = "memory"
//! memory = { partitions = 12 }
//!
//! [producer]
//! topic = "high-throughput-topic"
//! batch_size = 2000
//! target_min = 10000
//! target_max = 11000
//!
//! [consumer]
//! group_id = "high-throughput-group"
//! concurrency = 8
//!
//! [consumer.lag]
//! interval_ms = 10000
//!
//! [report]
//! interval_ms = 1000
//! ```

use crate::app::config::error::{ConfigError, ConfigResult};
use crate::broker::memory::MemoryBrokerConfig;
use crate::broker::{ClusterSettings, Compression};
use crate::consumer::{ConsumerSettings, LagSettings};
use crate::producer::{PacingSettings, ProducerSettings};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Broker implementation the loops talk to
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    clap::ValueEnum,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process partitioned broker
    #[default]
    Memory,
    /// Kafka cluster (requires the `kafka` feature)
    Kafka,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSection {
    pub level: Option<String>,
    pub format: Option<String>,
    /// Log file path; "none" or "-" disables file logging
    pub file: Option<String>,
    pub color: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerSection {
    pub backend: Backend,
    pub memory: MemoryBrokerConfig,
    pub cluster: ClusterSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProducerSection {
    pub topic: String,
    pub batch_size: usize,
    pub batch_count: usize,
    pub compression: Compression,
    pub target_min: f64,
    pub target_max: f64,
    pub delay_too_high_ms: u64,
    pub delay_in_band_ms: u64,
    pub delay_too_low_ms: u64,
    pub error_backoff_ms: u64,
}

impl Default for ProducerSection {
    fn default() -> Self {
        let settings = ProducerSettings::default();
        let pacing = settings.pacing;
        Self {
            topic: settings.topic,
            batch_size: settings.batch_size,
            batch_count: settings.batch_count,
            compression: settings.compression,
            target_min: pacing.target_min,
            target_max: pacing.target_max,
            delay_too_high_ms: as_millis(pacing.delay_too_high),
            delay_in_band_ms: as_millis(pacing.delay_in_band),
            delay_too_low_ms: as_millis(pacing.delay_too_low),
            error_backoff_ms: as_millis(settings.error_backoff),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LagSection {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for LagSection {
    fn default() -> Self {
        let lag = LagSettings::default();
        Self {
            enabled: lag.enabled,
            interval_ms: as_millis(lag.interval),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsumerSection {
    pub topic: String,
    pub group_id: String,
    pub concurrency: usize,
    pub from_beginning: bool,
    pub lag: LagSection,
}

impl Default for ConsumerSection {
    fn default() -> Self {
        let settings = ConsumerSettings::default();
        Self {
            topic: settings.topic,
            group_id: settings.group_id,
            concurrency: settings.concurrency,
            from_beginning: settings.from_beginning,
            lag: LagSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportSection {
    /// Cadence of throughput logging inside the loops and of the stats reporter
    pub interval_ms: u64,
    /// Log a JSON stats snapshot of each loop on every interval
    pub stats: bool,
}

impl Default for ReportSection {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            stats: true,
        }
    }
}

/// Whole configuration: built-in defaults, then the file, then the command line
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub log: LogSection,
    pub broker: BrokerSection,
    pub producer: ProducerSection,
    pub consumer: ConsumerSection,
    pub report: ReportSection,
}

impl AppConfig {
    pub fn from_toml_str(contents: &str, path: &Path) -> ConfigResult<Self> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report.interval_ms)
    }

    pub fn producer_settings(&self) -> ProducerSettings {
        let section = &self.producer;
        ProducerSettings {
            topic: section.topic.clone(),
            batch_size: section.batch_size,
            batch_count: section.batch_count,
            compression: section.compression,
            pacing: PacingSettings {
                target_min: section.target_min,
                target_max: section.target_max,
                delay_too_high: Duration::from_millis(section.delay_too_high_ms),
                delay_in_band: Duration::from_millis(section.delay_in_band_ms),
                delay_too_low: Duration::from_millis(section.delay_too_low_ms),
            },
            error_backoff: Duration::from_millis(section.error_backoff_ms),
            report_interval: self.report_interval(),
        }
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        let section = &self.consumer;
        ConsumerSettings {
            topic: section.topic.clone(),
            group_id: section.group_id.clone(),
            concurrency: section.concurrency,
            from_beginning: section.from_beginning,
            report_interval: self.report_interval(),
            lag: LagSettings {
                enabled: section.lag.enabled,
                interval: Duration::from_millis(section.lag.interval_ms),
            },
        }
    }
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// `<config dir>/Streamload/streamload.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("Streamload").join("streamload.toml"))
}

/// Load the configuration file
///
/// An explicitly given file must exist. Without one, the default location is
/// used when present and the built-in defaults otherwise.
pub async fn load_config(config_file: Option<&Path>) -> ConfigResult<AppConfig> {
    let path = match config_file {
        Some(path) if !path.exists() => {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            })
        }
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => {
                log::debug!("No configuration file found; using defaults");
                return Ok(AppConfig::default());
            }
        },
    };

    let contents = tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
    AppConfig::from_toml_str(&contents, &path)
}
