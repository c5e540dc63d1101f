//! Configuration: TOML file, built-in defaults and validation
//!
//! Precedence is command line over file over defaults. The command-line
//! layer is applied by [`crate::app::cli`] before [`validate_config`] runs.

pub mod error;
pub mod file;
pub mod validation;

#[cfg(test)]
mod tests;

pub use error::{ConfigError, ConfigResult};
pub use file::{
    default_config_path, load_config, AppConfig, Backend, BrokerSection, ConsumerSection,
    LagSection, LogSection, ProducerSection, ReportSection,
};
pub use validation::{validate_config, validate_topic};
