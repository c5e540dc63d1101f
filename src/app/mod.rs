//! Command-line application
//!
//! - [`cli`]: clap arguments and configuration overrides
//! - [`config`]: TOML configuration file and validation
//! - [`runner`]: backend selection and the lifetime of one run
//! - [`reporter`]: periodic JSON stats snapshots
//! - [`startup`]: process entry

pub mod cli;
pub mod config;
pub mod error;
pub mod reporter;
pub mod runner;
pub mod startup;


pub use error::{AppError, AppResult};
