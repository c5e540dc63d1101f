//! CLI module containing argument parsing and configuration overrides

pub mod args;

#[cfg(test)]
mod tests;

pub use args::{
    parse_duration, Cli, Command, CommonArgs, ConsumerOverrides, LoopSelection, ProducerOverrides,
};
