//! Control surface shared by the producer and the consumer
//!
//! Both loops expose the same start/stop/stats operations. An outer layer
//! (the CLI here, an HTTP facade elsewhere) drives them through the
//! [`LoadController`] trait without knowing which direction it talks to.

use crate::broker::BrokerError;
use crate::core::loop_state::LoopStats;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Timeouts used when the process shuts the loops down
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub shutdown_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Which end of the topic a loop drives
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum_macros::Display, strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Producer,
    Consumer,
}

impl Direction {
    fn verb(self) -> &'static str {
        match self {
            Direction::Producer => "producing",
            Direction::Consumer => "consuming",
        }
    }
}

/// Outcome of a start or stop request
///
/// Repeated requests are not errors: they come back as `AlreadyRunning` or
/// `NotRunning` so the caller can report them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    Started,
    AlreadyRunning,
    Stopped,
    NotRunning,
}

impl ControlStatus {
    pub fn message(self, direction: Direction) -> String {
        let verb = direction.verb();
        match self {
            ControlStatus::Started => format!("Started {verb} messages"),
            ControlStatus::AlreadyRunning => format!("Already {verb} messages"),
            ControlStatus::Stopped => format!("Stopped {verb} messages"),
            ControlStatus::NotRunning => format!("Not {verb} messages"),
        }
    }
}

/// Body returned to control-surface callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlResponse {
    pub status: ControlStatus,
    pub message: String,
}

impl ControlResponse {
    pub fn new(direction: Direction, status: ControlStatus) -> Self {
        Self {
            status,
            message: status.message(direction),
        }
    }
}

/// Lifecycle failures surfaced to the caller of start/stop
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Failed to start {direction}: {source}")]
    StartFailed {
        direction: Direction,
        #[source]
        source: BrokerError,
    },

    #[error("Failed to stop {direction}: {source}")]
    StopFailed {
        direction: Direction,
        #[source]
        source: BrokerError,
    },

    #[error("Failed to shut down {direction}: {source}")]
    ShutdownFailed {
        direction: Direction,
        #[source]
        source: BrokerError,
    },
}

impl crate::core::error_handling::ContextualError for ControlError {
    fn is_user_actionable(&self) -> bool {
        false
    }

    fn user_message(&self) -> Option<&str> {
        None
    }
}

pub type ControlResult<T> = Result<T, ControlError>;

/// A controllable loop with observable state
#[async_trait]
pub trait LoadController: Send + Sync {
    fn direction(&self) -> Direction;

    /// Reset counters and launch the loop; a no-op when already running
    async fn start(&self) -> ControlResult<ControlStatus>;

    /// Halt the loop; a no-op when not running
    async fn stop(&self) -> ControlResult<ControlStatus>;

    /// Pure read of the current counters
    fn stats(&self) -> LoopStats;

    /// Stop if needed and release the broker connection
    async fn shutdown(&self) -> ControlResult<()>;
}
