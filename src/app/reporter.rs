//! Periodic stats snapshots of the running loops
//!
//! Each interval the reporter reads `stats()` from every controller and logs
//! the snapshot as one JSON line, the same body the control surface returns.

use crate::core::controller::{Direction, LoadController};
use crate::core::loop_state::{LoopStats, RunToken};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// One loop's snapshot, tagged with its direction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsLine {
    pub direction: Direction,
    #[serde(flatten)]
    pub stats: LoopStats,
}

pub struct StatsReporter {
    interval: Duration,
    controllers: Vec<Arc<dyn LoadController>>,
}

impl StatsReporter {
    pub fn new(interval: Duration, controllers: Vec<Arc<dyn LoadController>>) -> Self {
        Self {
            interval,
            controllers,
        }
    }

    pub fn snapshot(&self) -> Vec<StatsLine> {
        self.controllers
            .iter()
            .map(|controller| StatsLine {
                direction: controller.direction(),
                stats: controller.stats(),
            })
            .collect()
    }

    pub fn report_once(&self) {
        for line in self.snapshot() {
            match serde_json::to_string(&line) {
                Ok(json) => log::info!("stats {}", json),
                Err(e) => log::debug!("Could not serialise {} stats: {}", line.direction, e),
            }
        }
    }

    pub fn spawn(self, mut token: RunToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => self.report_once(),
                }
            }
        })
    }
}
