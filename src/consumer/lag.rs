//! Periodic consumer lag sampling
//!
//! Every tick opens an admin connection, fetches the topic's latest offsets
//! and the group's committed offsets, and publishes `latest - committed`
//! per partition. A failed tick is logged and skipped; the next tick runs
//! on schedule.

use crate::broker::{
    AdminClient, BrokerError, BrokerResult, PartitionOffset, TopicPartitionOffsets,
};
use crate::core::loop_state::{LoopState, RunToken};
use crate::stats::StatsSink;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LagSample {
    pub topic: String,
    pub group_id: String,
    pub partition: i32,
    pub lag: i64,
}

/// Join latest and committed offsets by partition
///
/// Partitions without a committed offset yield no sample. A committed
/// offset past the latest one is reported as an error for the whole poll.
pub fn compute_lag(
    topic: &str,
    group_id: &str,
    latest: &[PartitionOffset],
    committed: &[TopicPartitionOffsets],
) -> BrokerResult<Vec<LagSample>> {
    let committed_by_partition: HashMap<i32, i64> = committed
        .iter()
        .filter(|entry| entry.topic == topic)
        .flat_map(|entry| entry.partitions.iter())
        .filter(|p| p.offset >= 0)
        .map(|p| (p.partition, p.offset))
        .collect();

    let mut samples = latest
        .iter()
        .filter_map(|latest| {
            let committed = *committed_by_partition.get(&latest.partition)?;
            let lag = latest.offset - committed;
            Some(if lag < 0 {
                Err(BrokerError::NegativeLag {
                    topic: topic.to_string(),
                    partition: latest.partition,
                    latest: latest.offset,
                    committed,
                })
            } else {
                Ok(LagSample {
                    topic: topic.to_string(),
                    group_id: group_id.to_string(),
                    partition: latest.partition,
                    lag,
                })
            })
        })
        .collect::<BrokerResult<Vec<_>>>()?;
    samples.sort_by_key(|sample| sample.partition);
    Ok(samples)
}

pub struct LagMonitor {
    admin: Arc<dyn AdminClient>,
    stats: StatsSink,
    topic: String,
    group_id: String,
    interval: Duration,
    run: Option<Arc<LoopState>>,
}

impl LagMonitor {
    pub fn new(
        admin: Arc<dyn AdminClient>,
        stats: StatsSink,
        topic: &str,
        group_id: &str,
        interval: Duration,
    ) -> Self {
        Self {
            admin,
            stats,
            topic: topic.to_string(),
            group_id: group_id.to_string(),
            interval,
            run: None,
        }
    }

    /// Stop sampling once `state` leaves the running state
    pub fn bound_to(mut self, state: Arc<LoopState>) -> Self {
        self.run = Some(state);
        self
    }

    fn run_ended(&self) -> bool {
        self.run.as_ref().is_some_and(|state| !state.is_running())
    }

    /// One admin round-trip; the connection is closed even when a fetch fails
    pub async fn poll_once(&self) -> BrokerResult<Vec<LagSample>> {
        self.admin.connect().await?;
        let fetched = async {
            let latest = self.admin.fetch_latest_offsets(&self.topic).await?;
            let committed = self
                .admin
                .fetch_committed_offsets(&self.group_id, std::slice::from_ref(&self.topic))
                .await?;
            Ok::<_, BrokerError>((latest, committed))
        }
        .await;
        if let Err(e) = self.admin.disconnect().await {
            log::debug!("Admin disconnect after lag poll failed: {}", e);
        }
        let (latest, committed) = fetched?;
        compute_lag(&self.topic, &self.group_id, &latest, &committed)
    }

    /// Poll and publish; failures are logged and counted
    pub async fn tick(&self) {
        match self.poll_once().await {
            Ok(_) if self.run_ended() => {}
            Ok(samples) => {
                for sample in &samples {
                    self.stats
                        .set_lag(&sample.topic, &sample.group_id, sample.partition, sample.lag);
                    log::debug!(
                        "Lag for {}/{} ({}): {}",
                        sample.topic,
                        sample.partition,
                        sample.group_id,
                        sample.lag
                    );
                }
                // The run may have ended while publishing
                if self.run_ended() {
                    self.stats.reset_lag();
                }
            }
            Err(_) if self.run_ended() => {}
            Err(e) => {
                log::warn!("Lag poll for '{}' failed: {}", self.topic, e);
                self.stats.record_lag_poll_error(&self.topic, &self.group_id);
            }
        }
    }

    /// Tick every interval until the run is cancelled or its bound loop ends
    ///
    /// The first tick fires one interval after the spawn.
    pub fn spawn(self, mut token: RunToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if token.is_cancelled() || self.run_ended() {
                            break;
                        }
                        self.tick().await;
                    }
                }
            }
            log::debug!("Lag monitor for '{}' stopped", self.topic);
        })
    }
}
