//! Shared helpers for the end-to-end tests

use std::sync::Arc;
use std::time::Duration;
use streamload::broker::memory::{MemoryBroker, MemoryBrokerConfig};
use streamload::consumer::{ConsumerSettings, LagSettings};
use streamload::producer::{PacingSettings, ProducerSettings};

pub const PARTITIONS: usize = 4;

pub fn memory_broker() -> Arc<MemoryBroker> {
    MemoryBroker::new(MemoryBrokerConfig {
        partitions: PARTITIONS,
        max_batch_size: 100,
        poll_interval: Duration::from_millis(5),
        ..Default::default()
    })
}

/// Small batches with short delays so a few seconds give several iterations
pub fn producer_settings(topic: &str) -> ProducerSettings {
    ProducerSettings {
        topic: topic.to_string(),
        batch_size: 25,
        batch_count: 2,
        pacing: PacingSettings {
            target_min: 10.0,
            target_max: 20.0,
            delay_too_high: Duration::from_millis(300),
            delay_in_band: Duration::from_millis(200),
            delay_too_low: Duration::from_millis(100),
        },
        error_backoff: Duration::from_millis(500),
        ..Default::default()
    }
}

pub fn consumer_settings(topic: &str, group_id: &str) -> ConsumerSettings {
    ConsumerSettings {
        topic: topic.to_string(),
        group_id: group_id.to_string(),
        concurrency: 2,
        lag: LagSettings {
            enabled: true,
            interval: Duration::from_secs(1),
        },
        ..Default::default()
    }
}

/// Poll `condition` every 10ms until it holds; panics after `limit`
pub async fn wait_until<F: Fn() -> bool>(limit: Duration, what: &str, condition: F) {
    let waited = tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}
