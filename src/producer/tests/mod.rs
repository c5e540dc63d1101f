//! Test modules for the producer loop


use crate::broker::memory::{MemoryBroker, MemoryBrokerConfig, MemoryProducer};
use crate::producer::{PacingSettings, ProducerService, ProducerSettings};
use crate::stats::StatsSink;
use std::sync::Arc;
use std::time::Duration;

pub(crate) const TOPIC: &str = "load-test";

pub(crate) struct Harness {
    pub broker: Arc<MemoryBroker>,
    pub client: Arc<MemoryProducer>,
    pub stats: StatsSink,
    pub service: ProducerService,
}

/// Two batches of ten messages per iteration, default pacing delays
pub(crate) fn small_settings() -> ProducerSettings {
    ProducerSettings {
        topic: TOPIC.to_string(),
        batch_size: 10,
        batch_count: 2,
        pacing: PacingSettings::default(),
        ..Default::default()
    }
}

pub(crate) fn harness(settings: ProducerSettings, broker_config: MemoryBrokerConfig) -> Harness {
    let broker = MemoryBroker::new(broker_config);
    let client = Arc::new(broker.producer());
    let stats = StatsSink::new().unwrap();
    let service = ProducerService::new(settings, client.clone(), stats.clone());
    Harness {
        broker,
        client,
        stats,
        service,
    }
}

pub(crate) fn default_harness() -> Harness {
    harness(small_settings(), MemoryBrokerConfig::default())
}

/// Let spawned tasks run without moving the paused clock far
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
