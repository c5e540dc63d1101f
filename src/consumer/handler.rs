//! Batch handler driven by the consumer client
//!
//! Liveness is checked when a batch arrives and again before every message,
//! so a stop issued mid-batch ends processing at the next message.

use crate::broker::{Batch, BatchControl, BatchHandler, BrokerError};
use crate::consumer::processor::MessageProcessor;
use crate::core::loop_state::LoopState;
use crate::stats::{Operation, StatsSink};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct ConsumerBatchHandler {
    topic: String,
    group_id: String,
    report_interval: Duration,
    state: Arc<LoopState>,
    stats: StatsSink,
    processor: Arc<dyn MessageProcessor>,
}

impl ConsumerBatchHandler {
    pub fn new(
        topic: &str,
        group_id: &str,
        report_interval: Duration,
        state: Arc<LoopState>,
        stats: StatsSink,
        processor: Arc<dyn MessageProcessor>,
    ) -> Self {
        Self {
            topic: topic.to_string(),
            group_id: group_id.to_string(),
            report_interval,
            state,
            stats,
            processor,
        }
    }

    fn is_live(&self, control: &dyn BatchControl) -> bool {
        control.is_running() && self.state.is_running()
    }

    /// Publish throughput at most once per report interval
    fn report_throughput(&self, total: u64) {
        if !self.state.report_due(self.report_interval) {
            return;
        }
        if let Some(throughput) = self.state.throughput() {
            self.stats
                .set_consumer_throughput(&self.topic, &self.group_id, throughput);
            log::info!(
                "Consumed {} messages from '{}' ({:.2} msg/s)",
                total,
                self.topic,
                throughput
            );
        }
    }
}

#[async_trait]
impl BatchHandler for ConsumerBatchHandler {
    async fn on_batch(&self, batch: Batch, control: Arc<dyn BatchControl>) {
        if !self.is_live(control.as_ref()) {
            return;
        }
        let started = Instant::now();
        let mut handled = 0u64;
        let mut bytes = 0u64;

        for message in &batch.messages {
            if !self.is_live(control.as_ref()) {
                log::debug!(
                    "Stop requested; leaving partition {} at offset {}",
                    batch.partition,
                    message.offset
                );
                break;
            }
            if let Err(e) = self.processor.process(message).await {
                log::warn!(
                    "Skipping message {}/{}@{}: {}",
                    batch.topic,
                    batch.partition,
                    message.offset,
                    e
                );
                self.stats.record_decode_error(&self.topic, &self.group_id);
            }
            control.resolve_offset(message.offset);
            handled += 1;
            bytes += message.size_bytes() as u64;
        }

        if handled == 0 {
            return;
        }
        let total = self.state.add_messages(handled);
        self.stats
            .record_consumed(&self.topic, &self.group_id, handled, bytes);
        self.stats.observe_processing(
            Operation::Consume,
            &self.topic,
            started.elapsed().as_secs_f64(),
        );
        if let Err(e) = control.heartbeat().await {
            log::warn!("Heartbeat after partition {} batch failed: {}", batch.partition, e);
        }
        self.report_throughput(total);
    }

    async fn on_connection_lost(&self, error: BrokerError) {
        if !self.state.is_running() {
            return;
        }
        log::error!("Consumer on '{}' lost the broker: {}", self.topic, error);
        let summary = self.state.finish();
        self.stats
            .set_consumer_throughput(&self.topic, &self.group_id, 0.0);
        self.stats.reset_lag();
        log::info!("Consumer stopped after {} messages", summary.message_count);
    }
}
