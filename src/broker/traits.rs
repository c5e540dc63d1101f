//! Collaborator interfaces the producer and consumer loops are written against
//!
//! The loops never talk to a concrete client. Each backend (the in-memory
//! broker, the Kafka adapter, test doubles) implements these traits.

use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::types::{
    Batch, Compression, OutgoingRecord, PartitionOffset, RecordMetadata, TopicPartitionOffsets,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Publishes records to a topic
#[async_trait]
pub trait ProducerClient: Send + Sync {
    async fn connect(&self) -> BrokerResult<()>;

    async fn disconnect(&self) -> BrokerResult<()>;

    /// Send records as one compressed batch; resolves once acknowledged
    ///
    /// Safe to call concurrently.
    async fn send(
        &self,
        topic: &str,
        records: Vec<OutgoingRecord>,
        compression: Compression,
    ) -> BrokerResult<Vec<RecordMetadata>>;
}

/// Per-batch hooks handed to a [`BatchHandler`]
#[async_trait]
pub trait BatchControl: Send + Sync {
    /// False once the consumer has been asked to stop
    fn is_running(&self) -> bool;

    /// Mark `offset` as processed; it becomes committable
    fn resolve_offset(&self, offset: i64);

    /// Tell the group coordinator this member is still alive
    async fn heartbeat(&self) -> BrokerResult<()>;
}

/// Receives batches as the consumer client fetches them
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn on_batch(&self, batch: Batch, control: Arc<dyn BatchControl>);

    /// Delivery ended because the broker connection is gone
    ///
    /// Called at most once per `run`; no batches follow it.
    async fn on_connection_lost(&self, error: BrokerError) {
        log::error!("Consumer delivery ended: {}", error);
    }
}

/// Group member subscribed to a topic
#[async_trait]
pub trait ConsumerClient: Send + Sync {
    async fn connect(&self) -> BrokerResult<()>;

    async fn disconnect(&self) -> BrokerResult<()>;

    /// Subscribe to `topic`; without a committed offset, start at the log
    /// start when `from_beginning` is set and at the log end otherwise
    async fn subscribe(&self, topic: &str, from_beginning: bool) -> BrokerResult<()>;

    /// Begin delivering batches to `handler` and return once delivery is running
    ///
    /// At most `concurrency` partitions are handled at the same time. Losing
    /// the broker connection ends delivery and is reported through
    /// [`BatchHandler::on_connection_lost`].
    async fn run(&self, concurrency: usize, handler: Arc<dyn BatchHandler>) -> BrokerResult<()>;

    /// Stop delivery; returns after the in-flight batches have returned
    async fn stop(&self) -> BrokerResult<()>;

    /// Administrative client sharing this consumer's connection settings
    fn admin(&self) -> Arc<dyn AdminClient>;
}

/// Offset queries used by the lag monitor
#[async_trait]
pub trait AdminClient: Send + Sync {
    async fn connect(&self) -> BrokerResult<()>;

    async fn disconnect(&self) -> BrokerResult<()>;

    /// Next offset to be written, per partition of `topic`
    async fn fetch_latest_offsets(&self, topic: &str) -> BrokerResult<Vec<PartitionOffset>>;

    /// Committed offsets of `group_id` for each of `topics`
    async fn fetch_committed_offsets(
        &self,
        group_id: &str,
        topics: &[String],
    ) -> BrokerResult<Vec<TopicPartitionOffsets>>;
}
