//! Broker collaborators
//!
//! The producer and consumer loops are written against the traits in this
//! module. Two backends implement them:
//!
//! - [`memory`]: an in-process partitioned broker with consumer groups and
//!   fault injection, used by the `memory` backend and by tests
//! - `kafka` (cargo feature `kafka`): an `rdkafka` adapter for a real cluster

pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod traits;
pub mod types;

#[cfg(test)]
mod tests;

pub use error::{BrokerError, BrokerResult};
pub use traits::{AdminClient, BatchControl, BatchHandler, ConsumerClient, ProducerClient};
pub use types::{
    Batch, Compression, ConsumedMessage, OutgoingRecord, PartitionOffset, RecordMetadata,
    TopicPartitionOffsets, NO_COMMITTED_OFFSET,
};

use serde::Deserialize;

/// Connection settings for a real cluster
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterSettings {
    /// Comma-separated bootstrap servers
    pub brokers: String,
    pub client_id: String,
    pub request_timeout_ms: u64,
    /// Most records handed to a batch handler at once
    pub max_batch_size: usize,
    /// How long a fetch round waits to fill a batch
    pub fetch_linger_ms: u64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            client_id: "streamload".to_string(),
            request_timeout_ms: 30_000,
            max_batch_size: 500,
            fetch_linger_ms: 100,
        }
    }
}
