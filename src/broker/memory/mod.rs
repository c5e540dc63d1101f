//! In-process partitioned broker
//!
//! A small Kafka-shaped broker used by the `memory` backend and by tests.
//! Topics hold a fixed number of partition logs, records are placed by key
//! hash, consumer groups commit offsets per partition, and the admin client
//! answers the same latest/committed offset queries the lag monitor issues
//! against a real cluster.
//!
//! ```text
//!  MemoryProducer ──send──▶ ┌──────────── topic ────────────┐
//!                           │ p0 [0 1 2 3 4 ...]            │
//!                           │ p1 [0 1 2 ...]                │ ◀──fetch── MemoryConsumer
//!                           │ p2 [0 1 2 3 ...]              │            (group offsets)
//!                           └───────────────────────────────┘
//!                                   ▲ latest / committed
//!                                   └────────── MemoryAdmin
//! ```
//!
//! Faults can be injected to exercise the error paths of the loops.

mod admin;
mod consumer;
mod log;
mod producer;

pub use admin::MemoryAdmin;
pub use consumer::MemoryConsumer;
pub use log::PartitionLog;
pub use producer::MemoryProducer;

use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::types::{PartitionOffset, NO_COMMITTED_OFFSET};
use crate::core::sync::{handle_rwlock_read, handle_rwlock_write};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Sizing and delivery settings of the in-memory broker
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryBrokerConfig {
    /// Partitions given to automatically created topics
    pub partitions: usize,
    /// Records retained per partition
    pub retention: usize,
    /// Most records handed to a consumer in one batch
    pub max_batch_size: usize,
    /// Idle wait of a consumer that found nothing to fetch
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
    /// Simulated round-trip of a produce request
    #[serde(rename = "send_latency_ms", with = "millis")]
    pub send_latency: Duration,
}

impl Default for MemoryBrokerConfig {
    fn default() -> Self {
        Self {
            partitions: 12,
            retention: 1_000_000,
            max_batch_size: 500,
            poll_interval: Duration::from_millis(50),
            send_latency: Duration::ZERO,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Topic with its partition logs
#[derive(Debug)]
pub(crate) struct TopicLog {
    partitions: Vec<PartitionLog>,
}

impl TopicLog {
    fn new(partitions: usize, retention: usize) -> Self {
        Self {
            partitions: (0..partitions.max(1))
                .map(|p| PartitionLog::new(p as i32, retention))
                .collect(),
        }
    }

    pub(crate) fn partitions(&self) -> &[PartitionLog] {
        &self.partitions
    }

    pub(crate) fn partition(&self, partition: i32) -> Option<&PartitionLog> {
        usize::try_from(partition)
            .ok()
            .and_then(|index| self.partitions.get(index))
    }

    /// Partition for `key`, stable across runs
    pub(crate) fn partition_for_key(&self, key: &str) -> i32 {
        (fnv1a(key.as_bytes()) % self.partitions.len() as u64) as i32
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[derive(Debug, Default)]
struct FaultPlan {
    connects: AtomicUsize,
    sends: AtomicUsize,
    admin_calls: AtomicUsize,
}

/// Consume one pending failure, if any
fn take_fault(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

/// Committed offsets keyed by (group, topic, partition)
type GroupOffsets = HashMap<(String, String, i32), i64>;

/// Shared broker state; clients hold an `Arc` to it
#[derive(Debug)]
pub struct MemoryBroker {
    config: MemoryBrokerConfig,
    topics: RwLock<HashMap<String, Arc<TopicLog>>>,
    committed: RwLock<GroupOffsets>,
    faults: FaultPlan,
    closed: AtomicBool,
}

fn poisoned(message: String) -> BrokerError {
    BrokerError::Internal { message }
}

impl MemoryBroker {
    pub fn new(config: MemoryBrokerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            topics: RwLock::new(HashMap::new()),
            committed: RwLock::new(HashMap::new()),
            faults: FaultPlan::default(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &MemoryBrokerConfig {
        &self.config
    }

    /// Create `topic` with `partitions` partitions; existing topics are left alone
    pub fn create_topic(&self, topic: &str, partitions: usize) -> BrokerResult<()> {
        let mut topics = handle_rwlock_write(self.topics.write(), poisoned)?;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(TopicLog::new(partitions, self.config.retention)));
        Ok(())
    }

    pub(crate) fn topic(&self, topic: &str) -> BrokerResult<Arc<TopicLog>> {
        handle_rwlock_read(self.topics.read(), poisoned)?
            .get(topic)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownTopic {
                topic: topic.to_string(),
            })
    }

    /// Topic handle, creating the topic with the default partition count
    pub(crate) fn topic_or_create(&self, topic: &str) -> BrokerResult<Arc<TopicLog>> {
        match self.topic(topic) {
            Ok(log) => Ok(log),
            Err(BrokerError::UnknownTopic { .. }) => {
                self.create_topic(topic, self.config.partitions)?;
                self.topic(topic)
            }
            Err(e) => Err(e),
        }
    }

    pub fn partition_count(&self, topic: &str) -> BrokerResult<usize> {
        Ok(self.topic(topic)?.partitions().len())
    }

    /// Next offset to be written, per partition
    pub fn latest_offsets(&self, topic: &str) -> BrokerResult<Vec<PartitionOffset>> {
        self.topic(topic)?
            .partitions()
            .iter()
            .map(|log| {
                Ok(PartitionOffset {
                    partition: log.partition(),
                    offset: log.latest_offset()?,
                })
            })
            .collect()
    }

    /// Total records currently retained by `topic`
    pub fn retained_messages(&self, topic: &str) -> BrokerResult<usize> {
        self.topic(topic)?
            .partitions()
            .iter()
            .map(PartitionLog::len)
            .sum()
    }

    pub fn commit(&self, group_id: &str, topic: &str, partition: i32, offset: i64) -> BrokerResult<()> {
        handle_rwlock_write(self.committed.write(), poisoned)?
            .insert((group_id.to_string(), topic.to_string(), partition), offset);
        Ok(())
    }

    /// Committed offset, or `None` if the group never committed on the partition
    pub fn committed(&self, group_id: &str, topic: &str, partition: i32) -> BrokerResult<Option<i64>> {
        Ok(handle_rwlock_read(self.committed.read(), poisoned)?
            .get(&(group_id.to_string(), topic.to_string(), partition))
            .copied())
    }

    /// Committed offsets for every partition of `topic`, `-1` where none exists
    pub fn committed_offsets(&self, group_id: &str, topic: &str) -> BrokerResult<Vec<PartitionOffset>> {
        let partitions = self.partition_count(topic)?;
        let committed = handle_rwlock_read(self.committed.read(), poisoned)?;
        Ok((0..partitions as i32)
            .map(|partition| PartitionOffset {
                partition,
                offset: committed
                    .get(&(group_id.to_string(), topic.to_string(), partition))
                    .copied()
                    .unwrap_or(NO_COMMITTED_OFFSET),
            })
            .collect())
    }

    pub fn producer(self: &Arc<Self>) -> MemoryProducer {
        MemoryProducer::new(Arc::clone(self))
    }

    pub fn consumer(self: &Arc<Self>, group_id: &str) -> MemoryConsumer {
        MemoryConsumer::new(Arc::clone(self), group_id)
    }

    pub fn admin(self: &Arc<Self>) -> MemoryAdmin {
        MemoryAdmin::new(Arc::clone(self))
    }

    /// Make the next `count` connects fail
    pub fn fail_next_connects(&self, count: usize) {
        self.faults.connects.store(count, Ordering::Release);
    }

    /// Make the next `count` sends fail
    pub fn fail_next_sends(&self, count: usize) {
        self.faults.sends.store(count, Ordering::Release);
    }

    /// Make the next `count` admin offset queries fail
    pub fn fail_next_admin_calls(&self, count: usize) {
        self.faults.admin_calls.store(count, Ordering::Release);
    }

    /// Refuse all further connections and requests
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn check_connect(&self) -> BrokerResult<()> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        if take_fault(&self.faults.connects) {
            return Err(BrokerError::Connection {
                message: "injected connect failure".to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn check_send(&self, topic: &str) -> BrokerResult<()> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        if take_fault(&self.faults.sends) {
            return Err(BrokerError::Send {
                topic: topic.to_string(),
                message: "injected send failure".to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn check_admin(&self, operation: &str) -> BrokerResult<()> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        if take_fault(&self.faults.admin_calls) {
            return Err(BrokerError::Admin {
                operation: operation.to_string(),
                message: "injected admin failure".to_string(),
            });
        }
        Ok(())
    }
}
