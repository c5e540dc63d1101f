//! Test modules for the consumer, with scripted collaborators

mod lag_monitor;
mod service;

use crate::broker::{
    AdminClient, Batch, BatchControl, BrokerError, BrokerResult, ConsumedMessage, PartitionOffset,
    TopicPartitionOffsets,
};
use crate::consumer::{MessageProcessor, ProcessResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

pub(crate) const TOPIC: &str = "orders";
pub(crate) const GROUP: &str = "orders-group";

pub(crate) fn json_message(partition: i32, offset: i64) -> ConsumedMessage {
    ConsumedMessage {
        partition,
        offset,
        key: Some(format!("key-{offset}").into_bytes()),
        value: Some(
            format!(r#"{{"name":"Product-{offset}","description":"d","price":{offset}}}"#)
                .into_bytes(),
        ),
        timestamp: SystemTime::now(),
    }
}

pub(crate) fn batch(partition: i32, offsets: std::ops::Range<i64>) -> Batch {
    Batch {
        topic: TOPIC.to_string(),
        partition,
        high_watermark: offsets.end,
        messages: offsets.map(|offset| json_message(partition, offset)).collect(),
    }
}

/// Batch control that records what the handler did
pub(crate) struct RecordingControl {
    pub running: AtomicBool,
    pub resolved: Mutex<Vec<i64>>,
    pub heartbeats: AtomicUsize,
    pub fail_heartbeat: bool,
}

impl RecordingControl {
    pub fn new() -> Arc<Self> {
        Self::build(false)
    }

    pub fn with_failing_heartbeat() -> Arc<Self> {
        Self::build(true)
    }

    fn build(fail_heartbeat: bool) -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(true),
            resolved: Mutex::new(Vec::new()),
            heartbeats: AtomicUsize::new(0),
            fail_heartbeat,
        })
    }

    pub fn resolved(&self) -> Vec<i64> {
        self.resolved.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchControl for RecordingControl {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn resolve_offset(&self, offset: i64) {
        self.resolved.lock().unwrap().push(offset);
    }

    async fn heartbeat(&self) -> BrokerResult<()> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        if self.fail_heartbeat {
            Err(BrokerError::Connection {
                message: "session expired".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// Processor that flips a control to stopped after `after` messages
pub(crate) struct StopAfterProcessor {
    pub control: Arc<RecordingControl>,
    pub after: usize,
    pub seen: AtomicUsize,
}

#[async_trait]
impl MessageProcessor for StopAfterProcessor {
    async fn process(&self, _message: &ConsumedMessage) -> ProcessResult<()> {
        if self.seen.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.control.running.store(false, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Processor that takes a fixed time per message
pub(crate) struct SlowProcessor {
    pub per_message: Duration,
    pub processed: AtomicUsize,
}

#[async_trait]
impl MessageProcessor for SlowProcessor {
    async fn process(&self, _message: &ConsumedMessage) -> ProcessResult<()> {
        tokio::time::sleep(self.per_message).await;
        self.processed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Admin client answering from fixed offsets, with switchable failures
#[derive(Default)]
pub(crate) struct ScriptedAdmin {
    pub latest: Mutex<Vec<PartitionOffset>>,
    pub committed: Mutex<Vec<PartitionOffset>>,
    pub fail_latest: AtomicBool,
    pub fail_committed: AtomicBool,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl ScriptedAdmin {
    pub fn with_offsets(latest: &[(i32, i64)], committed: &[(i32, i64)]) -> Arc<Self> {
        let to_offsets = |pairs: &[(i32, i64)]| {
            pairs
                .iter()
                .map(|&(partition, offset)| PartitionOffset { partition, offset })
                .collect::<Vec<_>>()
        };
        let admin = Self::default();
        *admin.latest.lock().unwrap() = to_offsets(latest);
        *admin.committed.lock().unwrap() = to_offsets(committed);
        Arc::new(admin)
    }
}

#[async_trait]
impl AdminClient for ScriptedAdmin {
    async fn connect(&self) -> BrokerResult<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_latest_offsets(&self, _topic: &str) -> BrokerResult<Vec<PartitionOffset>> {
        if self.fail_latest.load(Ordering::SeqCst) {
            return Err(BrokerError::Admin {
                operation: "fetch_latest_offsets".to_string(),
                message: "broker unavailable".to_string(),
            });
        }
        Ok(self.latest.lock().unwrap().clone())
    }

    async fn fetch_committed_offsets(
        &self,
        _group_id: &str,
        topics: &[String],
    ) -> BrokerResult<Vec<TopicPartitionOffsets>> {
        if self.fail_committed.load(Ordering::SeqCst) {
            return Err(BrokerError::Admin {
                operation: "fetch_committed_offsets".to_string(),
                message: "coordinator not available".to_string(),
            });
        }
        let partitions = self.committed.lock().unwrap().clone();
        Ok(topics
            .iter()
            .map(|topic| TopicPartitionOffsets {
                topic: topic.clone(),
                partitions: partitions.clone(),
            })
            .collect())
    }
}
