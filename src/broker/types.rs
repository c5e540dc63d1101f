//! Records and offsets exchanged with a broker

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Codec applied to a produced batch
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    #[default]
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

/// A keyed record on its way to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRecord {
    pub key: String,
    pub value: Vec<u8>,
}

impl OutgoingRecord {
    pub fn new(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Key plus payload length
    pub fn size_bytes(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

/// Where the broker stored an acknowledged record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMetadata {
    pub partition: i32,
    pub offset: i64,
}

/// A record delivered to a consumer
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumedMessage {
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub timestamp: SystemTime,
}

impl ConsumedMessage {
    pub fn size_bytes(&self) -> usize {
        self.key.as_ref().map_or(0, Vec::len) + self.value.as_ref().map_or(0, Vec::len)
    }
}

/// Contiguous run of records from one partition
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub topic: String,
    pub partition: i32,
    pub high_watermark: i64,
    pub messages: Vec<ConsumedMessage>,
}

/// Offset of one partition
///
/// For latest offsets this is the next offset to be written. For committed
/// offsets it is the next offset the group will read, or `-1` when the group
/// has never committed on that partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartitionOffset {
    pub partition: i32,
    pub offset: i64,
}

/// Committed offsets of one topic for a consumer group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicPartitionOffsets {
    pub topic: String,
    pub partitions: Vec<PartitionOffset>,
}

/// Offset value used for "nothing committed yet"
pub const NO_COMMITTED_OFFSET: i64 = -1;
